#![allow(dead_code)]

use mcdn::config::Config;
use mcdn::core::node::{Node, NodeBuilder};
use mcdn::discovery::StaticPeers;
use mcdn::networking::http_api;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Builds a node bound to loopback UDP, asking `udp_peers` in existence queries.
pub async fn build_node(config: Config, udp_peers: Vec<SocketAddr>) -> Arc<Node> {
    NodeBuilder::new(config)
        .local_addresses(Vec::new())
        .peer_source(Arc::new(StaticPeers(udp_peers)))
        .udp_bind("127.0.0.1:0".parse().unwrap())
        .build()
        .await
        .unwrap()
}

/// Reserves a loopback HTTP listener and returns it with the node URL it implies.
pub async fn http_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    (listener, url)
}

/// Serves the node's HTTP API until `shutdown` is cancelled.
pub fn serve_http(listener: TcpListener, node: Arc<Node>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        http_api::serve(listener, node, shutdown).await.unwrap();
    });
}
