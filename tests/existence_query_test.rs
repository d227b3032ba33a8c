mod common;

use common::build_node;
use mcdn::core::hash::ContentHash;
use mcdn::networking::messages::{ExistenceMessage, FileQuery};
use mcdn::utils::testing::test_config;
use std::time::Duration;
use tempfile::tempdir;
use tokio::net::UdpSocket;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_query_finds_peer_holding_the_file() {
    let dir = tempdir().unwrap();
    let holder = build_node(
        test_config("http://holder:5000", &dir.path().join("holder")),
        Vec::new(),
    )
    .await;
    holder.start_listening();
    let record = holder.store_file("movie.bin", b"some bytes").await.unwrap();

    let asker = build_node(
        test_config("http://asker:5000", &dir.path().join("asker")),
        vec![holder.udp_addr().unwrap()],
    )
    .await;
    asker.start_listening();

    let found = asker
        .existence()
        .query_existence(record.hash, WINDOW)
        .await;
    assert_eq!(found, vec![holder.udp_addr().unwrap()]);
    assert_eq!(asker.existence().in_flight_queries(), 0);

    let unknown = asker
        .existence()
        .query_existence(ContentHash::from_input(b"nobody has this"), WINDOW)
        .await;
    assert!(unknown.is_empty());
}

#[tokio::test]
async fn test_query_returns_after_the_window() {
    let dir = tempdir().unwrap();
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let asker = build_node(
        test_config("http://asker:5000", dir.path()),
        vec![silent.local_addr().unwrap()],
    )
    .await;
    asker.start_listening();

    let started = Instant::now();
    let found = asker
        .existence()
        .query_existence(ContentHash::from_input(b"x"), WINDOW)
        .await;
    let elapsed = started.elapsed();

    assert!(found.is_empty());
    assert!(elapsed >= WINDOW);
    assert!(elapsed < WINDOW + Duration::from_secs(1));
}

#[tokio::test]
async fn test_concurrent_queries_do_not_share_answers() {
    let dir = tempdir().unwrap();
    let holder = build_node(
        test_config("http://holder:5000", &dir.path().join("holder")),
        Vec::new(),
    )
    .await;
    holder.start_listening();
    let stored = holder.store_file("a.txt", b"held").await.unwrap();

    let asker = build_node(
        test_config("http://asker:5000", &dir.path().join("asker")),
        vec![holder.udp_addr().unwrap()],
    )
    .await;
    asker.start_listening();

    let missing = ContentHash::from_input(b"not held");
    let (held, not_held) = tokio::join!(
        asker.existence().query_existence(stored.hash, WINDOW),
        asker.existence().query_existence(missing, WINDOW),
    );
    assert_eq!(held, vec![holder.udp_addr().unwrap()]);
    assert!(not_held.is_empty());
}

#[tokio::test]
async fn test_listener_survives_malformed_datagrams() {
    let dir = tempdir().unwrap();
    let holder = build_node(test_config("http://holder:5000", dir.path()), Vec::new()).await;
    holder.start_listening();
    let stored = holder.store_file("a.txt", b"held").await.unwrap();
    let holder_addr = holder.udp_addr().unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(b"not json at all", holder_addr).await.unwrap();
    client.send_to(b"{\"fileHash\": 12}", holder_addr).await.unwrap();

    let query = ExistenceMessage::Query(FileQuery::new(stored.hash));
    client
        .send_to(&query.to_bytes().unwrap(), holder_addr)
        .await
        .unwrap();

    let mut buf = [0u8; 2048];
    let (len, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, holder_addr);
    match ExistenceMessage::from_bytes(&buf[..len]).unwrap() {
        ExistenceMessage::Response(response) => {
            assert_eq!(response.file_hash, stored.hash);
            assert!(response.exists);
        }
        other => panic!("Expected a response, got {}", other),
    }
}

#[tokio::test]
async fn test_shutdown_returns_partial_answers_early() {
    let dir = tempdir().unwrap();
    let holder = build_node(
        test_config("http://holder:5000", &dir.path().join("holder")),
        Vec::new(),
    )
    .await;
    holder.start_listening();
    let stored = holder.store_file("a.txt", b"held").await.unwrap();

    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let asker = build_node(
        test_config("http://asker:5000", &dir.path().join("asker")),
        vec![holder.udp_addr().unwrap(), silent.local_addr().unwrap()],
    )
    .await;
    asker.start_listening();

    let shutdown = asker.shutdown_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
    });

    let started = Instant::now();
    let found = asker
        .existence()
        .query_existence(stored.hash, Duration::from_secs(30))
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(found, vec![holder.udp_addr().unwrap()]);
    assert_eq!(asker.existence().in_flight_queries(), 0);
}
