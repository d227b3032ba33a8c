mod common;

use common::{build_node, http_listener, serve_http};
use mcdn::core::hash::ContentHash;
use mcdn::routing::content_router::{NotFoundReason, RouteDecision};
use mcdn::storage::file_record::FileRecord;
use mcdn::storage::node_record::NodeRecord;
use mcdn::utils::testing::{create_file_in, test_config};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::collections::BTreeSet;
use tempfile::tempdir;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

const CONTENT: &[u8] = b"8 bytes!";

#[tokio::test]
async fn test_overloaded_node_redirects_to_lightly_loaded_peer() {
    let dir = tempdir().unwrap();
    let shutdown = CancellationToken::new();
    let (listener_a, url_a) = http_listener().await;
    let (listener_b, url_b) = http_listener().await;

    // Same 8 bytes on both nodes: 10% load on A, 80% on B.
    let mut config_a = test_config(&url_a, &dir.path().join("a"));
    config_a.max_storage_capacity_bytes = 80;
    config_a.max_load_percentage = 50;
    config_a.seed_peers = vec![url_b.clone()];
    let mut config_b = test_config(&url_b, &dir.path().join("b"));
    config_b.max_storage_capacity_bytes = 10;
    config_b.max_load_percentage = 50;
    config_b.seed_peers = vec![url_a.clone()];
    create_file_in(&config_a.storage_path, "shared/file.bin", CONTENT).await;
    create_file_in(&config_b.storage_path, "file.bin", CONTENT).await;

    let node_a = build_node(config_a, Vec::new()).await;
    let node_b = build_node(config_b, Vec::new()).await;
    serve_http(listener_a, node_a.clone(), shutdown.clone());
    serve_http(listener_b, node_b.clone(), shutdown.clone());

    node_a.directory_sync().scan_local_storage().await.unwrap();
    node_b.directory_sync().scan_local_storage().await.unwrap();
    assert_eq!(node_a.storage().current_load(), 10);
    assert_eq!(node_b.storage().current_load(), 80);

    let report_a = node_a.directory_sync().run_cycle().await.unwrap();
    assert_eq!(report_a.sync.peers_synced, 1);
    assert_eq!(report_a.sync.peers_failed, 0);
    let report_b = node_b.directory_sync().run_cycle().await.unwrap();
    assert_eq!(report_b.sync.peers_failed, 0);

    let both = BTreeSet::from([url_a.clone(), url_b.clone()]);
    for node in [&node_a, &node_b] {
        let urls: BTreeSet<String> = node
            .registry()
            .all_nodes()
            .await
            .into_iter()
            .map(|record| record.url)
            .collect();
        assert_eq!(urls, both);
    }

    let hash = ContentHash::from_input(CONTENT);
    let record = node_b.registry().get_file(&hash).await.unwrap();
    assert_eq!(record.available_nodes, both);
    assert_eq!(record.local_path, "file.bin");

    let expected_location = format!("{}/content/{}", url_a, hash);
    match node_b.route(&hash).await {
        RouteDecision::Redirect { peer_url, location } => {
            assert_eq!(peer_url, url_a);
            assert_eq!(location, expected_location);
        }
        other => panic!("Expected a redirect, got {:?}", other),
    }

    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .unwrap();
    let redirected = client
        .get(format!("{}/content/{}", url_b, hash))
        .send()
        .await
        .unwrap();
    assert_eq!(redirected.status(), StatusCode::FOUND);
    assert_eq!(
        redirected.headers()["location"].to_str().unwrap(),
        expected_location
    );

    let served = client.get(expected_location).send().await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.bytes().await.unwrap().as_ref(), CONTENT);

    shutdown.cancel();
}

#[tokio::test]
async fn test_http_api_node_endpoints() {
    let dir = tempdir().unwrap();
    let shutdown = CancellationToken::new();
    let (listener, url) = http_listener().await;
    let mut config = test_config(&url, dir.path());
    config.max_storage_capacity_bytes = 1000;
    let node = build_node(config, Vec::new()).await;
    serve_http(listener, node.clone(), shutdown.clone());
    let client = reqwest::Client::new();

    let uploaded = client
        .post(format!("{}/api/node/upload/readme.txt", url))
        .body("hello world")
        .send()
        .await
        .unwrap();
    assert_eq!(uploaded.status(), StatusCode::CREATED);
    let record: FileRecord = uploaded.json().await.unwrap();
    assert_eq!(record.hash, ContentHash::from_input(b"hello world"));
    assert_eq!(record.local_path, "readme.txt");

    let too_big = client
        .post(format!("{}/api/node/upload/big.bin", url))
        .body(vec![0u8; 2000])
        .send()
        .await
        .unwrap();
    assert_eq!(too_big.status(), StatusCode::INSUFFICIENT_STORAGE);

    let files: Vec<FileRecord> = client
        .get(format!("{}/api/node/files", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].hash, record.hash);

    let info: NodeRecord = client
        .get(format!("{}/api/node/info", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info.url, url);
    assert_eq!(info.current_load, 1);

    let heartbeat = client
        .post(format!("{}/api/node/heartbeat", url))
        .json(&serde_json::json!({
            "url": "http://Peer.Example:5000/",
            "availableStorageBytes": 42,
            "currentLoad": 7,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(heartbeat.status(), StatusCode::NO_CONTENT);
    let peer = node
        .registry()
        .get_node("http://peer.example:5000")
        .await
        .unwrap();
    assert_eq!(peer.current_load, 7);

    let bad_heartbeat = client
        .post(format!("{}/api/node/heartbeat", url))
        .json(&serde_json::json!({ "url": "not a url" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_heartbeat.status(), StatusCode::BAD_REQUEST);

    let bad_hash = client
        .get(format!("{}/content/not-a-hash", url))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_hash.status(), StatusCode::BAD_REQUEST);

    let unknown = client
        .get(format!(
            "{}/content/{}",
            url,
            ContentHash::from_input(b"unknown")
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    shutdown.cancel();
}

#[tokio::test]
async fn test_pushed_records_are_merged() {
    let dir = tempdir().unwrap();
    let shutdown = CancellationToken::new();
    let (listener, url) = http_listener().await;
    let node = build_node(test_config(&url, dir.path()), Vec::new()).await;
    serve_http(listener, node.clone(), shutdown.clone());

    let hash = ContentHash::from_input(b"remote");
    let response: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/api/node/sync", url))
        .json(&serde_json::json!([
            {
                "hash": hash.to_string(),
                "name": "remote.txt",
                "size": 6,
                "localPath": "peer/only/path.txt",
                "accessCount": 99,
                "availableNodes": ["http://peer:5000"],
            },
            { "name": "missing hash" },
        ]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["inserted"], 1);
    assert_eq!(response["skipped"], 1);

    let record = node.registry().get_file(&hash).await.unwrap();
    assert_eq!(record.local_path, "");
    assert_eq!(record.access_count, 0);
    assert_eq!(
        record.available_nodes,
        BTreeSet::from(["http://peer:5000".to_string()])
    );

    shutdown.cancel();
}

#[tokio::test]
async fn test_peer_client_pushes_local_files() {
    let dir = tempdir().unwrap();
    let shutdown = CancellationToken::new();
    let (listener_a, url_a) = http_listener().await;
    let (listener_b, url_b) = http_listener().await;
    let node_a = build_node(test_config(&url_a, &dir.path().join("a")), Vec::new()).await;
    let node_b = build_node(test_config(&url_b, &dir.path().join("b")), Vec::new()).await;
    serve_http(listener_a, node_a.clone(), shutdown.clone());
    serve_http(listener_b, node_b.clone(), shutdown.clone());

    let stored = node_a.store_file("pushed.txt", b"pushed").await.unwrap();
    let files = node_a.registry().local_files().await;
    node_a
        .directory_sync()
        .peer_client()
        .push_files(&url_b, &files)
        .await
        .unwrap();

    let record = node_b.registry().get_file(&stored.hash).await.unwrap();
    assert!(!record.is_locally_stored());
    assert_eq!(record.available_nodes, BTreeSet::from([url_a.clone()]));

    shutdown.cancel();
}

#[tokio::test]
async fn test_upload_replacing_a_file_releases_the_old_content() {
    let dir = tempdir().unwrap();
    let (_listener, url) = http_listener().await;
    let node = build_node(test_config(&url, dir.path()), Vec::new()).await;

    let first = node.store_file("a.txt", b"first version").await.unwrap();
    let second = node.store_file("a.txt", b"second!!").await.unwrap();
    assert_eq!(node.storage().stored_bytes(), 8);

    let old = node.registry().get_file(&first.hash).await.unwrap();
    assert!(!old.is_locally_stored());
    assert!(old.available_nodes.is_empty());
    assert!(matches!(
        node.route(&first.hash).await,
        RouteDecision::NotFound(NotFoundReason::NoAvailableNode)
    ));

    match node.route(&second.hash).await {
        RouteDecision::Serve { mut file, size, .. } => {
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes).await.unwrap();
            assert_eq!(bytes, b"second!!");
            assert_eq!(size, 8);
        }
        other => panic!("Expected the new content to be served, got {:?}", other),
    }
    assert_eq!(node.registry().local_files().await.len(), 1);
}

#[tokio::test]
async fn test_content_length_follows_the_file_on_disk() {
    let dir = tempdir().unwrap();
    let shutdown = CancellationToken::new();
    let (listener, url) = http_listener().await;
    let node = build_node(test_config(&url, dir.path()), Vec::new()).await;
    serve_http(listener, node.clone(), shutdown.clone());

    let path = create_file_in(dir.path(), "grows.txt", b"short").await;
    node.directory_sync().scan_local_storage().await.unwrap();
    let hash = ContentHash::from_input(b"short");
    tokio::fs::write(&path, b"much longer than before").await.unwrap();

    let response = reqwest::get(format!("{}/content/{}", url, hash))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-length"].to_str().unwrap(),
        "23"
    );
    assert_eq!(
        response.bytes().await.unwrap().as_ref(),
        b"much longer than before"
    );

    shutdown.cancel();
}
