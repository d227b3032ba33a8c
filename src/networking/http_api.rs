use crate::core::hash::ContentHash;
use crate::core::node::Node;
use crate::routing::content_router::RouteDecision;
use crate::storage::file_record::FileRecord;
use crate::storage::node_record::NodeRecord;
use crate::storage::storage_manager::StorageError;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LocateResponse {
    file_hash: ContentHash,
    nodes: Vec<SocketAddr>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncResponse {
    inserted: usize,
    updated: usize,
    skipped: usize,
}

fn parse_hash(raw: &str) -> Result<ContentHash, Response> {
    raw.parse::<ContentHash>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())
}

async fn content_handler(State(node): State<Arc<Node>>, Path(hash): Path<String>) -> Response {
    let hash = match parse_hash(&hash) {
        Ok(hash) => hash,
        Err(response) => return response,
    };

    match node.route(&hash).await {
        RouteDecision::Serve {
            file, content_type, ..
        } => {
            // Length of the bytes on disk, the record may predate the last change.
            let mut headers = vec![(header::CONTENT_TYPE, content_type)];
            match file.metadata().await {
                Ok(metadata) => headers.push((header::CONTENT_LENGTH, metadata.len().to_string())),
                Err(e) => warn!("Unable to stat content {}: {}", hash, e),
            }
            (
                StatusCode::OK,
                AppendHeaders(headers),
                Body::from_stream(ReaderStream::new(file)),
            )
                .into_response()
        }
        RouteDecision::Redirect { location, .. } => (
            StatusCode::FOUND,
            [
                (header::LOCATION, location),
                (header::CONNECTION, "close".to_string()),
            ],
        )
            .into_response(),
        RouteDecision::NotFound(reason) => {
            (StatusCode::NOT_FOUND, reason.to_string()).into_response()
        }
    }
}

async fn node_info_handler(State(node): State<Arc<Node>>) -> Json<NodeRecord> {
    Json(node.node_info())
}

async fn node_files_handler(State(node): State<Arc<Node>>) -> Json<Vec<FileRecord>> {
    Json(node.registry().local_files().await)
}

///
/// Accepts a batch of records pushed by a peer. Entries that are not valid records are skipped,
/// the rest are merged.
///
async fn node_sync_handler(
    State(node): State<Arc<Node>>,
    Json(entries): Json<Vec<serde_json::Value>>,
) -> Json<SyncResponse> {
    let total = entries.len();
    let files: Vec<FileRecord> = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping malformed pushed record: {}", e);
                None
            }
        })
        .collect();
    let skipped = total - files.len();
    let summary = node.accept_files(files).await;

    Json(SyncResponse {
        inserted: summary.inserted,
        updated: summary.updated,
        skipped,
    })
}

async fn node_heartbeat_handler(
    State(node): State<Arc<Node>>,
    Json(record): Json<NodeRecord>,
) -> Response {
    match node.accept_heartbeat(record).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn node_locate_handler(
    State(node): State<Arc<Node>>,
    Path(hash): Path<String>,
) -> Response {
    let hash = match parse_hash(&hash) {
        Ok(hash) => hash,
        Err(response) => return response,
    };
    let nodes = node.locate(hash).await;
    Json(LocateResponse {
        file_hash: hash,
        nodes,
    })
    .into_response()
}

async fn node_upload_handler(
    State(node): State<Arc<Node>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    match node.store_file(&name, &body).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => {
            let status = match e.downcast_ref::<StorageError>() {
                Some(StorageError::PathOutsideRoot(_)) => StatusCode::BAD_REQUEST,
                Some(StorageError::CapacityExceeded { .. }) => StatusCode::INSUFFICIENT_STORAGE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!("Upload of {} failed: {:#}", name, e);
            (status, e.to_string()).into_response()
        }
    }
}

async fn status_handler(State(node): State<Arc<Node>>) -> Response {
    Json(node.status().await).into_response()
}

async fn status_history_handler(State(node): State<Arc<Node>>) -> Response {
    Json(node.status_history().await).into_response()
}

pub fn build_router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/content/{hash}", get(content_handler))
        .route("/api/node/info", get(node_info_handler))
        .route("/api/node/files", get(node_files_handler))
        .route("/api/node/sync", post(node_sync_handler))
        .route("/api/node/heartbeat", post(node_heartbeat_handler))
        .route("/api/node/locate/{hash}", get(node_locate_handler))
        .route("/api/node/upload/{name}", post(node_upload_handler))
        .route("/api/status", get(status_handler))
        .route("/api/status/history", get(status_history_handler))
        .with_state(node)
}

///
/// Serves the HTTP API on `listener` until `shutdown` is cancelled.
///
pub async fn serve(
    listener: TcpListener,
    node: Arc<Node>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!("HTTP API listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(node))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
