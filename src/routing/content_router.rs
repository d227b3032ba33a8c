use crate::core::hash::ContentHash;
use crate::core::identity::NodeIdentity;
use crate::storage::file_record::FileRecord;
use crate::storage::node_record::NodeRecord;
use crate::storage::registry::Registry;
use crate::storage::storage_manager::StorageManager;
use chrono::Utc;
use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use tokio::fs::File as TokioFile;

/// Why a request could not be routed anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// No record exists for the hash.
    UnknownHash,
    /// The hash is known, but neither this node nor any active, non-overloaded peer can serve it.
    NoAvailableNode,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundReason::UnknownHash => write!(f, "Unknown content hash"),
            NotFoundReason::NoAvailableNode => write!(f, "No available nodes to serve the content"),
        }
    }
}

#[derive(Debug)]
pub enum RouteDecision {
    Serve {
        file: TokioFile,
        content_type: String,
        name: String,
        size: u64,
    },
    Redirect {
        peer_url: String,
        location: String,
    },
    NotFound(NotFoundReason),
}

///
/// Decides where a content request is served.
///
/// Local copies are served while this node's load is below the threshold. Otherwise the request
/// goes to the least-loaded active peer holding the content that is itself below the threshold.
///
pub struct ContentRouter {
    identity: Arc<NodeIdentity>,
    registry: Arc<Registry>,
    storage: Arc<StorageManager>,
    max_load_percentage: u8,
}

impl ContentRouter {
    pub fn new(
        identity: Arc<NodeIdentity>,
        registry: Arc<Registry>,
        storage: Arc<StorageManager>,
        max_load_percentage: u8,
    ) -> Self {
        ContentRouter {
            identity,
            registry,
            storage,
            max_load_percentage,
        }
    }

    pub async fn route(&self, hash: &ContentHash) -> RouteDecision {
        let Some(record) = self.registry.get_file(hash).await else {
            return RouteDecision::NotFound(NotFoundReason::UnknownHash);
        };

        if record.is_locally_stored() && self.storage.current_load() < self.max_load_percentage {
            match self.storage.open(&record.local_path).await {
                Ok(file) => {
                    self.registry.record_access(hash).await;
                    return RouteDecision::Serve {
                        file,
                        content_type: record.content_type,
                        name: record.name,
                        size: record.size,
                    };
                }
                Err(e) => warn!(
                    "Local copy of {} at {} unreadable, trying peers: {}",
                    hash, record.local_path, e
                ),
            }
        }

        match self.candidate_peers(&record).await.first() {
            Some(peer) => {
                info!(
                    "Redirecting {} to {} (load {}%)",
                    hash, peer.url, peer.current_load
                );
                RouteDecision::Redirect {
                    location: format!("{}/content/{}", peer.url, hash),
                    peer_url: peer.url.clone(),
                }
            }
            None => RouteDecision::NotFound(NotFoundReason::NoAvailableNode),
        }
    }

    ///
    /// Active peers holding `record` with load below the threshold, least loaded first.
    ///
    /// The sort is stable over the record's ordered node set, so ties always resolve the same way.
    ///
    pub async fn candidate_peers(&self, record: &FileRecord) -> Vec<NodeRecord> {
        let now = Utc::now();
        let mut candidates = Vec::new();
        for url in &record.available_nodes {
            if self.identity.is_self(url) {
                continue;
            }
            if let Some(node) = self.registry.get_node(url).await {
                if node.is_active_at(now) && node.current_load < self.max_load_percentage {
                    candidates.push(node);
                }
            }
        }
        candidates.sort_by_key(|node| node.current_load);
        candidates
    }
}
