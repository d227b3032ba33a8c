use crate::constants::STATUS_HISTORY_CAPACITY;
use crate::core::identity::NodeIdentity;
use crate::discovery::dns::PeerDiscovery;
use crate::storage::registry::Registry;
use crate::storage::storage_manager::StorageManager;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::net::IpAddr;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStatus {
    pub available_storage_bytes: u64,
    pub current_load_percentage: u8,
    pub max_storage_capacity_bytes: u64,
    pub total_files: usize,
    pub local_files: usize,
    pub total_stored_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedNode {
    pub url: String,
    pub last_seen: DateTime<Utc>,
    pub current_load: u8,
    pub available_storage_bytes: u64,
}

/// Diagnostic snapshot served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub node_url: String,
    pub hostname: String,
    pub main_domain: Option<String>,
    pub local_addresses: Vec<IpAddr>,
    pub resolved_addresses: Vec<IpAddr>,
    /// True when the rendezvous domain resolves to one of this host's addresses.
    pub is_part_of_cluster: bool,
    pub storage_status: StorageStatus,
    pub connected_nodes: Vec<ConnectedNode>,
    pub last_update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub is_part_of_cluster: bool,
    pub connected_nodes_count: usize,
    pub current_load: u8,
    pub local_files: usize,
    pub available_storage_bytes: u64,
}

impl From<&ClusterStatus> for StatusHistoryEntry {
    fn from(status: &ClusterStatus) -> Self {
        StatusHistoryEntry {
            timestamp: status.last_update_time,
            is_part_of_cluster: status.is_part_of_cluster,
            connected_nodes_count: status.connected_nodes.len(),
            current_load: status.storage_status.current_load_percentage,
            local_files: status.storage_status.local_files,
            available_storage_bytes: status.storage_status.available_storage_bytes,
        }
    }
}

///
/// Bounded history of status snapshots, oldest first. Owned by the node, not global.
///
pub struct StatusHistory {
    capacity: usize,
    entries: Mutex<VecDeque<StatusHistoryEntry>>,
}

impl Default for StatusHistory {
    fn default() -> Self {
        Self::with_capacity(STATUS_HISTORY_CAPACITY)
    }
}

impl StatusHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        StatusHistory {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub async fn record(&self, entry: StatusHistoryEntry) {
        let mut entries = self.entries.lock().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub async fn entries(&self) -> Vec<StatusHistoryEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }
}

///
/// Gathers the status snapshot. Resolves the rendezvous domain, which may hit the network once
/// the DNS cache has expired.
///
pub async fn collect_status(
    identity: &NodeIdentity,
    discovery: &PeerDiscovery,
    registry: &Registry,
    storage: &StorageManager,
) -> ClusterStatus {
    let hostname = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    let resolved_addresses = discovery.resolve_peers().await;
    let local_addresses = identity.local_addresses().to_vec();
    let is_part_of_cluster = resolved_addresses
        .iter()
        .any(|address| identity.is_local_address(address));

    let summary = registry.summary().await;
    let connected_nodes = registry
        .active_nodes()
        .await
        .into_iter()
        .filter(|node| !identity.is_self(&node.url))
        .map(|node| ConnectedNode {
            url: node.url,
            last_seen: node.last_seen,
            current_load: node.current_load,
            available_storage_bytes: node.available_storage_bytes,
        })
        .collect();

    ClusterStatus {
        node_url: identity.url().to_string(),
        hostname,
        main_domain: discovery.domain().map(str::to_string),
        local_addresses,
        resolved_addresses,
        is_part_of_cluster,
        storage_status: StorageStatus {
            available_storage_bytes: storage.available_storage_bytes(),
            current_load_percentage: storage.current_load(),
            max_storage_capacity_bytes: storage.max_capacity_bytes(),
            total_files: summary.total_files,
            local_files: summary.local_files,
            total_stored_bytes: summary.total_size,
        },
        connected_nodes,
        last_update_time: Utc::now(),
    }
}
