use crate::core::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

///
/// Metadata of one content-addressed file, keyed by its hash.
///
/// `available_nodes` is a set, so merging two records can neither lose nor duplicate a node.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub hash: ContentHash,
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default = "Utc::now")]
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
    /// Path relative to the storage root. Empty when the file is not held locally.
    #[serde(default)]
    pub local_path: String,
    #[serde(default)]
    pub available_nodes: BTreeSet<String>,
}

impl FileRecord {
    ///
    /// Record for a file found in local storage, held only by `node_url` so far.
    ///
    pub fn new_local(
        hash: ContentHash,
        name: String,
        content_type: String,
        size: u64,
        local_path: String,
        node_url: &str,
    ) -> Self {
        FileRecord {
            hash,
            name,
            content_type,
            size,
            last_accessed: Utc::now(),
            access_count: 0,
            local_path,
            available_nodes: BTreeSet::from([node_url.to_string()]),
        }
    }

    pub fn is_locally_stored(&self) -> bool {
        !self.local_path.is_empty()
    }

    /// Neither stored here nor known to be stored anywhere else.
    pub fn is_orphaned(&self) -> bool {
        !self.is_locally_stored() && self.available_nodes.is_empty()
    }

    /// Returns `true` if the node was not listed yet.
    pub fn add_available_node(&mut self, node_url: &str) -> bool {
        self.available_nodes.insert(node_url.to_string())
    }

    pub fn remove_available_node(&mut self, node_url: &str) -> bool {
        self.available_nodes.remove(node_url)
    }

    ///
    /// Set union of the available nodes. Returns how many nodes were new.
    ///
    pub fn merge_available_nodes<'a>(&mut self, nodes: impl IntoIterator<Item = &'a String>) -> usize {
        let before = self.available_nodes.len();
        self.available_nodes.extend(nodes.into_iter().cloned());
        self.available_nodes.len() - before
    }

    pub fn record_access(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = Utc::now();
    }

    ///
    /// Strips the fields that only make sense on the node that reported the record.
    ///
    /// A peer's local path points into the peer's storage root and its access counter measures
    /// the peer's traffic, neither may leak into this node's registry.
    ///
    pub fn into_remote(mut self) -> Self {
        self.local_path.clear();
        self.access_count = 0;
        self
    }
}
