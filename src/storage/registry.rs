use crate::cache::Cache;
use crate::core::hash::ContentHash;
use crate::storage::file_record::FileRecord;
use crate::storage::node_record::NodeRecord;
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Result of registering a file found in local storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Result of merging one record reported by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Extended(usize),
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl MergeSummary {
    pub fn add(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Extended(_) => self.updated += 1,
            MergeOutcome::Unchanged => {}
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySummary {
    pub total_files: usize,
    pub local_files: usize,
    pub total_size: u64,
    pub local_size: u64,
}

///
/// Content and node registries of this node.
///
/// Each table has its own lock, no cross-record atomicity is offered. Whenever both tables are
/// locked at once, `nodes` is taken before `files`.
///
#[derive(Debug, Default)]
pub struct Registry {
    files: RwLock<HashMap<ContentHash, FileRecord>>,
    nodes: RwLock<HashMap<String, NodeRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cache(cache: Cache) -> Self {
        Registry {
            files: RwLock::new(
                cache
                    .files
                    .into_iter()
                    .map(|record| (record.hash, record))
                    .collect(),
            ),
            nodes: RwLock::new(
                cache
                    .nodes
                    .into_iter()
                    .map(|record| (record.url.clone(), record))
                    .collect(),
            ),
        }
    }

    pub async fn to_cache(&self) -> Cache {
        Cache {
            nodes: self.all_nodes().await,
            files: self.all_files().await,
        }
    }

    // ---- content registry ----

    pub async fn get_file(&self, hash: &ContentHash) -> Option<FileRecord> {
        self.files.read().await.get(hash).cloned()
    }

    pub async fn upsert_file(&self, record: FileRecord) {
        self.files.write().await.insert(record.hash, record);
    }

    pub async fn remove_file(&self, hash: &ContentHash) -> Option<FileRecord> {
        self.files.write().await.remove(hash)
    }

    pub async fn all_files(&self) -> Vec<FileRecord> {
        self.files.read().await.values().cloned().collect()
    }

    pub async fn local_files(&self) -> Vec<FileRecord> {
        self.files
            .read()
            .await
            .values()
            .filter(|record| record.is_locally_stored())
            .cloned()
            .collect()
    }

    pub async fn has_local_file(&self, hash: &ContentHash) -> bool {
        self.files
            .read()
            .await
            .get(hash)
            .is_some_and(|record| record.is_locally_stored())
    }

    ///
    /// Registers a file found in local storage.
    ///
    /// Unknown hashes get a fresh record listing only `node_url`. Known hashes get their local
    /// path refreshed and `node_url` added to the available nodes.
    ///
    pub async fn register_local_file(&self, record: FileRecord, node_url: &str) -> RegisterOutcome {
        let mut files = self.files.write().await;
        match files.get_mut(&record.hash) {
            Some(existing) => {
                let path_changed = existing.local_path != record.local_path;
                if path_changed {
                    existing.local_path = record.local_path;
                }
                let node_added = existing.add_available_node(node_url);
                if path_changed || node_added {
                    RegisterOutcome::Updated
                } else {
                    RegisterOutcome::Unchanged
                }
            }
            None => {
                let mut record = record;
                record.available_nodes.clear();
                record.add_available_node(node_url);
                files.insert(record.hash, record);
                RegisterOutcome::Created
            }
        }
    }

    ///
    /// Marks every locally stored record whose hash is not in `present` as no longer local, and
    /// withdraws `node_url` from it. Returns the number of records touched.
    ///
    pub async fn release_missing_local_files(
        &self,
        present: &HashSet<ContentHash>,
        node_url: &str,
    ) -> usize {
        let mut files = self.files.write().await;
        let mut released = 0;
        for record in files.values_mut() {
            if record.is_locally_stored() && !present.contains(&record.hash) {
                record.local_path.clear();
                record.remove_available_node(node_url);
                released += 1;
            }
        }
        released
    }

    ///
    /// Releases every record other than `keep` whose bytes lived at `local_path`. Called after
    /// the file at that path was replaced. Returns the released hashes.
    ///
    pub async fn release_local_path(
        &self,
        local_path: &str,
        keep: &ContentHash,
        node_url: &str,
    ) -> Vec<ContentHash> {
        let mut files = self.files.write().await;
        let mut released = Vec::new();
        for record in files.values_mut() {
            if record.local_path == local_path && record.hash != *keep {
                record.local_path.clear();
                record.remove_available_node(node_url);
                released.push(record.hash);
            }
        }
        released
    }

    ///
    /// Union-merges a record reported by a peer.
    ///
    /// Unknown hashes are inserted as reported, minus the reporter's local-only fields. Known
    /// hashes only receive the union of the available nodes, so repeated or reordered merges
    /// converge to the same registry.
    ///
    pub async fn merge_remote_file(&self, record: FileRecord) -> MergeOutcome {
        let record = record.into_remote();
        let mut files = self.files.write().await;
        match files.get_mut(&record.hash) {
            Some(existing) => match existing.merge_available_nodes(&record.available_nodes) {
                0 => MergeOutcome::Unchanged,
                added => MergeOutcome::Extended(added),
            },
            None => {
                files.insert(record.hash, record);
                MergeOutcome::Inserted
            }
        }
    }

    pub async fn merge_remote_files(
        &self,
        records: impl IntoIterator<Item = FileRecord>,
    ) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for record in records {
            summary.add(self.merge_remote_file(record).await);
        }
        summary
    }

    /// Bumps the access counter and timestamp. Returns `false` for unknown hashes.
    pub async fn record_access(&self, hash: &ContentHash) -> bool {
        match self.files.write().await.get_mut(hash) {
            Some(record) => {
                record.record_access();
                true
            }
            None => false,
        }
    }

    /// Deletes records that are neither local nor held by any known node.
    pub async fn remove_orphaned_files(&self) -> usize {
        let mut files = self.files.write().await;
        let before = files.len();
        files.retain(|_, record| !record.is_orphaned());
        before - files.len()
    }

    pub async fn summary(&self) -> RegistrySummary {
        let files = self.files.read().await;
        files
            .values()
            .fold(RegistrySummary::default(), |mut summary, record| {
                summary.total_files += 1;
                summary.total_size += record.size;
                if record.is_locally_stored() {
                    summary.local_files += 1;
                    summary.local_size += record.size;
                }
                summary
            })
    }

    // ---- node registry ----

    pub async fn get_node(&self, url: &str) -> Option<NodeRecord> {
        self.nodes.read().await.get(url).cloned()
    }

    pub async fn upsert_node(&self, record: NodeRecord) {
        self.nodes.write().await.insert(record.url.clone(), record);
    }

    pub async fn all_nodes(&self) -> Vec<NodeRecord> {
        self.nodes.read().await.values().cloned().collect()
    }

    pub async fn active_nodes(&self) -> Vec<NodeRecord> {
        let now = Utc::now();
        self.nodes
            .read()
            .await
            .values()
            .filter(|node| node.is_active_at(now))
            .cloned()
            .collect()
    }

    ///
    /// Removes every node not seen within the liveness window, then withdraws from all file
    /// records any node URL the node registry no longer knows. Returns the evicted URLs.
    ///
    pub async fn evict_stale_nodes(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut nodes = self.nodes.write().await;
        let stale: Vec<String> = nodes
            .values()
            .filter(|node| !node.is_active_at(now))
            .map(|node| node.url.clone())
            .collect();
        for url in &stale {
            nodes.remove(url);
            info!("Removed stale node: {}", url);
        }

        let mut files = self.files.write().await;
        for record in files.values_mut() {
            record
                .available_nodes
                .retain(|url| nodes.contains_key(url));
        }

        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeSet;

    const SELF_URL: &str = "http://node-a:5000";
    const PEER_URL: &str = "http://node-b:5000";

    fn local_record(content: &[u8], path: &str) -> FileRecord {
        FileRecord::new_local(
            ContentHash::from_input(content),
            path.to_string(),
            "text/plain".to_string(),
            content.len() as u64,
            path.to_string(),
            SELF_URL,
        )
    }

    fn remote_record(content: &[u8], nodes: &[&str]) -> FileRecord {
        let mut record = local_record(content, "remote/path.txt");
        record.available_nodes = nodes.iter().map(|n| n.to_string()).collect();
        record
    }

    #[tokio::test]
    async fn test_register_local_file_creates_then_updates() {
        let registry = Registry::new();
        let record = local_record(b"one", "one.txt");

        assert_eq!(
            registry.register_local_file(record.clone(), SELF_URL).await,
            RegisterOutcome::Created
        );
        assert_eq!(
            registry.register_local_file(record.clone(), SELF_URL).await,
            RegisterOutcome::Unchanged
        );

        let mut moved = record.clone();
        moved.local_path = "moved/one.txt".to_string();
        assert_eq!(
            registry.register_local_file(moved, SELF_URL).await,
            RegisterOutcome::Updated
        );
        let stored = registry.get_file(&record.hash).await.unwrap();
        assert_eq!(stored.local_path, "moved/one.txt");
        assert_eq!(stored.available_nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_register_local_file_adds_self_to_known_remote_record() {
        let registry = Registry::new();
        let remote = remote_record(b"shared", &[PEER_URL]);
        registry.merge_remote_file(remote.clone()).await;

        let outcome = registry
            .register_local_file(local_record(b"shared", "shared.txt"), SELF_URL)
            .await;
        assert_eq!(outcome, RegisterOutcome::Updated);

        let stored = registry.get_file(&remote.hash).await.unwrap();
        assert!(stored.is_locally_stored());
        assert!(stored.available_nodes.contains(SELF_URL));
        assert!(stored.available_nodes.contains(PEER_URL));
    }

    #[tokio::test]
    async fn test_merge_remote_file_strips_local_fields() {
        let registry = Registry::new();
        let remote = remote_record(b"remote", &[PEER_URL]);

        assert_eq!(
            registry.merge_remote_file(remote.clone()).await,
            MergeOutcome::Inserted
        );
        let stored = registry.get_file(&remote.hash).await.unwrap();
        assert!(!stored.is_locally_stored());
        assert!(!registry.has_local_file(&remote.hash).await);
    }

    #[tokio::test]
    async fn test_merge_remote_file_is_order_independent() {
        let first = remote_record(b"x", &[SELF_URL, PEER_URL]);
        let second = remote_record(b"x", &["http://node-c:5000", PEER_URL]);

        let forward = Registry::new();
        forward.merge_remote_file(first.clone()).await;
        forward.merge_remote_file(second.clone()).await;
        forward.merge_remote_file(second.clone()).await;

        let backward = Registry::new();
        backward.merge_remote_file(second.clone()).await;
        backward.merge_remote_file(first.clone()).await;

        let forward_nodes = forward.get_file(&first.hash).await.unwrap().available_nodes;
        let backward_nodes = backward.get_file(&first.hash).await.unwrap().available_nodes;
        assert_eq!(forward_nodes, backward_nodes);
        assert_eq!(forward_nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_merge_summary_counts() {
        let registry = Registry::new();
        registry.merge_remote_file(remote_record(b"a", &[PEER_URL])).await;

        let summary = registry
            .merge_remote_files(vec![
                remote_record(b"a", &[PEER_URL, SELF_URL]),
                remote_record(b"b", &[PEER_URL]),
                remote_record(b"b", &[PEER_URL]),
            ])
            .await;
        assert_eq!(summary, MergeSummary { inserted: 1, updated: 1 });
    }

    #[tokio::test]
    async fn test_evict_stale_nodes_cascades_into_files() {
        let registry = Registry::new();
        let now = Utc::now();
        registry
            .upsert_node(NodeRecord::new(SELF_URL.to_string(), 0, 0, now))
            .await;
        registry
            .upsert_node(NodeRecord::new(
                PEER_URL.to_string(),
                0,
                0,
                now - Duration::minutes(16),
            ))
            .await;
        let record = remote_record(b"f", &[SELF_URL, PEER_URL, "http://unknown:5000"]);
        registry.merge_remote_file(record.clone()).await;

        let evicted = registry.evict_stale_nodes(now).await;
        assert_eq!(evicted, vec![PEER_URL.to_string()]);
        assert!(registry.get_node(PEER_URL).await.is_none());

        let known: HashSet<String> = registry
            .all_nodes()
            .await
            .into_iter()
            .map(|node| node.url)
            .collect();
        for file in registry.all_files().await {
            assert!(file.available_nodes.iter().all(|url| known.contains(url)));
        }
        let stored = registry.get_file(&record.hash).await.unwrap();
        assert_eq!(stored.available_nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_orphaned_files() {
        let registry = Registry::new();
        let orphan = remote_record(b"orphan", &[]);
        let kept_remote = remote_record(b"remote", &[PEER_URL]);
        let mut kept_local = local_record(b"local", "local.txt");
        kept_local.available_nodes.clear();

        registry.merge_remote_file(orphan.clone()).await;
        registry.merge_remote_file(kept_remote.clone()).await;
        registry.upsert_file(kept_local.clone()).await;

        assert_eq!(registry.remove_orphaned_files().await, 1);
        assert!(registry.get_file(&orphan.hash).await.is_none());
        assert!(registry.get_file(&kept_remote.hash).await.is_some());
        assert!(registry.get_file(&kept_local.hash).await.is_some());
        assert!(registry.all_files().await.iter().all(|f| !f.is_orphaned()));
    }

    #[tokio::test]
    async fn test_release_missing_local_files() {
        let registry = Registry::new();
        let gone = local_record(b"gone", "gone.txt");
        let kept = local_record(b"kept", "kept.txt");
        registry.register_local_file(gone.clone(), SELF_URL).await;
        registry.register_local_file(kept.clone(), SELF_URL).await;

        let present = HashSet::from([kept.hash]);
        assert_eq!(registry.release_missing_local_files(&present, SELF_URL).await, 1);

        let released = registry.get_file(&gone.hash).await.unwrap();
        assert!(released.is_orphaned());
        assert!(registry.has_local_file(&kept.hash).await);
    }

    #[tokio::test]
    async fn test_release_local_path_keeps_new_content() {
        let registry = Registry::new();
        let old = local_record(b"first version", "a.txt");
        let mut shared = local_record(b"first version", "a.txt");
        shared.add_available_node(PEER_URL);
        registry.register_local_file(old.clone(), SELF_URL).await;
        registry.merge_remote_file(shared).await;
        let new = local_record(b"second", "a.txt");
        registry.register_local_file(new.clone(), SELF_URL).await;

        let released = registry.release_local_path("a.txt", &new.hash, SELF_URL).await;
        assert_eq!(released, vec![old.hash]);

        let old_record = registry.get_file(&old.hash).await.unwrap();
        assert!(!old_record.is_locally_stored());
        assert_eq!(
            old_record.available_nodes,
            BTreeSet::from([PEER_URL.to_string()])
        );
        assert!(registry.has_local_file(&new.hash).await);
    }

    #[tokio::test]
    async fn test_record_access() {
        let registry = Registry::new();
        let record = local_record(b"hit", "hit.txt");
        registry.register_local_file(record.clone(), SELF_URL).await;

        assert!(registry.record_access(&record.hash).await);
        assert!(registry.record_access(&record.hash).await);
        assert_eq!(registry.get_file(&record.hash).await.unwrap().access_count, 2);
        assert!(!registry.record_access(&ContentHash::from_input(b"nope")).await);
    }

    #[tokio::test]
    async fn test_summary() {
        let registry = Registry::new();
        registry
            .register_local_file(local_record(b"12345", "a.txt"), SELF_URL)
            .await;
        registry.merge_remote_file(remote_record(b"123", &[PEER_URL])).await;

        let summary = registry.summary().await;
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.local_files, 1);
        assert_eq!(summary.total_size, 8);
        assert_eq!(summary.local_size, 5);
    }
}
