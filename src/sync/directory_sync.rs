use crate::cache::Cache;
use crate::config::Config;
use crate::constants::PEER_SYNC_CONCURRENCY;
use crate::core::hash::ContentHash;
use crate::core::identity::{canonical_url, NodeIdentity};
use crate::discovery::dns::PeerDiscovery;
use crate::networking::circuit_breaker::CircuitBreaker;
use crate::networking::peer_client::{PeerClient, PeerSyncError, RetryPolicy};
use crate::storage::file_manager::{content_type_for, hash_file, list_files};
use crate::storage::file_record::FileRecord;
use crate::storage::node_record::NodeRecord;
use crate::storage::registry::{MergeSummary, RegisterOutcome, Registry};
use crate::storage::storage_manager::StorageManager;
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub files_seen: usize,
    pub created: usize,
    pub updated: usize,
    pub released: usize,
    pub failed: usize,
    pub stored_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub peers_synced: usize,
    pub peers_failed: usize,
    pub merged: MergeSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub evicted_nodes: Vec<String>,
    pub orphaned_files: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scan: ScanReport,
    pub sync: SyncReport,
    pub cleanup: CleanupReport,
}

///
/// The recurring scan, sync and cleanup cycle.
///
/// All three phases run under `cycle_lock`. A full cycle holds it from the first phase to the
/// last, so a second cycle can never interleave with one in flight.
///
pub struct DirectorySync {
    identity: Arc<NodeIdentity>,
    registry: Arc<Registry>,
    storage: Arc<StorageManager>,
    discovery: Arc<PeerDiscovery>,
    client: PeerClient,
    seed_peers: Vec<String>,
    peer_http_port: u16,
    hash_parallelism: usize,
    cache_file_path: Option<PathBuf>,
    cycle_lock: Mutex<()>,
}

impl DirectorySync {
    pub fn new(
        config: &Config,
        identity: Arc<NodeIdentity>,
        registry: Arc<Registry>,
        storage: Arc<StorageManager>,
        discovery: Arc<PeerDiscovery>,
    ) -> Result<Self> {
        let client = PeerClient::new(
            config.http_timeout(),
            RetryPolicy {
                max_retries: config.sync_max_retries,
                base_delay: config.retry_base_delay(),
            },
            CircuitBreaker::new(config.breaker_failure_threshold, config.breaker_cooldown()),
        )?;

        Ok(DirectorySync {
            identity,
            registry,
            storage,
            discovery,
            client,
            seed_peers: config.seed_peers.clone(),
            peer_http_port: config.peer_http_port,
            hash_parallelism: config.hash_parallelism.max(1),
            cache_file_path: config.cache_file_path.clone(),
            cycle_lock: Mutex::new(()),
        })
    }

    pub fn peer_client(&self) -> &PeerClient {
        &self.client
    }

    ///
    /// Runs scan, sync and cleanup back to back, then saves the registry snapshot.
    ///
    /// A failing phase aborts the rest of the cycle, the next tick starts over.
    ///
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = self.cycle_lock.lock().await;

        let scan = self.scan_locked().await?;
        let sync = self.sync_locked().await;
        let cleanup = self.cleanup_locked(Utc::now()).await;
        drop(_guard);

        self.save_snapshot().await?;
        Ok(CycleReport {
            scan,
            sync,
            cleanup,
        })
    }

    pub async fn scan_local_storage(&self) -> Result<ScanReport> {
        let _guard = self.cycle_lock.lock().await;
        self.scan_locked().await
    }

    pub async fn sync_with_peers(&self) -> SyncReport {
        let _guard = self.cycle_lock.lock().await;
        self.sync_locked().await
    }

    pub async fn cleanup_stale_data(&self, now: DateTime<Utc>) -> CleanupReport {
        let _guard = self.cycle_lock.lock().await;
        self.cleanup_locked(now).await
    }

    /// Fresh liveness and load figures of this node.
    pub fn measure_self(&self) -> NodeRecord {
        NodeRecord::new(
            self.identity.url().to_string(),
            self.storage.available_storage_bytes(),
            self.storage.current_load(),
            Utc::now(),
        )
    }

    ///
    /// Peers to sync with: seed URLs, DNS-resolved addresses on the peer HTTP port and every
    /// active node in the registry, without this node.
    ///
    pub async fn peer_urls(&self) -> Vec<String> {
        let mut urls = BTreeSet::new();

        for seed in &self.seed_peers {
            match canonical_url(seed) {
                Ok(url) => {
                    urls.insert(url);
                }
                Err(e) => warn!("Skipping seed peer: {}", e),
            }
        }

        for ip in self.discovery.resolve_peers().await {
            if self.identity.is_local_address(&ip) {
                continue;
            }
            let address = SocketAddr::new(ip, self.peer_http_port);
            match canonical_url(&format!("http://{}", address)) {
                Ok(url) => {
                    urls.insert(url);
                }
                Err(e) => warn!("Skipping resolved peer {}: {}", address, e),
            }
        }

        for node in self.registry.active_nodes().await {
            urls.insert(node.url);
        }

        urls.into_iter()
            .filter(|url| !self.identity.is_self(url))
            .collect()
    }

    pub async fn save_snapshot(&self) -> Result<()> {
        let Some(path) = self.cache_file_path.clone() else {
            return Ok(());
        };
        let cache = self.registry.to_cache().await;
        tokio::task::spawn_blocking(move || cache.save_to_file(&path)).await??;
        Ok(())
    }

    async fn scan_locked(&self) -> Result<ScanReport> {
        self.storage.ensure_root().await?;
        let paths = list_files(self.storage.root()).await?;
        let node_url = self.identity.url();

        let mut hashed: Vec<(PathBuf, std::io::Result<(ContentHash, u64)>)> = stream::iter(paths)
            .map(|path| async move {
                let result = hash_file(&path).await;
                (path, result)
            })
            .buffer_unordered(self.hash_parallelism)
            .collect()
            .await;
        hashed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = ScanReport::default();
        let mut present: HashSet<ContentHash> = HashSet::new();

        for (path, result) in hashed {
            report.files_seen += 1;
            let (hash, size) = match result {
                Ok(hashed) => hashed,
                Err(e) => {
                    warn!("Error processing file {}: {}", path.display(), e);
                    report.failed += 1;
                    continue;
                }
            };
            report.stored_bytes += size;

            // Same bytes under several paths: the first path wins.
            if !present.insert(hash) {
                continue;
            }
            let Some(relative_path) = self.storage.relative_path(&path) else {
                warn!("{} is outside the storage root, skipped", path.display());
                report.failed += 1;
                continue;
            };
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| relative_path.clone());

            let record = FileRecord::new_local(
                hash,
                name,
                content_type_for(&path),
                size,
                relative_path,
                node_url,
            );
            match self.registry.register_local_file(record, node_url).await {
                RegisterOutcome::Created => report.created += 1,
                RegisterOutcome::Updated => report.updated += 1,
                RegisterOutcome::Unchanged => {}
            }
        }

        report.released = self
            .registry
            .release_missing_local_files(&present, node_url)
            .await;
        self.storage.set_stored_bytes(report.stored_bytes);

        info!(
            "Scanned {} file(s): {} new, {} updated, {} gone, {} failed",
            report.files_seen, report.created, report.updated, report.released, report.failed
        );
        Ok(report)
    }

    async fn sync_locked(&self) -> SyncReport {
        let own = self.measure_self();
        self.registry.upsert_node(own.clone()).await;

        let peers = self.peer_urls().await;
        debug!("Syncing with {} peer(s)", peers.len());

        let own = &own;
        let results: Vec<(String, Result<MergeSummary, PeerSyncError>)> = stream::iter(peers)
            .map(|peer| async move {
                let result = self.sync_with_peer(&peer, own).await;
                (peer, result)
            })
            .buffer_unordered(PEER_SYNC_CONCURRENCY)
            .collect()
            .await;

        let mut report = SyncReport::default();
        for (peer, result) in results {
            match result {
                Ok(summary) => {
                    report.peers_synced += 1;
                    report.merged.inserted += summary.inserted;
                    report.merged.updated += summary.updated;
                }
                Err(e) => {
                    report.peers_failed += 1;
                    warn!("Error syncing with node {}: {}", peer, e);
                }
            }
        }

        if report.merged.inserted > 0 {
            info!("Added {} new file records from remote nodes", report.merged.inserted);
        }
        if report.merged.updated > 0 {
            info!(
                "Updated {} existing file records with new node information",
                report.merged.updated
            );
        }
        report
    }

    ///
    /// Exchanges liveness with one peer and merges its registry.
    ///
    /// The peer is recorded under the URL it reports about itself. Its records are credited to
    /// that URL even if the peer left itself out of their node lists.
    ///
    async fn sync_with_peer(
        &self,
        peer: &str,
        own: &NodeRecord,
    ) -> Result<MergeSummary, PeerSyncError> {
        let info = self.client.fetch_node_info(peer).await?;
        let peer_url = canonical_url(&info.url)?;
        if self.identity.is_self(&peer_url) {
            debug!("{} is this node, skipped", peer);
            return Ok(MergeSummary::default());
        }
        self.registry
            .upsert_node(NodeRecord::new(
                peer_url.clone(),
                info.available_storage_bytes,
                info.current_load,
                Utc::now(),
            ))
            .await;

        if let Err(e) = self.client.send_heartbeat(peer, own).await {
            warn!("Heartbeat to {} failed: {}", peer, e);
        }

        let files = self.client.fetch_files(peer).await?;
        let records = files.into_iter().map(|mut record| {
            record.add_available_node(&peer_url);
            record
        });
        Ok(self.registry.merge_remote_files(records).await)
    }

    async fn cleanup_locked(&self, now: DateTime<Utc>) -> CleanupReport {
        let evicted_nodes = self.registry.evict_stale_nodes(now).await;
        let orphaned_files = self.registry.remove_orphaned_files().await;
        if orphaned_files > 0 {
            info!("Removed {} orphaned file records", orphaned_files);
        }
        CleanupReport {
            evicted_nodes,
            orphaned_files,
        }
    }
}

/// Handle of the background cycle task.
pub struct SyncTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SyncTask {
    /// Stops the task and waits for the current cycle to be abandoned.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!("Directory sync task ended abnormally: {}", e);
        }
    }
}

///
/// Runs `run_cycle` right away and then every `period`, until `shutdown` is cancelled or the
/// returned task is stopped.
///
pub fn spawn_directory_sync(
    sync: Arc<DirectorySync>,
    period: Duration,
    shutdown: &CancellationToken,
) -> SyncTask {
    let cancel = shutdown.child_token();
    let cancel_clone = cancel.clone();

    let handle = tokio::spawn(async move {
        run_sync_loop(sync, period, cancel_clone).await;
    });

    SyncTask { cancel, handle }
}

async fn run_sync_loop(sync: Arc<DirectorySync>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Directory scan service starting, interval {:?}", period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = sync.run_cycle() => match result {
                Ok(report) => debug!("Cycle finished: {:?}", report),
                Err(e) => error!("Error during directory scan or node sync: {:#}", e),
            }
        }
    }

    info!("Directory scan service stopped");
}
