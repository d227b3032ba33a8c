use crate::cache::Cache;
use crate::config::Config;
use crate::core::hash::ContentHash;
use crate::core::identity::{canonical_url, NodeIdentity};
use crate::core::status::{collect_status, ClusterStatus, StatusHistory, StatusHistoryEntry};
use crate::discovery::dns::{HickoryResolver, PeerDiscovery};
use crate::discovery::{DiscoveredPeers, NameResolver, PeerSource};
use crate::networking::existence_service::ExistenceService;
use crate::networking::message_dispatcher::MessageDispatcher;
use crate::routing::content_router::{ContentRouter, RouteDecision};
use crate::storage::file_manager::content_type_for;
use crate::storage::file_record::FileRecord;
use crate::storage::node_record::NodeRecord;
use crate::storage::registry::{MergeSummary, Registry};
use crate::storage::storage_manager::StorageManager;
use crate::sync::directory_sync::{spawn_directory_sync, DirectorySync, SyncTask};
use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

///
/// Everything one cluster member owns: identity, registries, storage, the UDP service, the
/// sync cycle and the router.
///
/// Built once at startup and shared as `Arc<Node>` with the HTTP handlers and background tasks.
///
pub struct Node {
    config: Config,
    identity: Arc<NodeIdentity>,
    registry: Arc<Registry>,
    storage: Arc<StorageManager>,
    discovery: Arc<PeerDiscovery>,
    existence: Arc<ExistenceService>,
    directory_sync: Arc<DirectorySync>,
    router: ContentRouter,
    status_history: StatusHistory,
    shutdown: CancellationToken,
}

///
/// Assembles a `Node`. Every collaborator has a production default, tests swap in their own.
///
pub struct NodeBuilder {
    config: Config,
    resolver: Option<Arc<dyn NameResolver>>,
    peer_source: Option<Arc<dyn PeerSource>>,
    local_addresses: Option<Vec<IpAddr>>,
    udp_bind: Option<SocketAddr>,
    shutdown: Option<CancellationToken>,
}

impl NodeBuilder {
    pub fn new(config: Config) -> Self {
        NodeBuilder {
            config,
            resolver: None,
            peer_source: None,
            local_addresses: None,
            udp_bind: None,
            shutdown: None,
        }
    }

    pub fn resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn peer_source(mut self, peer_source: Arc<dyn PeerSource>) -> Self {
        self.peer_source = Some(peer_source);
        self
    }

    /// Skips interface detection.
    pub fn local_addresses(mut self, local_addresses: Vec<IpAddr>) -> Self {
        self.local_addresses = Some(local_addresses);
        self
    }

    /// Overrides `0.0.0.0:{udp_port}`.
    pub fn udp_bind(mut self, address: SocketAddr) -> Self {
        self.udp_bind = Some(address);
        self
    }

    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub async fn build(self) -> Result<Arc<Node>> {
        let config = self.config;
        config.validate()?;

        let identity = Arc::new(match self.local_addresses {
            Some(addresses) => NodeIdentity::new(&config.public_url, addresses)?,
            None => NodeIdentity::detect(&config.public_url)?,
        });
        info!("Node identity: {}", identity);

        let registry = Arc::new(match &config.cache_file_path {
            Some(path) if path.exists() => load_registry(path),
            _ => Registry::new(),
        });

        let storage = Arc::new(StorageManager::new(
            config.storage_path.clone(),
            config.max_storage_capacity_bytes,
        ));
        storage
            .ensure_root()
            .await
            .with_context(|| format!("Unable to create {}", config.storage_path.display()))?;

        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(HickoryResolver::from_system_config()));
        let discovery = Arc::new(PeerDiscovery::new(
            config.main_domain.clone(),
            config.dns_cache_ttl(),
            resolver,
        ));

        let shutdown = self.shutdown.unwrap_or_default();
        let udp_bind = self
            .udp_bind
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.udp_port)));
        let dispatcher = MessageDispatcher::bind(udp_bind)
            .await
            .with_context(|| format!("Unable to bind UDP socket on {}", udp_bind))?;

        let peer_source = self.peer_source.unwrap_or_else(|| {
            Arc::new(DiscoveredPeers::new(
                discovery.clone(),
                config.udp_port,
                identity.clone(),
            ))
        });
        let existence = Arc::new(ExistenceService::new(
            dispatcher,
            peer_source,
            registry.clone(),
            shutdown.clone(),
        ));

        let directory_sync = Arc::new(DirectorySync::new(
            &config,
            identity.clone(),
            registry.clone(),
            storage.clone(),
            discovery.clone(),
        )?);

        let router = ContentRouter::new(
            identity.clone(),
            registry.clone(),
            storage.clone(),
            config.max_load_percentage,
        );

        Ok(Arc::new(Node {
            config,
            identity,
            registry,
            storage,
            discovery,
            existence,
            directory_sync,
            router,
            status_history: StatusHistory::default(),
            shutdown,
        }))
    }
}

fn load_registry(path: &Path) -> Registry {
    match Cache::parse_from_file(path) {
        Ok(cache) => {
            info!(
                "Loaded {} file record(s) and {} node record(s) from {}",
                cache.files.len(),
                cache.nodes.len(),
                path.display()
            );
            Registry::from_cache(cache)
        }
        Err(e) => {
            warn!("Ignoring registry snapshot: {:#}", e);
            Registry::new()
        }
    }
}

impl Node {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn existence(&self) -> &Arc<ExistenceService> {
        &self.existence
    }

    pub fn directory_sync(&self) -> &Arc<DirectorySync> {
        &self.directory_sync
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn udp_addr(&self) -> std::io::Result<SocketAddr> {
        self.existence.local_addr()
    }

    /// Starts answering and collecting existence datagrams.
    pub fn start_listening(&self) -> JoinHandle<()> {
        self.existence.start_listening()
    }

    pub fn start_directory_sync(&self) -> SyncTask {
        spawn_directory_sync(
            self.directory_sync.clone(),
            self.config.directory_scan_interval(),
            &self.shutdown,
        )
    }

    pub async fn route(&self, hash: &ContentHash) -> RouteDecision {
        self.router.route(hash).await
    }

    /// Existence query with the configured wait window.
    pub async fn locate(&self, hash: ContentHash) -> Vec<SocketAddr> {
        self.existence
            .query_existence(hash, self.config.existence_query_timeout())
            .await
    }

    pub fn node_info(&self) -> NodeRecord {
        self.directory_sync.measure_self()
    }

    ///
    /// Records a heartbeat pushed by a peer. The peer is stored under its canonical URL with
    /// `last_seen` set to now. Heartbeats claiming to come from this node are ignored.
    ///
    pub async fn accept_heartbeat(&self, record: NodeRecord) -> Result<()> {
        let url = canonical_url(&record.url)?;
        if self.identity.is_self(&url) {
            return Ok(());
        }
        self.registry
            .upsert_node(NodeRecord::new(
                url,
                record.available_storage_bytes,
                record.current_load,
                Utc::now(),
            ))
            .await;
        Ok(())
    }

    /// Union-merges a batch pushed by a peer.
    pub async fn accept_files(&self, files: Vec<FileRecord>) -> MergeSummary {
        let summary = self.registry.merge_remote_files(files).await;
        info!(
            "Merged pushed batch: {} new, {} updated",
            summary.inserted, summary.updated
        );
        summary
    }

    ///
    /// Stores an uploaded file under `name` and registers it right away, without waiting for the
    /// next scan.
    ///
    pub async fn store_file(&self, name: &str, data: &[u8]) -> Result<FileRecord> {
        let path = self.storage.save_file(name, data).await?;
        let relative_path = self
            .storage
            .relative_path(&path)
            .unwrap_or_else(|| name.to_string());
        let file_name = path
            .file_name()
            .map(|file_name| file_name.to_string_lossy().into_owned())
            .unwrap_or_else(|| relative_path.clone());

        let record = FileRecord::new_local(
            ContentHash::from_input(data),
            file_name,
            content_type_for(&path),
            data.len() as u64,
            relative_path,
            self.identity.url(),
        );
        let replaced = self
            .registry
            .release_local_path(&record.local_path, &record.hash, self.identity.url())
            .await;
        for hash in replaced {
            info!("{} replaced {} at {}", record.hash, hash, record.local_path);
        }
        self.registry
            .register_local_file(record.clone(), self.identity.url())
            .await;
        info!("Stored {} as {}", record.name, record.hash);

        match self.registry.get_file(&record.hash).await {
            Some(stored) => Ok(stored),
            None => Ok(record),
        }
    }

    /// Status snapshot, also appended to the bounded history.
    pub async fn status(&self) -> ClusterStatus {
        let status = collect_status(
            &self.identity,
            &self.discovery,
            &self.registry,
            &self.storage,
        )
        .await;
        self.status_history
            .record(StatusHistoryEntry::from(&status))
            .await;
        status
    }

    pub async fn status_history(&self) -> Vec<StatusHistoryEntry> {
        self.status_history.entries().await
    }

    ///
    /// Cancels every background task and writes the final registry snapshot.
    ///
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        self.directory_sync.save_snapshot().await
    }
}
