use super::{DiscoveryError, NameResolver};
use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioResolver;
use log::{debug, info, warn};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::sync::Mutex;
use tokio::time::Instant;

///
/// DNS resolution through hickory.
///
/// Follows at most one CNAME, then gathers the A and AAAA records of the target. When neither
/// exists the system resolver gets a chance through `lookup_host`.
///
pub struct HickoryResolver {
    resolver: TokioResolver,
}

impl HickoryResolver {
    pub fn from_system_config() -> Self {
        let resolver = match TokioResolver::builder_tokio() {
            Ok(builder) => builder.build(),
            Err(e) => {
                warn!("Unable to read system DNS configuration, using defaults: {}", e);
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            }
        };
        HickoryResolver { resolver }
    }

    async fn follow_alias(&self, domain: &str) -> String {
        match self.resolver.lookup(domain, RecordType::CNAME).await {
            Ok(lookup) => lookup
                .iter()
                .find_map(|rdata| match rdata {
                    RData::CNAME(cname) => Some(cname.0.to_utf8()),
                    _ => None,
                })
                .unwrap_or_else(|| domain.to_string()),
            Err(_) => domain.to_string(),
        }
    }

    async fn system_lookup(domain: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
        // Port is irrelevant, lookup_host only needs one.
        let addrs = lookup_host((domain, 0))
            .await
            .map_err(|e| DiscoveryError::ResolutionFailed {
                domain: domain.to_string(),
                reason: e.to_string(),
            })?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

#[async_trait]
impl NameResolver for HickoryResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
        let target = self.follow_alias(domain).await;
        if target != domain {
            debug!("{} is an alias of {}", domain, target);
        }

        let mut addresses: Vec<IpAddr> = Vec::new();
        if let Ok(lookup) = self.resolver.ipv4_lookup(target.as_str()).await {
            addresses.extend(lookup.iter().map(|a| IpAddr::V4(a.0)));
        }
        if let Ok(lookup) = self.resolver.ipv6_lookup(target.as_str()).await {
            addresses.extend(lookup.iter().map(|aaaa| IpAddr::V6(aaaa.0)));
        }

        if addresses.is_empty() {
            addresses = Self::system_lookup(&target).await?;
        }
        Ok(addresses)
    }
}

struct CachedPeers {
    addresses: Vec<IpAddr>,
    resolved_at: Instant,
}

///
/// Rendezvous-domain resolution with a TTL cache.
///
/// A failed lookup never clears the cache, callers keep receiving the last good answer.
///
pub struct PeerDiscovery {
    domain: Option<String>,
    ttl: Duration,
    resolver: Arc<dyn NameResolver>,
    cache: Mutex<Option<CachedPeers>>,
}

impl PeerDiscovery {
    pub fn new(domain: Option<String>, ttl: Duration, resolver: Arc<dyn NameResolver>) -> Self {
        PeerDiscovery {
            domain: domain.filter(|d| !d.trim().is_empty()),
            ttl,
            resolver,
            cache: Mutex::new(None),
        }
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    ///
    /// Current peer addresses, distinct and in resolver order.
    ///
    /// The cache lock is held across the lookup so concurrent callers share one round-trip.
    ///
    pub async fn resolve_peers(&self) -> Vec<IpAddr> {
        let Some(domain) = &self.domain else {
            return Vec::new();
        };

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.resolved_at.elapsed() < self.ttl {
                return cached.addresses.clone();
            }
        }

        match self.resolver.resolve(domain).await {
            Ok(resolved) => {
                let mut addresses: Vec<IpAddr> = Vec::with_capacity(resolved.len());
                for address in resolved {
                    if !addresses.contains(&address) {
                        addresses.push(address);
                    }
                }
                info!("Resolved {} to {} peer(s)", domain, addresses.len());
                *cache = Some(CachedPeers {
                    addresses: addresses.clone(),
                    resolved_at: Instant::now(),
                });
                addresses
            }
            Err(e) => {
                let fallback = cache
                    .as_ref()
                    .map(|cached| cached.addresses.clone())
                    .unwrap_or_default();
                warn!("{}, keeping {} cached peer(s)", e, fallback.len());
                fallback
            }
        }
    }

    /// Last resolved addresses without triggering a lookup.
    pub async fn cached_peers(&self) -> Vec<IpAddr> {
        self.cache
            .lock()
            .await
            .as_ref()
            .map(|cached| cached.addresses.clone())
            .unwrap_or_default()
    }
}
