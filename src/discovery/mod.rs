pub mod dns;

use crate::core::identity::NodeIdentity;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    #[error("Unable to resolve '{domain}': {reason}")]
    ResolutionFailed { domain: String, reason: String },
}

///
/// Turns the rendezvous domain into the addresses bound to it.
///
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, DiscoveryError>;
}

///
/// Source of the UDP addresses an existence query fans out to.
///
#[async_trait]
pub trait PeerSource: Send + Sync {
    async fn peer_addresses(&self) -> Vec<SocketAddr>;
}

/// Fixed address list, used when no rendezvous domain is configured and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPeers(pub Vec<SocketAddr>);

#[async_trait]
impl PeerSource for StaticPeers {
    async fn peer_addresses(&self) -> Vec<SocketAddr> {
        self.0.clone()
    }
}

///
/// Peers found through DNS, reached on the cluster-wide UDP port.
///
/// Addresses bound to this host's own interfaces are left out.
///
pub struct DiscoveredPeers {
    discovery: Arc<dns::PeerDiscovery>,
    udp_port: u16,
    identity: Arc<NodeIdentity>,
}

impl DiscoveredPeers {
    pub fn new(discovery: Arc<dns::PeerDiscovery>, udp_port: u16, identity: Arc<NodeIdentity>) -> Self {
        DiscoveredPeers {
            discovery,
            udp_port,
            identity,
        }
    }
}

#[async_trait]
impl PeerSource for DiscoveredPeers {
    async fn peer_addresses(&self) -> Vec<SocketAddr> {
        self.discovery
            .resolve_peers()
            .await
            .into_iter()
            .filter(|ip| !self.identity.is_local_address(ip))
            .map(|ip| SocketAddr::new(ip, self.udp_port))
            .collect()
    }
}
