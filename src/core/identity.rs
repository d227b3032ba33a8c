use reqwest::Url;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum IdentityError {
    #[error("Invalid node URL '{0}'")]
    InvalidUrl(String),
    #[error("Unsupported scheme in node URL '{0}', expected http or https")]
    UnsupportedScheme(String),
}

///
/// Reduces a node URL to `scheme://host[:port]`.
///
/// Host is lower-cased, default ports and any path, query or trailing slash are dropped, so the
/// same node always maps to the same registry key.
///
pub fn canonical_url(raw: &str) -> Result<String, IdentityError> {
    let url = Url::parse(raw.trim()).map_err(|_| IdentityError::InvalidUrl(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        _ => return Err(IdentityError::UnsupportedScheme(raw.to_string())),
    }
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| IdentityError::InvalidUrl(raw.to_string()))?;

    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

///
/// Immutable identity of this node, established once at startup.
///
/// "Is this me?" questions are answered by comparing canonical URLs by value.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    url: String,
    local_addresses: Vec<IpAddr>,
}

impl NodeIdentity {
    pub fn new(public_url: &str, local_addresses: Vec<IpAddr>) -> Result<Self, IdentityError> {
        Ok(NodeIdentity {
            url: canonical_url(public_url)?,
            local_addresses,
        })
    }

    ///
    /// Builds the identity from the configured URL and the addresses bound to local interfaces.
    ///
    pub fn detect(public_url: &str) -> Result<Self, IdentityError> {
        let local_addresses = match get_if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces.iter().map(|iface| iface.ip()).collect(),
            Err(e) => {
                log::warn!("Unable to enumerate local interfaces: {}", e);
                Vec::new()
            }
        };
        Self::new(public_url, local_addresses)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn local_addresses(&self) -> &[IpAddr] {
        &self.local_addresses
    }

    /// True when `url` names this node. Unparseable URLs never do.
    pub fn is_self(&self, url: &str) -> bool {
        canonical_url(url).is_ok_and(|canonical| canonical == self.url)
    }

    pub fn is_local_address(&self, address: &IpAddr) -> bool {
        self.local_addresses.contains(address)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
