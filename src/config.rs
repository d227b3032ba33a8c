use crate::constants::*;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

///
/// Node configuration. Loaded from a YAML file, every field except `public_url` has a default.
///
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Canonical URL under which peers reach this node, e.g. `http://node-a:5000`.
    pub public_url: String,
    /// Rendezvous domain resolving to all cluster members. No DNS discovery when missing.
    #[serde(default)]
    pub main_domain: Option<String>,
    #[serde(default = "default_http_bind")]
    pub http_bind: SocketAddr,
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    /// HTTP port used when turning DNS-resolved addresses into peer URLs.
    #[serde(default = "default_http_port")]
    pub peer_http_port: u16,
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Registry snapshot location. Registries live only in memory when missing.
    #[serde(default)]
    pub cache_file_path: Option<PathBuf>,
    #[serde(default = "default_max_storage_capacity_bytes")]
    pub max_storage_capacity_bytes: u64,
    #[serde(default = "default_max_load_percentage")]
    pub max_load_percentage: u8,
    #[serde(default)]
    pub seed_peers: Vec<String>,
    #[serde(default = "default_directory_scan_interval_secs")]
    pub directory_scan_interval_secs: u64,
    #[serde(default = "default_existence_query_timeout_secs")]
    pub existence_query_timeout_secs: u64,
    #[serde(default = "default_dns_cache_ttl_secs")]
    pub dns_cache_ttl_secs: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default = "default_sync_max_retries")]
    pub sync_max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
    #[serde(default = "default_hash_parallelism")]
    pub hash_parallelism: usize,
}

fn default_http_bind() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_HTTP_PORT))
}

fn default_udp_port() -> u16 {
    DEFAULT_UDP_PORT
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("Storage")
}

fn default_max_storage_capacity_bytes() -> u64 {
    DEFAULT_MAX_STORAGE_CAPACITY_BYTES
}

fn default_max_load_percentage() -> u8 {
    DEFAULT_MAX_LOAD_PERCENTAGE
}

fn default_directory_scan_interval_secs() -> u64 {
    DEFAULT_DIRECTORY_SCAN_INTERVAL_S
}

fn default_existence_query_timeout_secs() -> u64 {
    DEFAULT_EXISTENCE_QUERY_TIMEOUT_S
}

fn default_dns_cache_ttl_secs() -> u64 {
    DEFAULT_DNS_CACHE_TTL_S
}

fn default_http_timeout_ms() -> u64 {
    HTTP_TIMEOUT_MILLISECONDS
}

fn default_sync_max_retries() -> u32 {
    SYNC_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    RETRY_BASE_DELAY_MILLISECONDS
}

fn default_breaker_failure_threshold() -> u32 {
    BREAKER_FAILURE_THRESHOLD
}

fn default_breaker_cooldown_secs() -> u64 {
    BREAKER_COOLDOWN_S
}

fn default_hash_parallelism() -> usize {
    HASH_WORKER_COUNT
}

impl Config {
    ///
    /// Builds a configuration with every optional field at its default.
    ///
    pub fn new(public_url: impl Into<String>, storage_path: impl Into<PathBuf>) -> Self {
        Config {
            public_url: public_url.into(),
            main_domain: None,
            http_bind: default_http_bind(),
            udp_port: default_udp_port(),
            peer_http_port: default_http_port(),
            storage_path: storage_path.into(),
            cache_file_path: None,
            max_storage_capacity_bytes: default_max_storage_capacity_bytes(),
            max_load_percentage: default_max_load_percentage(),
            seed_peers: Vec::new(),
            directory_scan_interval_secs: default_directory_scan_interval_secs(),
            existence_query_timeout_secs: default_existence_query_timeout_secs(),
            dns_cache_ttl_secs: default_dns_cache_ttl_secs(),
            http_timeout_ms: default_http_timeout_ms(),
            sync_max_retries: default_sync_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            hash_parallelism: default_hash_parallelism(),
        }
    }

    pub fn parse_from_file(file_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(file_path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_load_percentage == 0 || self.max_load_percentage > 100 {
            return Err(ConfigError::Invalid(format!(
                "max_load_percentage must be within 1..=100, got {}",
                self.max_load_percentage
            )));
        }
        if self.max_storage_capacity_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_storage_capacity_bytes must be positive".to_string(),
            ));
        }
        if self.hash_parallelism == 0 {
            return Err(ConfigError::Invalid(
                "hash_parallelism must be positive".to_string(),
            ));
        }
        if self.directory_scan_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "directory_scan_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn directory_scan_interval(&self) -> Duration {
        Duration::from_secs(self.directory_scan_interval_secs)
    }

    pub fn existence_query_timeout(&self) -> Duration {
        Duration::from_secs(self.existence_query_timeout_secs)
    }

    pub fn dns_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.dns_cache_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}
