use crate::core::identity::{canonical_url, IdentityError};
use crate::networking::circuit_breaker::CircuitBreaker;
use crate::storage::file_record::FileRecord;
use crate::storage::node_record::NodeRecord;
use log::warn;
use rand::Rng;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub const NODE_INFO_PATH: &str = "/api/node/info";
pub const NODE_FILES_PATH: &str = "/api/node/files";
pub const NODE_SYNC_PATH: &str = "/api/node/sync";
pub const NODE_HEARTBEAT_PATH: &str = "/api/node/heartbeat";

#[derive(Error, Debug)]
pub enum PeerSyncError {
    #[error("Circuit open for {0}, call skipped")]
    CircuitOpen(String),
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: StatusCode },
    #[error("Invalid response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error(transparent)]
    InvalidUrl(#[from] IdentityError),
}

impl PeerSyncError {
    /// Failures worth another attempt: transport errors and server-side statuses.
    pub fn is_transient(&self) -> bool {
        match self {
            PeerSyncError::Transport { .. } => true,
            PeerSyncError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Retry settings of the peer HTTP calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    ///
    /// Delay before retry number `retry` (1-based): `base * 2^retry`, plus up to a tenth of it as
    /// random jitter.
    ///
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        let delay = self.base_delay.saturating_mul(factor);
        let jitter_ceiling = (delay.as_millis() as u64) / 10;
        let jitter = if jitter_ceiling > 0 {
            rand::rng().random_range(0..=jitter_ceiling)
        } else {
            0
        };
        delay + Duration::from_millis(jitter)
    }
}

///
/// HTTP client for the peer sync endpoints.
///
/// Every call goes through the same retry loop and the per-peer circuit breaker. Each failed
/// attempt counts towards the breaker, once it opens the remaining retries are abandoned.
///
pub struct PeerClient {
    client: Client,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl PeerClient {
    pub fn new(
        timeout: Duration,
        retry: RetryPolicy,
        breaker: CircuitBreaker,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(PeerClient {
            client,
            retry,
            breaker,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn fetch_node_info(&self, peer: &str) -> Result<NodeRecord, PeerSyncError> {
        let url = endpoint(peer, NODE_INFO_PATH)?;
        let url = url.as_str();
        self.execute(peer, || async move {
            decode_json(url, self.send(url, self.client.get(url)).await?).await
        })
        .await
    }

    ///
    /// Fetches the peer's locally stored records.
    ///
    /// Entries that do not parse as a `FileRecord` are logged and skipped, they never fail the
    /// whole batch.
    ///
    pub async fn fetch_files(&self, peer: &str) -> Result<Vec<FileRecord>, PeerSyncError> {
        let url = endpoint(peer, NODE_FILES_PATH)?;
        let url = url.as_str();
        let entries: Vec<serde_json::Value> = self
            .execute(peer, || async move {
                decode_json(url, self.send(url, self.client.get(url)).await?).await
            })
            .await?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<FileRecord>(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping malformed file record from {}: {}", peer, e);
                    None
                }
            })
            .collect())
    }

    pub async fn send_heartbeat(&self, peer: &str, record: &NodeRecord) -> Result<(), PeerSyncError> {
        let url = endpoint(peer, NODE_HEARTBEAT_PATH)?;
        let url = url.as_str();
        self.execute(peer, || async move {
            self.send(url, self.client.post(url).json(record))
                .await
                .map(|_| ())
        })
        .await
    }

    pub async fn push_files(&self, peer: &str, files: &[FileRecord]) -> Result<(), PeerSyncError> {
        let url = endpoint(peer, NODE_SYNC_PATH)?;
        let url = url.as_str();
        self.execute(peer, || async move {
            self.send(url, self.client.post(url).json(files))
                .await
                .map(|_| ())
        })
        .await
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, PeerSyncError> {
        let response = request.send().await.map_err(|source| PeerSyncError::Transport {
            url: url.to_string(),
            source,
        })?;
        if !response.status().is_success() {
            return Err(PeerSyncError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        Ok(response)
    }

    async fn execute<T, F, Fut>(&self, peer: &str, operation: F) -> Result<T, PeerSyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, PeerSyncError>>,
    {
        let mut retry = 0;
        loop {
            if !self.breaker.allow(peer).await {
                return Err(PeerSyncError::CircuitOpen(peer.to_string()));
            }

            match operation().await {
                Ok(value) => {
                    self.breaker.record_success(peer).await;
                    return Ok(value);
                }
                Err(e) => {
                    self.breaker.record_failure(peer).await;
                    if !e.is_transient() || retry >= self.retry.max_retries {
                        return Err(e);
                    }
                    retry += 1;
                    let delay = self.retry.delay_for(retry);
                    warn!(
                        "Error while syncing with {} (attempt {}): {}, retrying in {:?}",
                        peer, retry, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn endpoint(peer: &str, path: &str) -> Result<String, PeerSyncError> {
    Ok(format!("{}{}", canonical_url(peer)?, path))
}

async fn decode_json<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, PeerSyncError> {
    response
        .json::<T>()
        .await
        .map_err(|e| PeerSyncError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
}
