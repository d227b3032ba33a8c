// This module contains all the constants that affect the behavior of the cluster.

/// # Peer liveness window.
/// A node that has not been seen for longer than this is considered stale and is evicted from the
/// node registry during cleanup, together with every reference to it in the content registry.
pub const NODE_LIVENESS_WINDOW_S: i64 = 15 * 60; // 15 min

/// How long a resolved peer set is reused before DNS is asked again.
pub const DEFAULT_DNS_CACHE_TTL_S: u64 = 300; // 5 min

/// Default wait window of an existence query.
pub const DEFAULT_EXISTENCE_QUERY_TIMEOUT_S: u64 = 300; // 5 min

/// Default interval between two scan/sync/cleanup cycles.
pub const DEFAULT_DIRECTORY_SCAN_INTERVAL_S: u64 = 600; // 10 min

pub const DEFAULT_UDP_PORT: u16 = 9050;
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Nodes at or above this load redirect instead of serving.
pub const DEFAULT_MAX_LOAD_PERCENTAGE: u8 = 80;

pub const DEFAULT_MAX_STORAGE_CAPACITY_BYTES: u64 = 10 * 1024 * 1024 * 1024; // 10 GB

pub const HTTP_TIMEOUT_MILLISECONDS: u64 = 10_000;

/// # Peer sync resilience.
/// * A failed call is retried up to `SYNC_MAX_RETRIES` times, waiting `base * 2^attempt`.
/// * After `BREAKER_FAILURE_THRESHOLD` consecutive failures the peer is skipped for
///   `BREAKER_COOLDOWN_S` seconds.
pub const SYNC_MAX_RETRIES: u32 = 3;
pub const RETRY_BASE_DELAY_MILLISECONDS: u64 = 1000;
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const BREAKER_COOLDOWN_S: u64 = 30;

/// Number of files hashed concurrently during a directory scan.
pub const HASH_WORKER_COUNT: usize = 4;

/// Number of peers synchronized concurrently.
pub const PEER_SYNC_CONCURRENCY: usize = 4;

/// Read buffer used while hashing files.
pub const HASH_READ_BUFFER_SIZE: usize = 80 * 1024;

/// Existence messages are tiny; anything larger than this is not ours.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Number of status snapshots kept in memory.
pub const STATUS_HISTORY_CAPACITY: usize = 100;
