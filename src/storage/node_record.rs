use crate::constants::NODE_LIVENESS_WINDOW_S;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Liveness and load figures of one cluster member, keyed by its canonical URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub url: String,
    #[serde(default)]
    pub available_storage_bytes: u64,
    /// Percentage within 0..=100.
    #[serde(default)]
    pub current_load: u8,
    #[serde(default = "Utc::now")]
    pub last_seen: DateTime<Utc>,
}

pub fn liveness_window() -> Duration {
    Duration::seconds(NODE_LIVENESS_WINDOW_S)
}

impl NodeRecord {
    pub fn new(
        url: String,
        available_storage_bytes: u64,
        current_load: u8,
        last_seen: DateTime<Utc>,
    ) -> Self {
        NodeRecord {
            url,
            available_storage_bytes,
            current_load: current_load.min(100),
            last_seen,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now - self.last_seen <= liveness_window()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_is_clamped() {
        let record = NodeRecord::new("http://a".to_string(), 0, 250, Utc::now());
        assert_eq!(record.current_load, 100);
    }

    #[test]
    fn test_is_active_within_liveness_window() {
        let now = Utc::now();
        let fresh = NodeRecord::new("http://a".to_string(), 0, 0, now - Duration::minutes(14));
        let stale = NodeRecord::new("http://b".to_string(), 0, 0, now - Duration::minutes(16));
        assert!(fresh.is_active_at(now));
        assert!(!stale.is_active_at(now));
    }
}
