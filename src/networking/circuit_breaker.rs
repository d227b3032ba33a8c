use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Breaker state of one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls proceed. Counts failures in a row.
    Closed { consecutive_failures: u32 },
    /// Calls are refused until the cooldown has elapsed.
    Open { since: Instant },
    /// One trial call is let through. Its outcome closes or reopens the circuit.
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed {
            consecutive_failures: 0,
        }
    }
}

///
/// Per-peer circuit breaker for the sync HTTP calls.
///
/// After `failure_threshold` failures in a row the peer's circuit opens and calls to it are
/// skipped for `cooldown`. The first call after the cooldown is a trial.
///
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    states: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    ///
    /// Whether a call to `peer` may proceed now. Moves an open circuit whose cooldown has elapsed
    /// to half-open.
    ///
    pub async fn allow(&self, peer: &str) -> bool {
        let mut states = self.states.lock().await;
        let state = states.entry(peer.to_string()).or_default();
        match *state {
            CircuitState::Closed { .. } | CircuitState::HalfOpen => true,
            CircuitState::Open { since } => {
                if since.elapsed() >= self.cooldown {
                    *state = CircuitState::HalfOpen;
                    info!("Circuit for {} half-open, probing", peer);
                    true
                } else {
                    debug!(
                        "Circuit for {} open, {:?} of cooldown left",
                        peer,
                        self.cooldown.saturating_sub(since.elapsed())
                    );
                    false
                }
            }
        }
    }

    pub async fn record_success(&self, peer: &str) {
        let mut states = self.states.lock().await;
        let previous = states.insert(peer.to_string(), CircuitState::default());
        if matches!(
            previous,
            Some(CircuitState::HalfOpen) | Some(CircuitState::Open { .. })
        ) {
            info!("Circuit for {} closed", peer);
        }
    }

    pub async fn record_failure(&self, peer: &str) {
        let mut states = self.states.lock().await;
        let state = states.entry(peer.to_string()).or_default();
        match *state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    *state = CircuitState::Open {
                        since: Instant::now(),
                    };
                    warn!(
                        "Circuit for {} opened after {} consecutive failures, pausing for {:?}",
                        peer, failures, self.cooldown
                    );
                } else {
                    *state = CircuitState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open {
                    since: Instant::now(),
                };
                warn!("Probe to {} failed, circuit reopened", peer);
            }
            CircuitState::Open { .. } => {}
        }
    }

    pub async fn state(&self, peer: &str) -> CircuitState {
        self.states
            .lock()
            .await
            .get(peer)
            .copied()
            .unwrap_or_default()
    }
}
