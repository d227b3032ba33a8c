use crate::core::hash::ContentHash;
use crate::networking::messages::QueryId;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug)]
struct InFlightQuery {
    hash: ContentHash,
    responders: BTreeSet<SocketAddr>,
}

///
/// In-flight existence queries, keyed by their query id.
///
/// Shared between the receive loop, which appends responders, and the callers waiting for them.
///
#[derive(Clone, Default)]
pub struct QueryMap {
    map: Arc<DashMap<QueryId, InFlightQuery>>,
}

impl QueryMap {
    pub fn new() -> Self {
        Self::default()
    }

    ///
    /// Registers a collector for `hash` under a fresh id.
    ///
    /// The collector lives as long as the returned guard. Dropping the guard unregisters it, so
    /// late responses are dropped no matter how the waiting call ends.
    ///
    pub fn register(&self, hash: ContentHash) -> QueryGuard {
        let query_id = Uuid::new_v4();
        self.map.insert(
            query_id,
            InFlightQuery {
                hash,
                responders: BTreeSet::new(),
            },
        );
        QueryGuard {
            queries: self.clone(),
            query_id,
        }
    }

    ///
    /// Records a positive answer from `from`.
    ///
    /// A response carrying an id only counts for that query and only if the hash matches.
    /// A response without one is credited to every in-flight query for the hash. Returns whether
    /// any collector accepted it.
    ///
    pub fn record_response(
        &self,
        hash: &ContentHash,
        query_id: Option<QueryId>,
        from: SocketAddr,
    ) -> bool {
        match query_id {
            Some(query_id) => match self.map.get_mut(&query_id) {
                Some(mut query) if query.hash == *hash => {
                    query.responders.insert(from);
                    true
                }
                _ => false,
            },
            None => {
                let mut accepted = false;
                for mut query in self.map.iter_mut() {
                    if query.hash == *hash {
                        query.responders.insert(from);
                        accepted = true;
                    }
                }
                accepted
            }
        }
    }

    pub fn contains(&self, query_id: &QueryId) -> bool {
        self.map.contains_key(query_id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn responders(&self, query_id: &QueryId) -> Vec<SocketAddr> {
        self.map
            .get(query_id)
            .map(|query| query.responders.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Registration handle of one in-flight query.
pub struct QueryGuard {
    queries: QueryMap,
    query_id: QueryId,
}

impl QueryGuard {
    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    /// Responders so far, without unregistering.
    pub fn responders(&self) -> Vec<SocketAddr> {
        self.queries.responders(&self.query_id)
    }

    /// Unregisters the query and returns the distinct responders.
    pub fn finish(self) -> Vec<SocketAddr> {
        self.queries
            .map
            .remove(&self.query_id)
            .map(|(_, query)| query.responders.into_iter().collect())
            .unwrap_or_default()
    }
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        self.queries.map.remove(&self.query_id);
    }
}
