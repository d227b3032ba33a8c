use crate::constants::MAX_DATAGRAM_SIZE;
use crate::core::hash::ContentHash;
use crate::core::incoming_request_handler::handle_file_query;
use crate::discovery::PeerSource;
use crate::networking::message_dispatcher::MessageDispatcher;
use crate::networking::messages::{ExistenceMessage, FileQuery};
use crate::networking::request_map::QueryMap;
use crate::storage::registry::Registry;
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

///
/// Both ends of the UDP existence protocol on one shared socket.
///
/// The receive loop answers queries from peers and feeds responses into the in-flight query map.
/// `query_existence` is the initiating side.
///
pub struct ExistenceService {
    dispatcher: MessageDispatcher,
    queries: QueryMap,
    peers: Arc<dyn PeerSource>,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
}

impl ExistenceService {
    pub fn new(
        dispatcher: MessageDispatcher,
        peers: Arc<dyn PeerSource>,
        registry: Arc<Registry>,
        shutdown: CancellationToken,
    ) -> Self {
        ExistenceService {
            dispatcher,
            queries: QueryMap::new(),
            peers,
            registry,
            shutdown,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.dispatcher.local_addr()
    }

    pub fn in_flight_queries(&self) -> usize {
        self.queries.len()
    }

    ///
    /// Spawns the receive loop. It runs until the shutdown token is cancelled.
    ///
    pub fn start_listening(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.receive_loop().await })
    }

    async fn receive_loop(self: Arc<Self>) {
        let socket = self.dispatcher.socket();
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        info!("Listening for existence queries on {:?}", socket.local_addr());

        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = socket.recv_from(&mut buffer) => received,
            };

            match received {
                Ok((len, sender)) => self.handle_datagram(&buffer[..len], sender),
                // ICMP port unreachable from an earlier send surfaces here on some platforms.
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
                Err(e) => error!("Error receiving UDP message: {}", e),
            }
        }

        info!("Existence query listener stopped");
    }

    fn handle_datagram(&self, bytes: &[u8], sender: SocketAddr) {
        let message = match ExistenceMessage::from_bytes(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!("Invalid message format from {}: {}", sender, e);
                return;
            }
        };
        debug!("Received {} from {}", message, sender);

        match message {
            ExistenceMessage::Query(query) => {
                tokio::spawn(handle_file_query(
                    query,
                    sender,
                    self.registry.clone(),
                    self.dispatcher.clone(),
                ));
            }
            ExistenceMessage::Response(response) => {
                if !response.exists {
                    return;
                }
                if !self
                    .queries
                    .record_response(&response.file_hash, response.query_id, sender)
                {
                    debug!(
                        "Dropped response for {} from {}, no matching query in flight",
                        response.file_hash, sender
                    );
                }
            }
        }
    }

    ///
    /// Asks every known peer whether it stores `hash` and collects the affirmative answers.
    ///
    /// Returns after `timeout` at the latest, or earlier with the partial result on shutdown.
    /// Only peers that answered `exists` for this query are included.
    ///
    pub async fn query_existence(&self, hash: ContentHash, timeout: Duration) -> Vec<SocketAddr> {
        let deadline = Instant::now() + timeout;
        let guard = self.queries.register(hash);
        let message = ExistenceMessage::Query(FileQuery {
            file_hash: hash,
            query_id: Some(guard.query_id()),
        });

        let fan_out = async {
            let peers = self.peers.peer_addresses().await;
            debug!("Querying {} peer(s) for {}", peers.len(), hash);
            let sends = peers.iter().map(|peer| {
                let message = &message;
                async move {
                    if let Err(e) = self.dispatcher.send_message(message, *peer).await {
                        warn!("Failed to send query to {}: {}", peer, e);
                    }
                }
            });
            join_all(sends).await;
        };

        tokio::select! {
            _ = self.shutdown.cancelled() => return guard.finish(),
            sent = timeout_at(deadline, fan_out) => {
                if sent.is_err() {
                    warn!("Sending queries for {} did not finish before the deadline", hash);
                }
            }
        }

        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = sleep_until(deadline) => {}
        }

        let responders = guard.finish();
        info!("{} peer(s) reported {}", responders.len(), hash);
        responders
    }
}
