use crate::networking::message_dispatcher::MessageDispatcher;
use crate::networking::messages::{ExistenceMessage, FileQuery};
use crate::storage::registry::Registry;
use log::{debug, error};
use std::net::SocketAddr;
use std::sync::Arc;

///
/// Answers one existence query with whether the content is stored on this node.
///
/// Runs as its own task, a slow registry read never holds up the receive loop.
///
pub async fn handle_file_query(
    query: FileQuery,
    sender: SocketAddr,
    registry: Arc<Registry>,
    message_dispatcher: MessageDispatcher,
) {
    let exists = registry.has_local_file(&query.file_hash).await;
    let response = ExistenceMessage::Response(query.answer(exists));

    match message_dispatcher.send_message(&response, sender).await {
        Ok(_) => debug!("Sent {} to {}", response, sender),
        Err(e) => error!("Failed to answer query for {} from {}: {}", query.file_hash, sender, e),
    }
}
