use crate::networking::messages::ExistenceMessage;
use std::io::{Error, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

///
/// Owns the node's single UDP socket. Sending and receiving share it, `UdpSocket` needs no lock
/// for concurrent `send_to` calls.
///
#[derive(Clone)]
pub struct MessageDispatcher {
    socket: Arc<UdpSocket>,
}

impl MessageDispatcher {
    pub async fn bind(address: SocketAddr) -> Result<Self, Error> {
        let socket = UdpSocket::bind(address).await?;
        Ok(MessageDispatcher {
            socket: Arc::new(socket),
        })
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.socket.local_addr()
    }

    ///
    /// Serializes the message and sends it as one datagram.
    ///
    pub async fn send_message(
        &self,
        message: &ExistenceMessage,
        receiver: SocketAddr,
    ) -> Result<usize, Error> {
        let bytes = message
            .to_bytes()
            .map_err(|e| Error::new(ErrorKind::InvalidData, e.to_string()))?;
        self.socket.send_to(&bytes, receiver).await
    }
}
