//! TCP accept loop for one endpoint.
//!
//! Accepted sockets are pooled under the remote's ephemeral endpoint; the
//! peer's listening address, if it has one, is only learned later from a
//! PEER_REQUEST or PEER_INIT. IPv4 only, like the rest of the wire.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::mpsc;

use crate::control::ConnEvent;
use crate::pool::{Connection, ConnectionPool};
use crate::receiver::Receiver;

/// Bind a listener with address reuse.
pub fn bind(addr: SocketAddrV4) -> io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::V4(addr))?;
    socket.listen(1024)
}

pub struct Acceptor {
    label: &'static str,
    receiver_label: &'static str,
    listener: TcpListener,
    events: mpsc::Sender<ConnEvent>,
    pool: Arc<ConnectionPool>,
}

impl Acceptor {
    pub fn new(
        label: &'static str,
        receiver_label: &'static str,
        listener: TcpListener,
        events: mpsc::Sender<ConnEvent>,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            label,
            receiver_label,
            listener,
            events,
            pool,
        }
    }

    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!(%addr, "{} listening", self.label),
            Err(err) => tracing::warn!("{}: no local address: {err}", self.label),
        }

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!("{}: accept failed: {err}", self.label);
                    continue;
                }
            };
            let SocketAddr::V4(peer) = addr else {
                tracing::warn!(%addr, "{}: rejecting non-IPv4 peer", self.label);
                continue;
            };

            let (reader, writer) = stream.into_split();
            let connection = Connection::new(writer);
            let cancel = connection.cancel_token();
            if !self.pool.add(peer, connection) {
                continue;
            }
            tracing::debug!(peer = %peer, "{} accepted connection", self.label);
            Receiver::spawn(
                self.receiver_label,
                peer,
                reader,
                cancel,
                self.events.clone(),
                self.pool.clone(),
            );
        }
    }
}
