//! Per-connection receiver task.
//!
//! One receiver per pooled socket, spawned on accept and on outbound
//! connect. It announces itself to the controller, turns frames into typed
//! events, and reports the loss of the connection exactly once. A malformed
//! frame is treated the same as a disconnect: the socket is closed rather
//! than left in an ambiguous state.

use std::net::SocketAddrV4;
use std::sync::Arc;

use gossip_sdk::wire;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::control::ConnEvent;
use crate::pool::ConnectionPool;

pub struct Receiver {
    label: &'static str,
    identifier: SocketAddrV4,
    reader: OwnedReadHalf,
    cancel: CancellationToken,
    events: mpsc::Sender<ConnEvent>,
    pool: Arc<ConnectionPool>,
}

impl Receiver {
    pub fn spawn(
        label: &'static str,
        identifier: SocketAddrV4,
        reader: OwnedReadHalf,
        cancel: CancellationToken,
        events: mpsc::Sender<ConnEvent>,
        pool: Arc<ConnectionPool>,
    ) -> JoinHandle<()> {
        let receiver = Self {
            label,
            identifier,
            reader,
            cancel,
            events,
            pool,
        };
        tokio::spawn(receiver.run())
    }

    async fn run(mut self) {
        tracing::debug!(peer = %self.identifier, "{} started", self.label);
        if self
            .events
            .send(ConnEvent::NewConnection(self.identifier))
            .await
            .is_err()
        {
            return;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(peer = %self.identifier, "{} stopped, connection evicted", self.label);
                    break;
                }
                frame = wire::read_frame(&mut self.reader) => match frame {
                    Ok(message) => {
                        tracing::debug!(
                            peer = %self.identifier,
                            code = message.code(),
                            "{} received message",
                            self.label
                        );
                        let event = ConnEvent::Received {
                            from: self.identifier,
                            message,
                        };
                        if self.events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(peer = %self.identifier, "{} lost connection: {err}", self.label);
                        break;
                    }
                }
            }
        }

        // Close our half if eviction hasn't already; either way the
        // controller hears about the loss exactly once, from here.
        if let Some(connection) = self.pool.remove(self.identifier) {
            connection.close();
        }
        let _ = self
            .events
            .send(ConnEvent::ConnectionLost(self.identifier))
            .await;
    }
}
