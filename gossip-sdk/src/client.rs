//! Async client for the daemon's API endpoint.
//!
//! A local application connects to the API socket, announces payloads into
//! the overlay, subscribes to the data types it cares about, and answers
//! each delivered notification with a validation verdict. Invalid payloads
//! never propagate past the local daemon.
//!
//! The client deliberately implements no reconnection: consumers should
//! reconnect with their own backoff when [`ApiClient::recv`] reports a
//! disconnect.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::wire::{self, Announce, FrameError, Message, Notification, Notify, Validation};

/// A connected API-side client.
pub struct ApiClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl ApiClient {
    /// Connect to a daemon's API socket.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to gossip API at {addr}"))?;
        let (reader, writer) = stream.into_split();
        tracing::debug!(api = %addr, "connected to gossip API");
        Ok(Self { reader, writer })
    }

    /// Send any message on the API socket. This includes
    /// [`Message::Other`] frames with arbitrary codes, which the daemon
    /// treats as fatal for the sending connection.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        wire::write_frame(&mut self.writer, message)
            .await
            .context("sending API message")
    }

    /// Write raw bytes to the socket, bypassing the frame codec entirely.
    /// The daemon will read a garbage header and drop the connection; this
    /// exists for probing that it does so gracefully.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .await
            .context("sending raw bytes")
    }

    /// Announce a payload into the overlay. A `ttl` of 0 floods without a
    /// hop limit.
    pub async fn announce(&mut self, ttl: u8, data_type: u16, data: &[u8]) -> Result<()> {
        self.send(&Message::Announce(Announce {
            ttl,
            data_type,
            data: data.to_vec(),
        }))
        .await
    }

    /// Subscribe to notifications for `data_type`. The daemon immediately
    /// replays its cached announcements for that type.
    pub async fn subscribe(&mut self, data_type: u16) -> Result<()> {
        self.send(&Message::Notify(Notify { data_type })).await
    }

    /// Report a validation verdict for a previously received notification.
    pub async fn validate(&mut self, msg_id: u16, valid: bool) -> Result<()> {
        self.send(&Message::Validation(Validation { msg_id, valid }))
            .await
    }

    /// Receive the next message from the daemon.
    pub async fn recv(&mut self) -> Result<Message, FrameError> {
        wire::read_frame(&mut self.reader).await
    }

    /// Receive the next notification, skipping any other message kinds.
    pub async fn next_notification(&mut self) -> Result<Notification, FrameError> {
        loop {
            match self.recv().await? {
                Message::Notification(notification) => return Ok(notification),
                other => {
                    tracing::debug!(code = other.code(), "ignoring non-notification message");
                }
            }
        }
    }
}
