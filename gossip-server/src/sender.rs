//! Per-endpoint sender task.
//!
//! A single task drains the endpoint's outbound queue, which serializes
//! frames per connection. It also dials new peers on request, pooling the
//! socket and spawning its receiver. Both failure modes are non-events by
//! design: an unknown identifier means the connection raced away (dropped
//! and logged), and a refused dial leaves the topology as it was — the
//! matching receiver, if any, reports the loss.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use gossip_sdk::wire::Message;

use crate::control::{ConnEvent, SendCmd};
use crate::pool::{Connection, ConnectionPool};
use crate::receiver::Receiver;

pub struct Sender {
    label: &'static str,
    receiver_label: &'static str,
    cmds: mpsc::Receiver<SendCmd>,
    events: mpsc::Sender<ConnEvent>,
    pool: Arc<ConnectionPool>,
}

impl Sender {
    pub fn new(
        label: &'static str,
        receiver_label: &'static str,
        cmds: mpsc::Receiver<SendCmd>,
        events: mpsc::Sender<ConnEvent>,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            label,
            receiver_label,
            cmds,
            events,
            pool,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("{} started", self.label);
        while let Some(cmd) = self.cmds.recv().await {
            match cmd {
                SendCmd::Send { to, message } => self.send_message(to, message).await,
                SendCmd::Establish { to } => self.establish(to).await,
            }
        }
    }

    async fn send_message(&self, to: SocketAddrV4, message: Message) {
        let writer = match self.pool.get(to) {
            Ok(writer) => writer,
            Err(err) => {
                tracing::warn!("{}: dropping outbound message, {err}", self.label);
                return;
            }
        };
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("{}: cannot encode message for {to}: {err}", self.label);
                return;
            }
        };

        let mut writer = writer.lock().await;
        if let Err(err) = writer.write_all(&frame).await {
            drop(writer);
            tracing::warn!(peer = %to, "{}: write failed, removing connection: {err}", self.label);
            if let Some(connection) = self.pool.remove(to) {
                connection.close();
            }
        } else {
            tracing::debug!(peer = %to, code = message.code(), "{} sent message", self.label);
        }
    }

    async fn establish(&self, to: SocketAddrV4) {
        tracing::debug!(peer = %to, "{} establishing connection", self.label);
        let stream = match TcpStream::connect(SocketAddr::V4(to)).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(peer = %to, "{}: cannot establish connection: {err}", self.label);
                return;
            }
        };

        let (reader, writer) = stream.into_split();
        // We dialed the peer's listening address, so it doubles as the
        // server identifier.
        let connection = Connection::with_server_identifier(writer, to);
        let cancel = connection.cancel_token();
        if !self.pool.add(to, connection) {
            tracing::debug!(peer = %to, "{}: already connected, dropping duplicate socket", self.label);
            return;
        }
        Receiver::spawn(
            self.receiver_label,
            to,
            reader,
            cancel,
            self.events.clone(),
            self.pool.clone(),
        );
    }
}
