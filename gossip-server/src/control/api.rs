//! Controller for the local application (API) endpoint.
//!
//! Locally originated announcements are trusted: they enter the cache
//! already valid and fan out to subscribers and peers immediately. The
//! controller also owns the validation verdicts that gate peer fan-out for
//! announcements learned from the overlay.

use std::net::SocketAddrV4;
use std::sync::Arc;

use gossip_sdk::wire::{Announce, Message, Notification, Notify, Validation};
use tokio::sync::mpsc;

use crate::control::{CachedAnnounce, ConnEvent, SendCmd};
use crate::daemon::SharedState;

pub struct ApiController {
    state: Arc<SharedState>,
    events: mpsc::Receiver<ConnEvent>,
    to_api: mpsc::Sender<SendCmd>,
    to_p2p: mpsc::Sender<SendCmd>,
}

impl ApiController {
    pub fn new(
        state: Arc<SharedState>,
        events: mpsc::Receiver<ConnEvent>,
        to_api: mpsc::Sender<SendCmd>,
        to_p2p: mpsc::Sender<SendCmd>,
    ) -> Self {
        Self {
            state,
            events,
            to_api,
            to_p2p,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("api controller started");
        while let Some(event) = self.events.recv().await {
            match event {
                // API clients need no greeting; they just start talking.
                ConnEvent::NewConnection(_) => {}
                ConnEvent::Received { from, message } => self.handle_message(from, message).await,
                ConnEvent::ConnectionLost(identifier) => {
                    tracing::debug!(peer = %identifier, "lost an API connection");
                    self.state.registry.unregister(identifier);
                }
            }
        }
    }

    async fn handle_message(&mut self, from: SocketAddrV4, message: Message) {
        match message {
            Message::Announce(announce) => self.handle_announce(from, announce).await,
            Message::Notify(notify) => self.handle_notify(from, notify).await,
            Message::Validation(validation) => self.handle_validation(validation).await,
            other => {
                tracing::debug!(code = other.code(), "discarding API message");
            }
        }
    }

    async fn handle_announce(&self, from: SocketAddrV4, announce: Announce) {
        let cached = CachedAnnounce::local(announce.clone());
        let Some(msg_id) = self.state.announces.add(cached, true) else {
            tracing::info!("discarding announce, already known");
            return;
        };
        tracing::info!(msg_id, data_type = announce.data_type, "spreading local announce");

        let notification = Message::Notification(Notification {
            msg_id,
            data_type: announce.data_type,
            data: announce.data.clone(),
        });
        for subscriber in self.state.registry.registrations(announce.data_type) {
            if subscriber == from {
                continue;
            }
            self.send_api(SendCmd::Send {
                to: subscriber,
                message: notification.clone(),
            })
            .await;
        }

        for peer in self.state.p2p_pool.identifiers() {
            self.send_p2p(SendCmd::Send {
                to: peer,
                message: Message::Announce(announce.clone()),
            })
            .await;
        }
    }

    async fn handle_notify(&self, from: SocketAddrV4, notify: Notify) {
        self.state.registry.register(notify.data_type, from);

        // The new subscriber catches up on everything cached for the data
        // types it is registered for.
        for cached in self.state.announces.entries() {
            let data_type = cached.message.announce.data_type;
            if !self
                .state
                .registry
                .registrations(data_type)
                .contains(&from)
            {
                continue;
            }
            self.send_api(SendCmd::Send {
                to: from,
                message: Message::Notification(Notification {
                    msg_id: cached.msg_id,
                    data_type,
                    data: cached.message.announce.data.clone(),
                }),
            })
            .await;
        }
    }

    async fn handle_validation(&self, validation: Validation) {
        let msg_id = validation.msg_id;
        if self.state.announces.is_valid(msg_id) {
            tracing::debug!(msg_id, "message already spread, ignoring verdict");
            return;
        }

        if !validation.valid {
            tracing::debug!(msg_id, "message invalid, dropping from cache");
            self.state.announces.remove(msg_id);
            return;
        }

        self.state.announces.set_validity(msg_id, true);
        match self.state.announces.get(msg_id) {
            Some(cached) if cached.forward => {
                tracing::info!(msg_id, "spreading validated message through the peer fabric");
                for peer in self.state.p2p_pool.identifiers() {
                    self.send_p2p(SendCmd::Send {
                        to: peer,
                        message: Message::Announce(cached.announce.clone()),
                    })
                    .await;
                }
            }
            Some(_) => {
                tracing::debug!(msg_id, "validated on its final hop, staying local");
            }
            None => {
                tracing::debug!(msg_id, "message no longer cached, spreading impossible");
            }
        }
    }

    async fn send_api(&self, cmd: SendCmd) {
        if self.to_api.send(cmd).await.is_err() {
            tracing::warn!("api outbound queue closed");
        }
    }

    async fn send_p2p(&self, cmd: SendCmd) {
        if self.to_p2p.send(cmd).await.is_err() {
            tracing::warn!("p2p outbound queue closed");
        }
    }
}
