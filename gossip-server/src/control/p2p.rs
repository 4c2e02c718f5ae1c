//! Controller for the peer (P2P) endpoint.
//!
//! Membership: bootstrap from a single configured peer, learn more through
//! PEER_REQUEST/PEER_RESPONSE exchanges, spread connectivity changes as
//! recursive PEER_UPDATE floods, and backfill with a PEER_REQUEST when a
//! connection is lost.
//!
//! Dissemination: announcements from peers are cached unvalidated and handed
//! to local subscribers; they only rejoin the peer fabric after the
//! application's positive verdict arrives through the API controller.

use std::net::SocketAddrV4;
use std::sync::Arc;

use gossip_sdk::wire::{
    Announce, Message, Notification, PeerInit, PeerRequest, PeerResponse, PeerUpdate,
    PeerUpdateKind,
};
use tokio::sync::mpsc;

use crate::control::{CachedAnnounce, ConnEvent, SendCmd};
use crate::daemon::SharedState;

pub struct P2pController {
    state: Arc<SharedState>,
    events: mpsc::Receiver<ConnEvent>,
    to_p2p: mpsc::Sender<SendCmd>,
    to_api: mpsc::Sender<SendCmd>,
    /// Our own advertised listening address.
    server_identifier: SocketAddrV4,
    max_ttl: u8,
    bootstrapper: Option<SocketAddrV4>,
}

impl P2pController {
    pub fn new(
        state: Arc<SharedState>,
        events: mpsc::Receiver<ConnEvent>,
        to_p2p: mpsc::Sender<SendCmd>,
        to_api: mpsc::Sender<SendCmd>,
        server_identifier: SocketAddrV4,
        max_ttl: u8,
        bootstrapper: Option<SocketAddrV4>,
    ) -> Self {
        Self {
            state,
            events,
            to_p2p,
            to_api,
            server_identifier,
            max_ttl,
            bootstrapper,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(server = %self.server_identifier, "p2p controller started");

        if let Some(bootstrapper) = self.bootstrapper {
            tracing::info!(peer = %bootstrapper, "bootstrapping membership");
            self.send_p2p(SendCmd::Establish { to: bootstrapper }).await;
            self.send_peer_request(bootstrapper).await;
        }

        while let Some(event) = self.events.recv().await {
            match event {
                ConnEvent::NewConnection(identifier) => {
                    self.handle_new_connection(identifier).await;
                }
                ConnEvent::Received { from, message } => self.handle_message(from, message).await,
                ConnEvent::ConnectionLost(identifier) => {
                    tracing::debug!(peer = %identifier, "peer connection lost, backfilling");
                    if let Some(other) = self.state.p2p_pool.random_other(identifier) {
                        self.send_peer_request(other).await;
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, from: SocketAddrV4, message: Message) {
        match message {
            Message::Announce(announce) => self.handle_announce(from, announce).await,
            Message::PeerRequest(request) => self.handle_peer_request(from, request).await,
            Message::PeerInit(init) => self.handle_peer_init(from, init).await,
            Message::PeerResponse(response) => self.handle_peer_response(response).await,
            Message::PeerUpdate(update) => self.handle_peer_update(from, update).await,
            other => {
                tracing::debug!(code = other.code(), "discarding peer message");
            }
        }
    }

    async fn handle_announce(&self, from: SocketAddrV4, announce: Announce) {
        let data_type = announce.data_type;
        let cached = CachedAnnounce::from_peer(announce.clone());
        let Some(msg_id) = self.state.announces.add(cached, false) else {
            tracing::info!("discarding announce, already known");
            return;
        };
        tracing::info!(msg_id, data_type, "delivering announce to local subscribers");

        // Peer fan-out is deferred until the application validates; only the
        // local subscribers hear about it now.
        let notification = Message::Notification(Notification {
            msg_id,
            data_type,
            data: announce.data,
        });
        for subscriber in self.state.registry.registrations(data_type) {
            if subscriber == from {
                continue;
            }
            self.send_api(SendCmd::Send {
                to: subscriber,
                message: notification.clone(),
            })
            .await;
        }
    }

    async fn handle_peer_request(&self, from: SocketAddrV4, request: PeerRequest) {
        tracing::debug!(peer = %from, server = %request.addr, "peer requests known identifiers");
        self.state.p2p_pool.update(from, request.addr);

        // Everyone we know, minus the requester itself and us.
        let peers = self
            .state
            .p2p_pool
            .server_identifiers(&[request.addr, self.server_identifier]);
        self.send_p2p(SendCmd::Send {
            to: from,
            message: Message::PeerResponse(PeerResponse { peers }),
        })
        .await;

        self.flood_known_peer(from).await;
    }

    async fn handle_peer_init(&self, from: SocketAddrV4, init: PeerInit) {
        tracing::debug!(peer = %from, server = %init.addr, "peer advertises its listening address");
        self.state.p2p_pool.update(from, init.addr);
        self.flood_known_peer(from).await;
    }

    async fn handle_peer_response(&self, response: PeerResponse) {
        let mut remaining = self.state.p2p_pool.capacity();
        if remaining == 0 {
            tracing::debug!("discarding peer response, pool is full");
            return;
        }
        for peer in self.state.p2p_pool.filter_new(&response.peers, &[]) {
            if remaining == 0 {
                break;
            }
            self.connect_new_peer(peer).await;
            remaining -= 1;
        }
    }

    async fn handle_peer_update(&self, from: SocketAddrV4, update: PeerUpdate) {
        // The half-TTL gate delays connect-in so a newly advertised peer is
        // widely known before everyone dials it at once.
        if update.ttl < self.max_ttl / 2 {
            match update.kind {
                PeerUpdateKind::Found => {
                    if self.state.p2p_pool.capacity() > 0 {
                        for peer in self.state.p2p_pool.filter_new(&[update.addr], &[]) {
                            self.connect_new_peer(peer).await;
                        }
                    } else {
                        tracing::debug!("discarding peer update, pool is full");
                    }
                }
                // Accepted on the wire; a lost peer has no local effect.
                PeerUpdateKind::Lost => {}
            }
        }

        if update.ttl > 1 {
            self.flood_update(
                from,
                PeerUpdate {
                    ttl: update.ttl - 1,
                    ..update
                },
            )
            .await;
        } else if update.ttl == 0 {
            // A TTL of 0 never stops.
            self.flood_update(from, update).await;
        }
    }

    async fn handle_new_connection(&self, identifier: SocketAddrV4) {
        // Replay first, then the membership flood: a fresh peer sees our
        // history oldest-first before anyone hears about the connection.
        self.replay_announces(identifier).await;
        self.flood_known_peer(identifier).await;
    }

    /// Flood a found-update about a connection whose listening address we
    /// have learned. Quiet until the peer advertises it.
    async fn flood_known_peer(&self, identifier: SocketAddrV4) {
        match self.state.p2p_pool.server_identifier(identifier) {
            Ok(Some(server)) => {
                self.flood_update(
                    identifier,
                    PeerUpdate {
                        addr: server,
                        ttl: self.max_ttl,
                        kind: PeerUpdateKind::Found,
                    },
                )
                .await;
            }
            Ok(None) => {
                tracing::debug!(
                    peer = %identifier,
                    "server identifier still unknown, waiting for the peer to advertise"
                );
            }
            Err(err) => {
                tracing::debug!("cannot flood about a vanished connection: {err}");
            }
        }
    }

    /// De-duplicated flood of a peer update to everyone except the sender
    /// and the subject itself.
    async fn flood_update(&self, from: SocketAddrV4, update: PeerUpdate) {
        if self.state.updates.add(update, true).is_none() {
            tracing::debug!(subject = %update.addr, "peer update already flooded");
            return;
        }
        if update.addr == self.server_identifier {
            // Nobody needs to hear about us from us.
            return;
        }
        tracing::debug!(subject = %update.addr, ttl = update.ttl, "flooding peer update");
        for peer in self.state.p2p_pool.identifiers() {
            if peer == from || peer == update.addr {
                continue;
            }
            self.send_p2p(SendCmd::Send {
                to: peer,
                message: Message::PeerUpdate(update),
            })
            .await;
        }
    }

    /// Send everything worth forwarding to a newly connected peer, oldest
    /// first. Unvalidated and final-hop entries stay local.
    async fn replay_announces(&self, identifier: SocketAddrV4) {
        for cached in self.state.announces.entries() {
            if !cached.valid || !cached.message.forward {
                continue;
            }
            self.send_p2p(SendCmd::Send {
                to: identifier,
                message: Message::Announce(cached.message.announce.clone()),
            })
            .await;
        }
    }

    async fn send_peer_request(&self, to: SocketAddrV4) {
        self.send_p2p(SendCmd::Send {
            to,
            message: Message::PeerRequest(PeerRequest {
                addr: self.server_identifier,
            }),
        })
        .await;
    }

    async fn connect_new_peer(&self, peer: SocketAddrV4) {
        tracing::debug!(peer = %peer, "establishing connection to advertised peer");
        self.send_p2p(SendCmd::Establish { to: peer }).await;
        self.send_p2p(SendCmd::Send {
            to: peer,
            message: Message::PeerInit(PeerInit {
                addr: self.server_identifier,
            }),
        })
        .await;
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
