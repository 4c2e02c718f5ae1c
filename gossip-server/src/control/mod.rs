//! Endpoint controllers and the queue vocabulary they share.
//!
//! Controllers are event-driven reactors: receivers push [`ConnEvent`]s in,
//! controllers push [`SendCmd`]s out to the endpoint senders. Nothing else
//! crosses task boundaries.

use std::net::SocketAddrV4;

use gossip_sdk::wire::{Announce, Message};

use crate::cache::CachePayload;

mod api;
mod p2p;

pub use api::ApiController;
pub use p2p::P2pController;

/// Lifecycle and traffic events a receiver reports to its controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEvent {
    /// A socket entered the pool (accepted or dialed).
    NewConnection(SocketAddrV4),
    /// A frame arrived and decoded.
    Received {
        from: SocketAddrV4,
        message: Message,
    },
    /// The socket is gone; the pool entry has already been removed.
    ConnectionLost(SocketAddrV4),
}

/// Work items an endpoint sender consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendCmd {
    /// Write a frame to an existing connection.
    Send {
        to: SocketAddrV4,
        message: Message,
    },
    /// Dial a peer's listening address and pool the new socket.
    Establish { to: SocketAddrV4 },
}

/// An announcement as retained for later fan-out.
///
/// `forward` is false when the message arrived on its final hop: it still
/// reaches local subscribers, but it never goes back onto the peer fabric —
/// not on validation and not in the replay to newly connected peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAnnounce {
    pub announce: Announce,
    pub forward: bool,
}

impl CachedAnnounce {
    /// Retain a locally originated announcement. The origin does not count
    /// as a hop, so the TTL is kept as the application supplied it.
    pub fn local(announce: Announce) -> Self {
        Self {
            announce,
            forward: true,
        }
    }

    /// Retain an announcement received from a peer, spending one hop of its
    /// budget. A TTL of 0 is unlimited and stays 0. A TTL of 1 saturates:
    /// the stored copy keeps TTL 1 but is marked final-hop instead of
    /// collapsing to 0, which would accidentally lift the hop limit.
    pub fn from_peer(announce: Announce) -> Self {
        match announce.ttl {
            0 => Self {
                announce,
                forward: true,
            },
            1 => Self {
                announce,
                forward: false,
            },
            ttl => Self {
                announce: Announce {
                    ttl: ttl - 1,
                    ..announce
                },
                forward: true,
            },
        }
    }
}

impl CachePayload for CachedAnnounce {
    fn same_payload(&self, other: &Self) -> bool {
        self.announce.data_type == other.announce.data_type
            && self.announce.data == other.announce.data
    }
}
