//! Capacity-bounded connection pool.
//!
//! One pool per endpoint, shared by the acceptor, the sender, the receivers
//! and the controller. Entries are keyed by the socket's remote endpoint:
//! the listening address for outbound connections, the ephemeral address for
//! inbound ones. The advertised listening address (server identifier) of an
//! inbound peer is learned later from its PEER_REQUEST or PEER_INIT.
//!
//! Capacity is enforced by eviction only: `add` always inserts, then the
//! maintainer removes uniformly random entries until the pool fits again.
//! Random eviction keeps the topology mixing instead of pinning the oldest
//! connections.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::sync::CancellationToken;

/// Write half of a pooled socket. The endpoint sender locks it per frame so
/// outbound frames stay serialized per peer without holding the pool lock
/// across I/O.
pub type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

#[derive(Debug, Error)]
#[error("no connection for identifier {0}")]
pub struct IdentifierNotFound(pub SocketAddrV4);

/// A live socket tracked by the pool. The matching receiver task owns the
/// read half and watches `cancel`.
#[derive(Clone)]
pub struct Connection {
    writer: SharedWriter,
    server_identifier: Option<SocketAddrV4>,
    cancel: CancellationToken,
}

impl Connection {
    /// Wrap an inbound socket whose listening address is still unknown.
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            server_identifier: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Wrap an outbound socket; we dialed the peer's listening address, so
    /// the server identifier is known from the start.
    pub fn with_server_identifier(writer: OwnedWriteHalf, server_identifier: SocketAddrV4) -> Self {
        Self {
            server_identifier: Some(server_identifier),
            ..Self::new(writer)
        }
    }

    /// Token the owning receiver watches; cancelled on eviction.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Half-close the socket and stop the owning receiver. The socket is
    /// fully closed once the receiver drops its read half.
    pub fn close(self) {
        self.cancel.cancel();
        tokio::spawn(async move {
            let _ = self.writer.lock().await.shutdown().await;
        });
    }
}

struct Inner {
    connections: HashMap<SocketAddrV4, Connection>,
    rng: StdRng,
}

/// Thread-safe pool of live connections for one endpoint.
pub struct ConnectionPool {
    label: &'static str,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ConnectionPool {
    pub fn new(label: &'static str, capacity: usize) -> Self {
        Self::with_rng(label, capacity, StdRng::from_entropy())
    }

    /// Pool with an injected RNG so tests get deterministic evictions.
    pub fn with_rng(label: &'static str, capacity: usize, rng: StdRng) -> Self {
        Self {
            label,
            capacity,
            inner: Mutex::new(Inner {
                connections: HashMap::new(),
                rng,
            }),
        }
    }

    /// Insert a connection. Returns false (dropping nothing) when the
    /// identifier is already present. Runs the maintainer afterwards, so the
    /// just-inserted entry may itself be the eviction victim.
    pub fn add(&self, identifier: SocketAddrV4, connection: Connection) -> bool {
        let evicted = {
            let mut inner = self.inner.lock();
            if inner.connections.contains_key(&identifier) {
                tracing::debug!(pool = self.label, peer = %identifier, "connection exists already");
                return false;
            }
            inner.connections.insert(identifier, connection);
            tracing::debug!(
                pool = self.label,
                peer = %identifier,
                size = inner.connections.len(),
                "added connection"
            );
            Self::maintain(&mut inner, self.capacity)
        };
        for (victim, connection) in evicted {
            tracing::debug!(pool = self.label, peer = %victim, "evicted connection over capacity");
            connection.close();
        }
        true
    }

    fn maintain(inner: &mut Inner, capacity: usize) -> Vec<(SocketAddrV4, Connection)> {
        let mut evicted = Vec::new();
        while inner.connections.len() > capacity {
            let keys: Vec<SocketAddrV4> = inner.connections.keys().copied().collect();
            let victim = keys[inner.rng.gen_range(0..keys.len())];
            if let Some(connection) = inner.connections.remove(&victim) {
                evicted.push((victim, connection));
            }
        }
        evicted
    }

    /// Record the server identifier a peer advertised. No-op when the
    /// connection is already gone.
    pub fn update(&self, identifier: SocketAddrV4, server_identifier: SocketAddrV4) {
        let mut inner = self.inner.lock();
        match inner.connections.get_mut(&identifier) {
            Some(connection) => {
                connection.server_identifier = Some(server_identifier);
                tracing::debug!(
                    pool = self.label,
                    peer = %identifier,
                    server = %server_identifier,
                    "updated server identifier"
                );
            }
            None => {
                tracing::debug!(pool = self.label, peer = %identifier, "update on unknown connection");
            }
        }
    }

    /// Pop a connection, returning it for closing.
    pub fn remove(&self, identifier: SocketAddrV4) -> Option<Connection> {
        let removed = self.inner.lock().connections.remove(&identifier);
        if removed.is_some() {
            tracing::debug!(pool = self.label, peer = %identifier, "removed connection");
        }
        removed
    }

    /// Writer for a pooled connection.
    pub fn get(&self, identifier: SocketAddrV4) -> Result<SharedWriter, IdentifierNotFound> {
        self.inner
            .lock()
            .connections
            .get(&identifier)
            .map(|connection| connection.writer.clone())
            .ok_or(IdentifierNotFound(identifier))
    }

    /// Advertised listening address of a pooled connection, if learned yet.
    pub fn server_identifier(
        &self,
        identifier: SocketAddrV4,
    ) -> Result<Option<SocketAddrV4>, IdentifierNotFound> {
        self.inner
            .lock()
            .connections
            .get(&identifier)
            .map(|connection| connection.server_identifier)
            .ok_or(IdentifierNotFound(identifier))
    }

    /// Snapshot of all identifiers, safe to iterate without the lock.
    pub fn identifiers(&self) -> Vec<SocketAddrV4> {
        self.inner.lock().connections.keys().copied().collect()
    }

    /// Snapshot of all known server identifiers, minus `exclude`.
    pub fn server_identifiers(&self, exclude: &[SocketAddrV4]) -> Vec<SocketAddrV4> {
        self.inner
            .lock()
            .connections
            .values()
            .filter_map(|connection| connection.server_identifier)
            .filter(|server| !exclude.contains(server))
            .collect()
    }

    /// Remaining capacity (zero when full or over).
    pub fn capacity(&self) -> usize {
        self.capacity.saturating_sub(self.inner.lock().connections.len())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().connections.is_empty()
    }

    /// Candidates not currently known as server identifiers.
    pub fn filter_new(
        &self,
        candidates: &[SocketAddrV4],
        exclude: &[SocketAddrV4],
    ) -> Vec<SocketAddrV4> {
        let known = self.server_identifiers(exclude);
        candidates
            .iter()
            .copied()
            .filter(|candidate| !known.contains(candidate))
            .collect()
    }

    /// A uniformly random pool member other than `exclude`.
    pub fn random_other(&self, exclude: SocketAddrV4) -> Option<SocketAddrV4> {
        let mut inner = self.inner.lock();
        let others: Vec<SocketAddrV4> = inner
            .connections
            .keys()
            .copied()
            .filter(|identifier| *identifier != exclude)
            .collect();
        match others.len() {
            0 => None,
            1 => Some(others[0]),
            n => Some(others[inner.rng.gen_range(0..n)]),
        }
    }
}
