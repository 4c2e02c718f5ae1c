//! Bounded caches for announcements and peer-update floods.
//!
//! Every entry gets a random 16-bit id drawn on insertion; the id space is
//! deliberately uncorrelated with insertion order. Eviction is oldest-first
//! by insertion stamp, so a freshly learned message stays available long
//! enough to be replayed to newly connected peers.

use std::collections::HashMap;

use gossip_sdk::wire::PeerUpdate;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Payload equality for de-duplication. Transport fields (ids, TTL) are
/// excluded: two announces with the same type and bytes are the same
/// message, however many hops each has left.
pub trait CachePayload: Clone {
    fn same_payload(&self, other: &Self) -> bool;
}

impl CachePayload for PeerUpdate {
    fn same_payload(&self, other: &Self) -> bool {
        self.addr == other.addr && self.kind == other.kind
    }
}

/// One cached message plus its bookkeeping, as returned by
/// [`MessageCache::entries`].
#[derive(Debug, Clone)]
pub struct CachedMessage<T> {
    pub msg_id: u16,
    pub message: T,
    pub valid: bool,
}

#[derive(Clone)]
struct Entry<T> {
    message: T,
    valid: bool,
    stamp: u64,
}

struct Inner<T> {
    entries: HashMap<u16, Entry<T>>,
    next_stamp: u64,
    rng: StdRng,
}

/// Thread-safe, capacity-bounded message cache.
pub struct MessageCache<T> {
    label: &'static str,
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

impl<T: CachePayload> MessageCache<T> {
    pub fn new(label: &'static str, capacity: usize) -> Self {
        Self::with_rng(label, capacity, StdRng::from_entropy())
    }

    /// Cache with an injected RNG so tests get deterministic ids.
    pub fn with_rng(label: &'static str, capacity: usize, rng: StdRng) -> Self {
        Self {
            label,
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next_stamp: 0,
                rng,
            }),
        }
    }

    /// Insert a message unless a payload-equal one is already cached.
    /// Returns the freshly assigned id, or `None` for a duplicate.
    pub fn add(&self, message: T, valid: bool) -> Option<u16> {
        let mut inner = self.inner.lock();
        if inner
            .entries
            .values()
            .any(|entry| entry.message.same_payload(&message))
        {
            return None;
        }

        let msg_id = loop {
            let candidate = inner.rng.gen_range(0..=u16::MAX);
            if !inner.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        let stamp = inner.next_stamp;
        inner.next_stamp += 1;
        inner.entries.insert(
            msg_id,
            Entry {
                message,
                valid,
                stamp,
            },
        );

        while inner.entries.len() > self.capacity {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.stamp)
                .map(|(id, _)| *id)
            {
                inner.entries.remove(&oldest);
                tracing::debug!(cache = self.label, msg_id = oldest, "evicted oldest entry");
            }
        }

        tracing::debug!(
            cache = self.label,
            msg_id,
            size = inner.entries.len(),
            "cached new message"
        );
        Some(msg_id)
    }

    pub fn get(&self, msg_id: u16) -> Option<T> {
        self.inner
            .lock()
            .entries
            .get(&msg_id)
            .map(|entry| entry.message.clone())
    }

    pub fn remove(&self, msg_id: u16) -> Option<T> {
        self.inner
            .lock()
            .entries
            .remove(&msg_id)
            .map(|entry| entry.message)
    }

    /// False for unknown ids as well as entries still awaiting validation.
    pub fn is_valid(&self, msg_id: u16) -> bool {
        self.inner
            .lock()
            .entries
            .get(&msg_id)
            .is_some_and(|entry| entry.valid)
    }

    /// No-op for unknown ids.
    pub fn set_validity(&self, msg_id: u16, valid: bool) {
        if let Some(entry) = self.inner.lock().entries.get_mut(&msg_id) {
            entry.valid = valid;
        }
    }

    /// Snapshot of all entries in insertion order (oldest first).
    pub fn entries(&self) -> Vec<CachedMessage<T>> {
        let inner = self.inner.lock();
        let mut snapshot: Vec<(u64, CachedMessage<T>)> = inner
            .entries
            .iter()
            .map(|(msg_id, entry)| {
                (
                    entry.stamp,
                    CachedMessage {
                        msg_id: *msg_id,
                        message: entry.message.clone(),
                        valid: entry.valid,
                    },
                )
            })
            .collect();
        snapshot.sort_by_key(|(stamp, _)| *stamp);
        snapshot.into_iter().map(|(_, cached)| cached).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}
