//! Subscriptions of local API clients.
//!
//! Maps a data type to the API connections that asked for it via NOTIFY.
//! Registration order is preserved so notifications fan out in the order
//! clients subscribed.

use std::collections::HashMap;
use std::net::SocketAddrV4;

use parking_lot::Mutex;

#[derive(Default)]
pub struct SubscriptionRegistry {
    registrations: Mutex<HashMap<u16, Vec<SocketAddrV4>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for a data type. Idempotent.
    pub fn register(&self, data_type: u16, subscriber: SocketAddrV4) {
        let mut registrations = self.registrations.lock();
        let subscribers = registrations.entry(data_type).or_default();
        if !subscribers.contains(&subscriber) {
            subscribers.push(subscriber);
            tracing::debug!(data_type, subscriber = %subscriber, "registered subscriber");
        }
    }

    /// Drop a subscriber from every data type; called when its API
    /// connection is lost.
    pub fn unregister(&self, subscriber: SocketAddrV4) {
        let mut registrations = self.registrations.lock();
        for subscribers in registrations.values_mut() {
            subscribers.retain(|candidate| *candidate != subscriber);
        }
    }

    /// Snapshot of the subscribers for a data type, in registration order.
    pub fn registrations(&self, data_type: u16) -> Vec<SocketAddrV4> {
        self.registrations
            .lock()
            .get(&data_type)
            .cloned()
            .unwrap_or_default()
    }
}
