//! Wire protocol and API client for the gossip overlay daemon.
//!
//! The [`wire`] module defines the framed binary protocol spoken on both the
//! peer-to-peer fabric and the local API socket. The [`client`] module is a
//! thin async client for the API side: announce a payload, subscribe to a
//! data type, and answer validation requests.

pub mod client;
pub mod wire;
