//! Peer-to-peer gossip overlay daemon.
//!
//! The daemon runs two symmetric TCP endpoints: a P2P endpoint for remote
//! peers and an API endpoint for local applications. Each endpoint has an
//! acceptor, a receiver task per socket, one sender task draining an
//! outbound queue, and one controller reacting to connection events. The
//! controllers are wired to each other and to the shared pools and caches
//! in [`daemon`].

pub mod acceptor;
pub mod cache;
pub mod config;
pub mod control;
pub mod daemon;
pub mod pool;
pub mod receiver;
pub mod registry;
pub mod sender;
