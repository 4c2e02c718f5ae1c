//! Daemon wiring and supervision.
//!
//! Two symmetric endpoints share one layout: an acceptor feeding receivers,
//! a sender draining an outbound queue, and a controller reacting to the
//! event stream. The controllers cross-connect the endpoints:
//!
//! ```text
//! api socket -> api receivers -> api events -> ApiController
//!                                                |-> to_p2p -> p2p sender
//!                                                '-> to_api -> api sender
//! p2p socket -> p2p receivers -> p2p events -> P2pController -> (same queues)
//! ```

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use gossip_sdk::wire::PeerUpdate;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::acceptor::{self, Acceptor};
use crate::cache::MessageCache;
use crate::config::Config;
use crate::control::{ApiController, CachedAnnounce, P2pController};
use crate::pool::ConnectionPool;
use crate::registry::SubscriptionRegistry;
use crate::sender::Sender;

/// Depth of every inter-task queue.
const QUEUE_DEPTH: usize = 1024;

/// Exit-code bits for abnormal task exits, OR-ed into the process exit
/// code. 1 is reserved for configuration failures.
pub const EXIT_API_ACCEPTOR: i32 = 2;
pub const EXIT_API_CONTROLLER: i32 = 4;
pub const EXIT_API_SENDER: i32 = 8;
pub const EXIT_P2P_ACCEPTOR: i32 = 16;
pub const EXIT_P2P_CONTROLLER: i32 = 32;
pub const EXIT_P2P_SENDER: i32 = 64;
const EXIT_PANIC: i32 = 128;

/// State shared by every task of the daemon.
pub struct SharedState {
    pub api_pool: Arc<ConnectionPool>,
    pub p2p_pool: Arc<ConnectionPool>,
    pub announces: MessageCache<CachedAnnounce>,
    pub updates: MessageCache<PeerUpdate>,
    pub registry: SubscriptionRegistry,
}

impl SharedState {
    pub fn new(cache_size: usize, max_connections: usize) -> Self {
        Self {
            api_pool: Arc::new(ConnectionPool::new("api pool", max_connections)),
            p2p_pool: Arc::new(ConnectionPool::new("p2p pool", max_connections)),
            announces: MessageCache::new("announce cache", cache_size),
            updates: MessageCache::new("update cache", cache_size),
            registry: SubscriptionRegistry::new(),
        }
    }
}

/// A running daemon. Dropping it aborts every task.
pub struct Daemon {
    api_addr: SocketAddrV4,
    p2p_addr: SocketAddrV4,
    state: Arc<SharedState>,
    tasks: JoinSet<(&'static str, i32)>,
}

fn bound_v4(addr: SocketAddr) -> Result<SocketAddrV4> {
    match addr {
        SocketAddr::V4(addr) => Ok(addr),
        SocketAddr::V6(addr) => bail!("listener bound to an IPv6 address: {addr}"),
    }
}

impl Daemon {
    /// Bind both endpoints and start every task.
    pub async fn spawn(config: Config) -> Result<Self> {
        let api_listener = acceptor::bind(config.api_address)
            .with_context(|| format!("binding API endpoint {}", config.api_address))?;
        let p2p_listener = acceptor::bind(config.listen_address)
            .with_context(|| format!("binding P2P endpoint {}", config.listen_address))?;
        let api_addr = bound_v4(api_listener.local_addr()?)?;
        let p2p_addr = bound_v4(p2p_listener.local_addr()?)?;

        let state = Arc::new(SharedState::new(config.cache_size, config.max_connections));

        let (api_events_tx, api_events_rx) = mpsc::channel(QUEUE_DEPTH);
        let (p2p_events_tx, p2p_events_rx) = mpsc::channel(QUEUE_DEPTH);
        let (to_api_tx, to_api_rx) = mpsc::channel(QUEUE_DEPTH);
        let (to_p2p_tx, to_p2p_rx) = mpsc::channel(QUEUE_DEPTH);

        let mut tasks = JoinSet::new();

        let api_acceptor = Acceptor::new(
            "api server",
            "api receiver",
            api_listener,
            api_events_tx.clone(),
            state.api_pool.clone(),
        );
        tasks.spawn(async move {
            api_acceptor.run().await;
            ("api server", EXIT_API_ACCEPTOR)
        });

        let p2p_acceptor = Acceptor::new(
            "p2p server",
            "p2p receiver",
            p2p_listener,
            p2p_events_tx.clone(),
            state.p2p_pool.clone(),
        );
        tasks.spawn(async move {
            p2p_acceptor.run().await;
            ("p2p server", EXIT_P2P_ACCEPTOR)
        });

        let api_sender = Sender::new(
            "api sender",
            "api receiver",
            to_api_rx,
            api_events_tx.clone(),
            state.api_pool.clone(),
        );
        tasks.spawn(async move {
            api_sender.run().await;
            ("api sender", EXIT_API_SENDER)
        });

        let p2p_sender = Sender::new(
            "p2p sender",
            "p2p receiver",
            to_p2p_rx,
            p2p_events_tx.clone(),
            state.p2p_pool.clone(),
        );
        tasks.spawn(async move {
            p2p_sender.run().await;
            ("p2p sender", EXIT_P2P_SENDER)
        });

        let api_controller = ApiController::new(
            state.clone(),
            api_events_rx,
            to_api_tx.clone(),
            to_p2p_tx.clone(),
        );
        tasks.spawn(async move {
            api_controller.run().await;
            ("api controller", EXIT_API_CONTROLLER)
        });

        let p2p_controller = P2pController::new(
            state.clone(),
            p2p_events_rx,
            to_p2p_tx.clone(),
            to_api_tx.clone(),
            p2p_addr,
            config.max_ttl,
            config.bootstrapper,
        );
        tasks.spawn(async move {
            p2p_controller.run().await;
            ("p2p controller", EXIT_P2P_CONTROLLER)
        });

        Ok(Self {
            api_addr,
            p2p_addr,
            state,
            tasks,
        })
    }

    /// The daemon's shared pools, caches and registry.
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Actual API endpoint (resolves a configured port 0).
    pub fn api_addr(&self) -> SocketAddrV4 {
        self.api_addr
    }

    /// Actual P2P endpoint, which is also our advertised server identifier.
    pub fn p2p_addr(&self) -> SocketAddrV4 {
        self.p2p_addr
    }

    /// Run until a shutdown signal or the first abnormal task exit.
    /// Returns the process exit code.
    pub async fn run(mut self) -> i32 {
        let mut exit_code = 0;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received, stopping tasks");
            }
            joined = self.tasks.join_next() => match joined {
                Some(Ok((name, bit))) => {
                    tracing::error!("{name} exited unexpectedly");
                    exit_code |= bit;
                }
                Some(Err(err)) => {
                    tracing::error!("task failed: {err}");
                    exit_code |= EXIT_PANIC;
                }
                None => {}
            }
        }
        self.tasks.shutdown().await;
        exit_code
    }
}
