//! Server assembly: shared state, TCP bind, and the shutdown handle.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use nix::sys::eventfd::{EfdFlags, EventFd};

use cinder_core::evict::{self, EvictOutcome, EvictionPool, LruClock};
use cinder_core::{Db, MemoryAccountant};

use crate::acl::AuthGate;
use crate::config::ServerConfig;
use crate::reactor::{Reactor, SIGNAL_STOP};

/// State shared by every command handler: the databases, the memory
/// accountant, the LRU clock, the eviction pool, and the auth gate.
/// Exclusively owned by the reactor thread.
pub struct ServerContext {
    pub config: ServerConfig,
    pub dbs: Vec<Db>,
    pub accountant: MemoryAccountant,
    pub lru: LruClock,
    pub pool: EvictionPool,
    pub auth: AuthGate,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Self {
        let accountant = MemoryAccountant::new();
        let dbs = (0..config.databases)
            .map(|id| Db::new(id, config.eviction_policy, accountant.clone()))
            .collect();
        let auth = AuthGate::new(config.requirepass.clone());
        let lru = LruClock::new(config.hz);

        Self {
            config,
            dbs,
            accountant,
            lru,
            pool: EvictionPool::new(),
            auth,
        }
    }

    /// `true` when a memory budget is configured and exceeded.
    pub fn over_budget(&self) -> bool {
        match self.config.max_memory {
            Some(max) => self.accountant.used_bytes() > max as i64,
            None => false,
        }
    }

    /// Evicts across all databases until usage is back under the
    /// budget, or reports failure.
    pub fn evict_to_budget(&mut self) -> EvictOutcome {
        let Some(max) = self.config.max_memory else {
            return EvictOutcome::Ok;
        };
        let max = max as i64;
        let clock = self.lru.value();

        if self.accountant.used_bytes() <= max {
            return EvictOutcome::Ok;
        }
        for db in &mut self.dbs {
            if evict::perform_evictions(db, &mut self.pool, &self.accountant, max, clock)
                == EvictOutcome::Ok
            {
                return EvictOutcome::Ok;
            }
        }
        EvictOutcome::Fail
    }
}

/// Clonable handle that asks a running server to stop.
#[derive(Clone)]
pub struct ShutdownHandle {
    signal: Arc<EventFd>,
}

impl ShutdownHandle {
    /// Requests a graceful shutdown. Safe to call from any thread.
    pub fn stop(&self) {
        if let Err(e) = self.signal.write(SIGNAL_STOP) {
            tracing::warn!("failed to signal shutdown: {e}");
        }
    }
}

/// A bound, not-yet-running server.
pub struct Server {
    reactor: Reactor,
    local_addr: SocketAddr,
    signal: Arc<EventFd>,
}

impl Server {
    /// Binds the listening socket and assembles the reactor.
    pub fn new(config: ServerConfig) -> io::Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)?;
        let local_addr = listener.local_addr()?;

        let signal = Arc::new(
            EventFd::from_value_and_flags(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)
                .map_err(io::Error::from)?,
        );

        let ctx = ServerContext::new(config);
        let reactor = Reactor::new(listener, Arc::clone(&signal), ctx)?;

        Ok(Self {
            reactor,
            local_addr,
            signal,
        })
    }

    /// The bound address (useful when the configured port was 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            signal: Arc::clone(&self.signal),
        }
    }

    /// Runs the event loop until a stop signal arrives.
    pub fn run(mut self) -> io::Result<()> {
        tracing::info!(addr = %self.local_addr, "listening");
        self.reactor.run()
    }
}
