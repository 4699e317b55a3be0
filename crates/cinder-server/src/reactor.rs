//! Single-threaded epoll reactor.
//!
//! One level-triggered epoll instance multiplexes the listening socket,
//! an eventfd used as the shutdown signal, and every accepted client.
//! Interest transitions are explicit: sockets are read-armed on accept,
//! write interest is armed only while a client has undrained reply
//! bytes, and dropped again after a full flush.
//!
//! The epoll wait doubles as the periodic tick: it times out at the
//! configured frequency and runs the cron (LRU clock refresh, active
//! expiry sampling, idle-client scan).

use std::collections::HashMap;
use std::io;
use std::net::TcpListener;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::sync::Arc;

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::eventfd::EventFd;

use cinder_core::time;

use crate::client::{self, Client, ClientFlags};
use crate::connection::Connection;
use crate::server::ServerContext;

/// Events drained per epoll wait.
const MAX_EVENTS: usize = 1024;

/// Keys sampled per database in one expiry cron round.
const ACTIVE_EXPIRE_SAMPLES: usize = 20;

/// Clients inspected per idle-scan round. The scan must stay
/// O(sampled), not O(total clients).
const CLIENTS_CRON_SAMPLE: usize = 16;

/// Wake-up values written into the signal eventfd.
pub const SIGNAL_STOP: u64 = 1;

/// Per-fd interest registration over one epoll instance.
///
/// Readiness is level-triggered; each registered fd is in exactly one
/// of the read / write / read+write states until unregistered.
pub struct Registry {
    epoll: Epoll,
    states: HashMap<RawFd, EpollFlags>,
}

impl Registry {
    pub fn new() -> io::Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(io::Error::from)?;
        Ok(Self {
            epoll,
            states: HashMap::new(),
        })
    }

    fn set_interest<F: AsFd>(&mut self, fd: &F, flags: EpollFlags) -> io::Result<()> {
        let raw = fd.as_fd().as_raw_fd();
        let mut event = EpollEvent::new(flags, raw as u64);
        match self.states.get(&raw) {
            None => self.epoll.add(fd, event).map_err(io::Error::from)?,
            Some(current) if *current == flags => return Ok(()),
            Some(_) => self.epoll.modify(fd, &mut event).map_err(io::Error::from)?,
        }
        self.states.insert(raw, flags);
        Ok(())
    }

    /// Read interest only.
    pub fn arm_read<F: AsFd>(&mut self, fd: &F) -> io::Result<()> {
        self.set_interest(fd, EpollFlags::EPOLLIN)
    }

    /// Read + write interest (used while replies are pending).
    pub fn arm_write<F: AsFd>(&mut self, fd: &F) -> io::Result<()> {
        self.set_interest(fd, EpollFlags::EPOLLIN | EpollFlags::EPOLLOUT)
    }

    /// Back to read-only interest after a full flush.
    pub fn disarm_write<F: AsFd>(&mut self, fd: &F) -> io::Result<()> {
        self.set_interest(fd, EpollFlags::EPOLLIN)
    }

    /// Removes the fd from the epoll set entirely.
    pub fn unregister<F: AsFd>(&mut self, fd: &F) -> io::Result<()> {
        let raw = fd.as_fd().as_raw_fd();
        if self.states.remove(&raw).is_some() {
            self.epoll.delete(fd).map_err(io::Error::from)?;
        }
        Ok(())
    }

    fn wait(&self, events: &mut [EpollEvent], timeout_ms: u16) -> io::Result<usize> {
        self.epoll
            .wait(events, EpollTimeout::from(timeout_ms))
            .map_err(io::Error::from)
    }
}

/// The event loop: owns the listener, the signal fd, every client, and
/// the server state the command handlers mutate.
pub struct Reactor {
    registry: Registry,
    listener: Option<TcpListener>,
    signal: Arc<EventFd>,
    clients: HashMap<RawFd, Client>,
    pub ctx: ServerContext,
    next_client_id: u64,
    last_cron_ms: u64,
}

impl Reactor {
    /// Wires the listener and signal fd into a fresh epoll set.
    pub fn new(listener: TcpListener, signal: Arc<EventFd>, ctx: ServerContext) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut registry = Registry::new()?;
        registry.arm_read(&*signal)?;
        registry.arm_read(&listener)?;

        Ok(Self {
            registry,
            listener: Some(listener),
            signal,
            clients: HashMap::new(),
            ctx,
            next_client_id: 1,
            last_cron_ms: 0,
        })
    }

    /// Runs the loop until a stop signal arrives, then shuts down.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = vec![EpollEvent::empty(); MAX_EVENTS];
        let tick_ms = (1000 / self.ctx.config.hz.max(1)).clamp(1, u16::MAX as u32) as u16;

        let listen_fd = self
            .listener
            .as_ref()
            .map(|l| l.as_raw_fd())
            .unwrap_or(-1);
        let signal_fd = self.signal.as_fd().as_raw_fd();

        'outer: loop {
            let n = match self.registry.wait(&mut events, tick_ms) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!("epoll wait failed: {e}");
                    self.shutdown();
                    return Err(e);
                }
            };

            for i in 0..n {
                let fd = events[i].data() as RawFd;
                let flags = events[i].events();

                if fd == signal_fd {
                    if self.drain_signal() {
                        break 'outer;
                    }
                } else if fd == listen_fd {
                    self.accept_ready();
                } else {
                    if flags.intersects(EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP) {
                        self.close_client(fd);
                        continue;
                    }
                    if flags.contains(EpollFlags::EPOLLIN) {
                        self.client_readable(fd);
                    }
                    if flags.contains(EpollFlags::EPOLLOUT) {
                        self.client_writable(fd);
                    }
                }
            }

            self.cron();
        }

        self.shutdown();
        Ok(())
    }

    /// Reads the signal counter. Returns `true` on a stop request.
    fn drain_signal(&mut self) -> bool {
        match self.signal.read() {
            Ok(value) => {
                if value >= SIGNAL_STOP {
                    tracing::info!("stop signal received");
                    return true;
                }
                false
            }
            Err(e) => {
                tracing::debug!("signal fd read failed: {e}");
                false
            }
        }
    }

    /// Accepts every pending connection, arming each for reads.
    fn accept_ready(&mut self) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            match listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!("failed to set nonblocking on {addr}: {e}");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);

                    let fd = stream.as_raw_fd();
                    if let Err(e) = self.registry.arm_read(&stream) {
                        tracing::warn!("failed to register fd {fd}: {e}");
                        continue;
                    }

                    let id = self.next_client_id;
                    self.next_client_id += 1;
                    tracing::debug!(fd, id, peer = %addr, "accepted connection");
                    self.clients
                        .insert(fd, Client::new(id, Connection::new(stream, addr)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!("accept failed: {e}");
                    return;
                }
            }
        }
    }

    /// Drains the socket into the query buffer and runs the client
    /// state machine over whatever arrived.
    fn client_readable(&mut self, fd: RawFd) {
        let Some(c) = self.clients.get_mut(&fd) else {
            return;
        };

        let (read, eof) = match c.conn.read_into(&mut c.query_buf) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(fd, "read failed: {e}");
                self.close_client(fd);
                return;
            }
        };

        if read > 0 {
            c.last_interaction_ms = time::mstime();
            client::process_input_buffer(&mut self.ctx, c);
        }

        let flush_failed = client::flush_client(c).is_err();
        let drained = !c.has_pending_replies();
        let should_close = eof
            || flush_failed
            || c.flags.contains(ClientFlags::CLOSE_ASAP)
            || (c.flags.contains(ClientFlags::CLOSE_AFTER_REPLY) && drained);

        if should_close {
            self.close_client(fd);
            return;
        }
        // partial write: stay interested in writability until drained
        let result = if drained {
            self.registry.disarm_write(&c.conn)
        } else {
            self.registry.arm_write(&c.conn)
        };
        if let Err(e) = result {
            tracing::warn!(fd, "epoll interest update failed: {e}");
            self.close_client(fd);
        }
    }

    /// Flushes pending replies on a writable socket.
    fn client_writable(&mut self, fd: RawFd) {
        let Some(c) = self.clients.get_mut(&fd) else {
            return;
        };

        let flush_failed = client::flush_client(c).is_err();
        let drained = !c.has_pending_replies();
        let should_close = flush_failed
            || c.flags.contains(ClientFlags::CLOSE_ASAP)
            || (c.flags.contains(ClientFlags::CLOSE_AFTER_REPLY) && drained);

        if should_close {
            self.close_client(fd);
            return;
        }
        let result = if drained {
            self.registry.disarm_write(&c.conn)
        } else {
            self.registry.arm_write(&c.conn)
        };
        if let Err(e) = result {
            tracing::warn!(fd, "epoll interest update failed: {e}");
            self.close_client(fd);
        }
    }

    fn close_client(&mut self, fd: RawFd) {
        if let Some(c) = self.clients.remove(&fd) {
            let _ = self.registry.unregister(&c.conn);
            tracing::debug!(fd, id = c.id, "closing connection");
            // the stream closes when the client drops
        }
    }

    /// Periodic housekeeping, rate-limited to the configured tick.
    fn cron(&mut self) {
        let now = time::mstime();
        let tick_ms = (1000 / self.ctx.config.hz.max(1)) as u64;
        if now.saturating_sub(self.last_cron_ms) < tick_ms {
            return;
        }
        self.last_cron_ms = now;

        self.ctx.lru.refresh();

        for db in &mut self.ctx.dbs {
            db.expire_cycle(ACTIVE_EXPIRE_SAMPLES);
        }

        // idle-client scan over a bounded sample
        let timeout = self.ctx.config.client_timeout_secs;
        if timeout > 0 {
            let cutoff = now.saturating_sub(timeout * 1000);
            let stale: Vec<RawFd> = self
                .clients
                .iter()
                .take(CLIENTS_CRON_SAMPLE)
                .filter(|(_, c)| {
                    c.last_interaction_ms < cutoff && !c.flags.contains(ClientFlags::MASTER)
                })
                .map(|(fd, _)| *fd)
                .collect();
            for fd in stale {
                tracing::debug!(fd, "closing idle client");
                self.close_client(fd);
            }
        }
    }

    /// Tears everything down: signal fd, listener, clients, then the
    /// epoll fd when the registry drops.
    fn shutdown(&mut self) {
        let _ = self.registry.unregister(&*self.signal);

        if let Some(listener) = self.listener.take() {
            let _ = self.registry.unregister(&listener);
            drop(listener);
        }

        let fds: Vec<RawFd> = self.clients.keys().copied().collect();
        for fd in fds {
            self.close_client(fd);
        }

        tracing::info!("reactor shut down");
    }
}
