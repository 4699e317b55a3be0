//! cinder-server: the network front of the engine.
//!
//! An epoll reactor multiplexes every accepted connection onto one
//! thread; per-client state machines assemble requests out of partial
//! reads and the command pipeline executes them against the keyspace.

pub mod acl;
pub mod client;
pub mod command;
pub mod commands;
pub mod config;
pub mod connection;
pub mod reactor;
pub mod server;
pub mod shared;

pub use config::ServerConfig;
pub use server::{Server, ShutdownHandle};
