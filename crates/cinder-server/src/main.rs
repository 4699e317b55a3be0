use clap::Parser;
use tracing::{error, info};

use cinder_server::config::{parse_byte_size, parse_eviction_policy, ServerConfig};
use cinder_server::Server;

/// cinder: an in-memory key/value server speaking the Redis protocol.
#[derive(Parser, Debug)]
#[command(name = "cinder-server", version)]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 picks a free port).
    #[arg(long, short, default_value_t = 6379)]
    port: u16,

    /// Number of SELECT-able databases.
    #[arg(long, default_value_t = 16)]
    databases: u32,

    /// Memory budget, e.g. "100M" or "2G". Unlimited when omitted.
    #[arg(long)]
    maxmemory: Option<String>,

    /// Eviction policy: noeviction, allkeys-lru, volatile-lru.
    #[arg(long, default_value = "noeviction")]
    maxmemory_policy: String,

    /// Require clients to AUTH with this password.
    #[arg(long)]
    requirepass: Option<String>,

    /// Background tick frequency in hertz.
    #[arg(long, default_value_t = 10)]
    hz: u32,

    /// Disconnect clients idle for this many seconds (0 disables).
    #[arg(long, default_value_t = 0)]
    timeout: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinder=info".into()),
        )
        .init();

    let args = Args::parse();

    let max_memory = match args.maxmemory.as_deref().map(parse_byte_size).transpose() {
        Ok(v) => v,
        Err(e) => {
            error!("invalid --maxmemory: {e}");
            std::process::exit(1);
        }
    };
    let eviction_policy = match parse_eviction_policy(&args.maxmemory_policy) {
        Ok(v) => v,
        Err(e) => {
            error!("invalid --maxmemory-policy: {e}");
            std::process::exit(1);
        }
    };

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        databases: args.databases.max(1),
        max_memory,
        eviction_policy,
        requirepass: args.requirepass,
        hz: args.hz.max(1),
        client_timeout_secs: args.timeout,
    };

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("failed to start: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        error!("server terminated: {e}");
        std::process::exit(1);
    }
    info!("bye");
}
