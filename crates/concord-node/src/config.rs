use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// `concord-node` startup configuration. Mirrors the reference platform's
/// `chronx-node::Args`: one flat `clap::Parser` struct with `env` fallbacks,
/// loaded after `dotenvy::dotenv()` so a local `.env` file covers secrets
/// that shouldn't live on a command line.
#[derive(Parser, Debug)]
#[command(
    name = "concord-node",
    version,
    about = "Concord core — gateway ingress, worker dispatch, credit ledger, agent gateway"
)]
pub struct Args {
    /// Postgres connection string backing the store, bus, and ledger.
    #[arg(long, env = "CONCORD_DATABASE_URL")]
    pub database_url: String,

    /// Redis connection string backing the shared rate-limit/idempotency/
    /// tenant-cache layer.
    #[arg(long, env = "CONCORD_REDIS_URL")]
    pub redis_url: String,

    /// Admin JSON-RPC listen address.
    #[arg(long, env = "CONCORD_RPC_ADDR", default_value = "127.0.0.1:8645")]
    pub rpc_addr: SocketAddr,

    /// Prometheus exposition listen address.
    #[arg(long, env = "CONCORD_METRICS_ADDR", default_value = "127.0.0.1:9645")]
    pub metrics_addr: SocketAddr,

    /// Total shard count advertised to the upstream gateway.
    #[arg(long, env = "CONCORD_SHARD_COUNT", default_value_t = 1)]
    pub shard_count: u32,

    /// Shards owned by this process, starting at `shard_range_start`.
    #[arg(long, env = "CONCORD_SHARDS_PER_PROCESS", default_value_t = 1)]
    pub shards_per_process: u32,

    #[arg(long, env = "CONCORD_SHARD_RANGE_START", default_value_t = 0)]
    pub shard_range_start: u32,

    /// Subject pattern (SQL LIKE) the worker pool polls, e.g. `events.%`.
    #[arg(long, env = "CONCORD_WORKER_SUBJECT_PATTERN", default_value = "events.%")]
    pub worker_subject_pattern: String,

    /// Concurrent in-flight deliveries per worker.
    #[arg(long, env = "CONCORD_WORKER_MAX_IN_FLIGHT", default_value_t = 32)]
    pub worker_max_in_flight: usize,

    /// Interval between `LedgerEngine::expire_sweep` passes.
    #[arg(long, env = "CONCORD_EXPIRE_SWEEP_INTERVAL_SECS", default_value_t = 30)]
    pub expire_sweep_interval_secs: u64,

    /// Interval between usage-reconciliation sweeps.
    #[arg(long, env = "CONCORD_RECONCILIATION_INTERVAL_SECS", default_value_t = 3_600)]
    pub reconciliation_interval_secs: u64,

    /// Key id for the agent gateway's initial ES256 signing key.
    #[arg(long, env = "CONCORD_SIGNING_KEY_ID")]
    pub signing_key_id: String,

    /// Path to the PKCS8 EC private key PEM used to mint agent JWTs.
    #[arg(long, env = "CONCORD_SIGNING_PRIVATE_KEY_PATH")]
    pub signing_private_key_path: PathBuf,

    /// Path to the SEC1/PEM EC public key used to verify agent JWTs.
    #[arg(long, env = "CONCORD_SIGNING_PUBLIC_KEY_PATH")]
    pub signing_public_key_path: PathBuf,

    /// Graceful shutdown drain budget, in seconds, once SIGTERM/Ctrl-C
    /// arrives (§4.5 "Shutdown drain").
    #[arg(long, env = "CONCORD_SHUTDOWN_DRAIN_SECS", default_value_t = 120)]
    pub shutdown_drain_secs: u64,
}
