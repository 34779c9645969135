//! concord-node — the Concord core service binary.
//!
//! Startup sequence:
//!   1. Open the Postgres store and Redis cache, apply migrations
//!   2. Build the tenant-config cache and rate limiter
//!   3. Build the credit ledger and agent-gateway shared state
//!   4. Spawn the gateway shard pool (publisher side of the bus)
//!   5. Spawn the worker pool (consumer side of the bus)
//!   6. Start the admin JSON-RPC server and the Prometheus exporter
//!   7. Run periodic sweeps (reservation expiry, usage reconciliation)
//!      until SIGINT/SIGTERM, then drain in-flight work before exiting

mod config;
mod transport;
mod usage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use concord_agent::reconcile::ReconciliationSweep;
use concord_agent::{AgentConfig, ProviderBreakers, SigningKey, SigningKeyRing};
use concord_bus::PgBus;
use concord_gateway::{GatewayConfig, ShardPool};
use concord_kv::RedisCache;
use concord_ledger::{LedgerConfig, LedgerEngine};
use concord_rpc::{RpcServer, RpcServerState};
use concord_store::Store;
use concord_tenant::{RateLimiter, TenantCache};
use concord_worker::{DispatchContext, HandlerRegistry, Worker};

use config::Args;
use transport::UnconfiguredTransport;
use usage::NoUsageReports;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,concord=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("concord-node starting");

    // ── Store & bus ───────────────────────────────────────────────────────
    let store = Store::connect(&args.database_url)
        .await
        .context("connecting to Postgres")?;
    store.migrate().await.context("running store migrations")?;
    let store = Arc::new(store);

    let bus = Arc::new(PgBus::new(store.pool().clone()));
    bus.migrate().await.context("running bus migrations")?;

    // ── Shared cache (rate limits, idempotency locks, tenant-config) ─────
    let redis_cache = RedisCache::connect(&args.redis_url)
        .await
        .context("connecting to Redis")?;
    let shared_cache: Arc<dyn concord_kv::SharedCache> = Arc::new(redis_cache);

    // ── Tenant context & rate limiter ─────────────────────────────────────
    let tenant_cache = Arc::new(TenantCache::new(shared_cache.clone(), store.clone()));
    tokio::spawn(tenant_cache.clone().run_reload_listener());
    let _poll_handle = tenant_cache.clone().start_poll_loop();

    let limiter = Arc::new(RateLimiter::new(shared_cache.clone()));

    // ── Credit ledger ──────────────────────────────────────────────────────
    let ledger = LedgerEngine::new((*store).clone(), LedgerConfig::default());

    // ── Agent gateway shared state ─────────────────────────────────────────
    let agent_config = AgentConfig::default();

    let private_pem = std::fs::read_to_string(&args.signing_private_key_path)
        .context("reading signing private key")?;
    let public_pem = std::fs::read_to_string(&args.signing_public_key_path)
        .context("reading signing public key")?;
    let initial_key = SigningKey::from_ec_pem(
        args.signing_key_id.clone(),
        &private_pem,
        &public_pem,
        Utc::now(),
    )
    .map_err(|e| anyhow::anyhow!("loading initial signing key: {e}"))?;
    let keyring = Arc::new(RwLock::new(SigningKeyRing::new(
        initial_key,
        agent_config.signing_key_overlap_hours,
    )));

    let breakers = Arc::new(ProviderBreakers::new(
        agent_config.breaker_window_requests,
        agent_config.breaker_error_rate_threshold,
        agent_config.breaker_cooldown,
    ));

    let sweep = ReconciliationSweep::new(
        store.clone(),
        ledger.clone(),
        NoUsageReports,
        agent_config.clone(),
    );

    // ── Worker pool ─────────────────────────────────────────────────────────
    // No event handlers are registered at this layer — concrete command
    // handlers are deployment-specific business logic, out of scope here
    // (§1); an unhandled event type is a no-op success, not an error.
    let registry = Arc::new(HandlerRegistry::new());
    let dispatch_ctx = Arc::new(DispatchContext {
        cache: shared_cache.clone(),
        store: store.clone(),
        tenant_cache: tenant_cache.clone(),
        limiter: limiter.clone(),
        registry,
    });

    let shutdown = CancellationToken::new();

    let worker = Worker::new(
        bus.clone() as Arc<dyn concord_bus::BusConsumer>,
        dispatch_ctx,
        args.worker_subject_pattern.clone(),
        args.worker_max_in_flight,
    );
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    // ── Gateway shard pool ───────────────────────────────────────────────
    let gateway_config = GatewayConfig {
        shard_count: args.shard_count,
        shards_per_process: args.shards_per_process,
        shard_range_start: args.shard_range_start,
        ..GatewayConfig::default()
    };
    let shard_pool = ShardPool::new(gateway_config, bus.clone() as Arc<dyn concord_bus::BusPublisher>);
    let shard_pool_handle = tokio::spawn(
        shard_pool.run(|_shard_id| UnconfiguredTransport, shutdown.clone()),
    );

    // ── Admin RPC server ─────────────────────────────────────────────────
    let rpc_state = Arc::new(RpcServerState {
        store: store.clone(),
        tenant_cache: tenant_cache.clone(),
        ledger: ledger.clone(),
        keyring,
        breakers,
        sweep,
    });
    let background_state = rpc_state.clone();
    let rpc_handle = RpcServer::new(rpc_state)
        .start(args.rpc_addr)
        .await
        .context("starting admin RPC server")?;

    // ── Prometheus exporter ──────────────────────────────────────────────
    PrometheusBuilder::new()
        .with_http_listener(args.metrics_addr)
        .install()
        .context("installing Prometheus exporter")?;
    info!(addr = %args.metrics_addr, "Prometheus exporter listening");

    // ── Periodic sweeps ──────────────────────────────────────────────────
    let expire_sweep_shutdown = shutdown.clone();
    let expire_sweep_state = background_state.clone();
    let expire_sweep_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(args.expire_sweep_interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match expire_sweep_state.ledger.expire_sweep().await {
                        Ok(n) if n > 0 => info!(expired = n, "reservation expiry sweep"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "reservation expiry sweep failed"),
                    }
                }
                _ = expire_sweep_shutdown.cancelled() => break,
            }
        }
    });

    let reconciliation_shutdown = shutdown.clone();
    let reconciliation_state = background_state;
    let reconciliation_handle = tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(args.reconciliation_interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match reconciliation_state.sweep.run_once().await {
                        Ok(report) => info!(
                            buckets = report.buckets_examined,
                            compensations = report.drifts.iter().filter(|d| d.compensated).count(),
                            "usage reconciliation sweep"
                        ),
                        Err(e) => warn!(error = %e, "usage reconciliation sweep failed"),
                    }
                }
                _ = reconciliation_shutdown.cancelled() => break,
            }
        }
    });

    info!("concord-node ready");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received, draining");
    shutdown.cancel();

    let drain = Duration::from_secs(args.shutdown_drain_secs);
    let _ = tokio::time::timeout(
        drain,
        futures::future::join4(
            worker_handle,
            shard_pool_handle,
            expire_sweep_handle,
            reconciliation_handle,
        ),
    )
    .await;

    rpc_handle.stop().ok();
    info!("concord-node stopped");
    Ok(())
}
