//! concord-cli
//!
//! Operator CLI for the Concord admin JSON-RPC surface (SPEC_FULL.md §6
//! "Administrative operations"). Not a second implementation of the admin
//! API — purely a thin `reqwest`-over-JSON-RPC client wrapped in
//! `clap::Subcommand`, one subcommand per `concord-rpc` method.
//!
//! Usage:
//!   concord-cli create-tenant   --community <id> --tier <free|pro|enterprise>
//!   concord-cli upgrade-tenant  --community <id> --tier <free|pro|enterprise>
//!   concord-cli tenant-config   --community <id>
//!   concord-cli ledger-balance  --account <id> --pool <id>
//!   concord-cli breaker-state   --provider <name>
//!   concord-cli rotate-key      --key-id <id> --private-pem-file <path> --public-pem-file <path>
//!   concord-cli reconcile
//!   concord-cli propose-rule    --rule <id> --proposer <actor> --payload-file <path>
//!   concord-cli approve-rule    --rule <id> --approver <actor>

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod rpc_client;
use rpc_client::AdminRpcClient;

#[derive(Parser, Debug)]
#[command(
    name = "concord-cli",
    version,
    about = "Concord operator CLI — administer a running concord-node"
)]
struct Args {
    /// Admin RPC endpoint of the target node.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8645")]
    rpc: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision a tenant config for a community (idempotent).
    CreateTenant {
        #[arg(long)]
        community: String,
        #[arg(long)]
        tier: String,
    },

    /// Change an existing tenant's tier.
    UpgradeTenant {
        #[arg(long)]
        community: String,
        #[arg(long)]
        tier: String,
    },

    /// Read the active tenant config.
    TenantConfig {
        #[arg(long)]
        community: String,
    },

    /// Read per-pool lot balances for an account.
    LedgerBalance {
        #[arg(long)]
        account: String,
        #[arg(long)]
        pool: String,
    },

    /// Read the current circuit-breaker state for an upstream provider.
    BreakerState {
        #[arg(long)]
        provider: String,
    },

    /// Rotate the agent gateway's ES256 signing key. Requires a 48h overlap
    /// with the previous key — the node enforces this, not the CLI.
    RotateKey {
        #[arg(long)]
        key_id: String,
        /// PKCS8 EC private key PEM file.
        #[arg(long)]
        private_pem_file: PathBuf,
        /// SEC1/PEM EC public key file.
        #[arg(long)]
        public_pem_file: PathBuf,
    },

    /// Run one usage-reconciliation sweep immediately.
    Reconcile,

    /// Propose a revenue-rule override (four-eyes step 1).
    ProposeRule {
        #[arg(long)]
        rule: String,
        #[arg(long)]
        proposer: String,
        /// JSON file containing the proposed override payload.
        #[arg(long)]
        payload_file: PathBuf,
    },

    /// Approve a pending revenue-rule override (four-eyes step 2). Fails
    /// with `four_eyes_violation` if `approver` matches the proposer.
    ApproveRule {
        #[arg(long)]
        rule: String,
        #[arg(long)]
        approver: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn,concord_cli=info")
        .init();

    let args = Args::parse();
    let client = AdminRpcClient::new(&args.rpc);

    match args.command {
        Command::CreateTenant { community, tier } => {
            let cfg = client.create_tenant(&community, &tier).await?;
            print_tenant_config(&cfg);
            Ok(())
        }

        Command::UpgradeTenant { community, tier } => {
            let cfg = client.upgrade_tenant(&community, &tier).await?;
            print_tenant_config(&cfg);
            Ok(())
        }

        Command::TenantConfig { community } => {
            let cfg = client.get_tenant_config(&community).await?;
            print_tenant_config(&cfg);
            Ok(())
        }

        Command::LedgerBalance { account, pool } => {
            let balances = client.get_ledger_balance(&account, &pool).await?;
            if balances.is_empty() {
                println!("No lots found for account={account} pool={pool}");
                return Ok(());
            }
            for b in &balances {
                println!("account:   {}", b.account_id);
                println!("pool:      {}", b.pool_id);
                println!("available: {}", b.available_micro);
                println!("reserved:  {}", b.reserved_micro);
                println!("consumed:  {}", b.consumed_micro);
                println!("original:  {}", b.original_micro);
                println!();
            }
            Ok(())
        }

        Command::BreakerState { provider } => {
            let state = client.get_breaker_state(&provider).await?;
            println!("provider: {}", state.provider);
            println!("state:    {}", state.state);
            Ok(())
        }

        Command::RotateKey {
            key_id,
            private_pem_file,
            public_pem_file,
        } => {
            let private_pem = std::fs::read_to_string(&private_pem_file)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", private_pem_file.display()))?;
            let public_pem = std::fs::read_to_string(&public_pem_file)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", public_pem_file.display()))?;
            let active_key_id = client
                .rotate_signing_key(&key_id, &private_pem, &public_pem)
                .await?;
            println!("Signing key rotated. Active key id: {active_key_id}");
            println!("Previous key remains valid for the configured overlap window.");
            Ok(())
        }

        Command::Reconcile => {
            let report = client.trigger_reconciliation().await?;
            println!("Buckets examined: {}", report.buckets_examined);
            if report.drifts.is_empty() {
                println!("No drift detected.");
            } else {
                for d in &report.drifts {
                    println!(
                        "  {} / {}: local={} reported={} drift={} ({} bps) compensated={}",
                        d.community_id,
                        d.pool_id,
                        d.local_cost_micro,
                        d.reported_cost_micro,
                        d.drift_micro,
                        d.drift_bps,
                        d.compensated
                    );
                }
            }
            Ok(())
        }

        Command::ProposeRule {
            rule,
            proposer,
            payload_file,
        } => {
            let raw = std::fs::read_to_string(&payload_file)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", payload_file.display()))?;
            let payload: serde_json::Value =
                serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing payload JSON: {e}"))?;
            client.propose_rule_override(&rule, &proposer, payload).await?;
            println!("Proposed override for rule {rule} (proposer={proposer}).");
            println!("A different actor must call approve-rule before it takes effect.");
            Ok(())
        }

        Command::ApproveRule { rule, approver } => {
            let result = client.approve_rule_override(&rule, &approver).await?;
            println!("Rule:      {}", result.rule_id);
            println!("Proposer:  {}", result.proposer);
            println!("Approver:  {}", result.approver);
            println!("Approved:  {}", result.approved_at);
            Ok(())
        }
    }
}

fn print_tenant_config(cfg: &concord_rpc::RpcTenantConfig) {
    println!("community:   {}", cfg.community_id);
    println!("tier:        {}", cfg.tier);
    println!(
        "rate limits: minute={:?} hour={:?} day={:?}",
        cfg.rate_limit_minute, cfg.rate_limit_hour, cfg.rate_limit_day
    );
    println!("flags:       {}", cfg.feature_flags);
    println!("loaded at:   {}", cfg.loaded_at);
}
