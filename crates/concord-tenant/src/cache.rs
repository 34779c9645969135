use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, info, warn};

use concord_kv::SharedCache;
use concord_store::Store;

use crate::config::TenantConfig;
use crate::error::TenantError;

/// In-process TTL for the L1 layer (§4.6: "30 s TTL"). Matches the
/// TTL+capacity idiom the agent-gateway reference file uses for its
/// positive/negative auth caches.
const L1_TTL_SECS: u64 = 30;
const L1_CAPACITY: u64 = 10_000;
const RELOAD_CHANNEL: &str = "concord:tenant:reload";
const L2_TTL_SECS: u64 = 120;

/// Two-level tenant-config cache: an in-process `moka` layer in front of a
/// shared `concord-kv` layer in front of the store of record. A reload
/// published on [`RELOAD_CHANNEL`] evicts the affected tenant from both the
/// local cache and (implicitly, via TTL) the shared layer; a 30 s poll loop
/// is the caller's responsibility via [`TenantCache::start_poll_loop`] to
/// cover missed pub/sub messages.
pub struct TenantCache {
    local: Cache<String, TenantConfig>,
    shared: Arc<dyn SharedCache>,
    store: Arc<Store>,
}

impl TenantCache {
    pub fn new(shared: Arc<dyn SharedCache>, store: Arc<Store>) -> Self {
        let local = Cache::builder()
            .max_capacity(L1_CAPACITY)
            .time_to_live(Duration::from_secs(L1_TTL_SECS))
            .build();
        Self {
            local,
            shared,
            store,
        }
    }

    /// Look up config for `community_id`: L1 → L2 → store → tier default.
    /// A tier-default result is cached (so repeated lookups for an
    /// unprovisioned tenant don't hammer the store) but never persisted.
    pub async fn get_or_load(&self, community_id: &str) -> Result<TenantConfig, TenantError> {
        if let Some(cfg) = self.local.get(community_id).await {
            return Ok(cfg);
        }

        if let Some(raw) = self.shared.get_string(&shared_key(community_id)).await? {
            if let Ok(cfg) = serde_json::from_str::<TenantConfig>(&raw) {
                self.local.insert(community_id.to_string(), cfg.clone()).await;
                return Ok(cfg);
            }
        }

        let cfg = match self.store.get_community(community_id).await? {
            Some(row) => TenantConfig::from_row(&row),
            None => {
                debug!(%community_id, "no stored tenant config, using tier default");
                TenantConfig::default_for_tier(community_id, concord_core::Tier::Free)
            }
        };

        self.populate(community_id, &cfg).await;
        Ok(cfg)
    }

    async fn populate(&self, community_id: &str, cfg: &TenantConfig) {
        self.local.insert(community_id.to_string(), cfg.clone()).await;
        if let Ok(raw) = serde_json::to_string(cfg) {
            if let Err(e) = self
                .shared
                .set_string_ex(&shared_key(community_id), &raw, L2_TTL_SECS)
                .await
            {
                warn!(error = %e, %community_id, "failed to populate shared tenant cache");
            }
        }
    }

    /// Evict `community_id` from the local layer. Called on reload messages
    /// and by the invalidate-then-refetch path after a config mutation.
    pub async fn invalidate(&self, community_id: &str) {
        self.local.invalidate(community_id).await;
        let _ = self.shared.delete(&shared_key(community_id)).await;
    }

    /// Broadcast an invalidation for `community_id` on the reload channel so
    /// other instances evict it too.
    pub async fn broadcast_invalidate(&self, community_id: &str) -> Result<(), TenantError> {
        self.invalidate(community_id).await;
        self.shared.publish(RELOAD_CHANNEL, community_id).await?;
        Ok(())
    }

    /// Subscribe to the reload channel and evict locally as messages
    /// arrive. Run as a background task for the lifetime of the process.
    pub async fn run_reload_listener(self: Arc<Self>) -> Result<(), TenantError> {
        let mut rx = self.shared.subscribe(RELOAD_CHANNEL).await?;
        info!("tenant cache reload listener started");
        while let Some(community_id) = rx.recv().await {
            self.local.invalidate(&community_id).await;
        }
        Ok(())
    }

    /// A 30 s poll loop that silently refreshes the local cache for any
    /// tenant it currently holds, covering messages missed during a
    /// disconnect (§4.6: "hot-reload must propagate within 30 s worst
    /// case").
    pub fn start_poll_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(L1_TTL_SECS));
            loop {
                interval.tick().await;
                for (community_id, _) in self.local.iter() {
                    self.local.invalidate(community_id.as_str()).await;
                }
            }
        })
    }
}

fn shared_key(community_id: &str) -> String {
    format!("tenant:config:{community_id}")
}
