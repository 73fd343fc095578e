//! Snapshot watcher: polls the Memory API for the current snapshot etag and
//! proactively evicts the cache when it changes. Cache keys embed the etag,
//! so this is an optimization on top of passive invalidation, not a
//! correctness requirement.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use bv_memory_client::MemoryApi;

use crate::cache::SnapshotCache;

/// Default poll cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub fn spawn_snapshot_watcher(
    memory: Arc<dyn MemoryApi>,
    cache: Arc<SnapshotCache>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut known: Option<String> = None;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match memory.snapshot_etag().await {
                Ok(etag) => {
                    if known.as_deref() != Some(etag.as_str()) {
                        if known.is_some() {
                            info!(snapshot_etag = %etag, "snapshot changed, evicting cache");
                            cache.evict_all().await;
                        }
                        known = Some(etag);
                    } else {
                        cache.purge_expired().await;
                    }
                }
                Err(error) => {
                    warn!(%error, "snapshot probe failed");
                }
            }
        }
    })
}
