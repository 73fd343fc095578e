//! One-hop graph expansion with concurrent enrichment.
//!
//! Fetches the candidate neighborhood from the Memory API, enriches every
//! neighbor id concurrently (ETag-aware through the snapshot cache),
//! de-duplicates by id, and attaches orientation to transitions. k is fixed
//! at 1; there are no in-code neighbor caps.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde_json::json;
use tracing::debug;

use bv_memory_client::{CandidateRef, MemoryApi};
use bv_types::{Anchor, Event, Orientation, StageTimeoutsMs, Transition};

use crate::cache::{SnapshotCache, TTL_ENRICH, TTL_EXPAND};
use crate::error::{GatewayError, Result};
use crate::pipeline::Stage;

/// The enriched one-hop neighborhood of an anchor.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Neighborhood {
    pub anchor: Anchor,
    pub events: Vec<Event>,
    pub preceding: Vec<Transition>,
    pub succeeding: Vec<Transition>,
}

impl Neighborhood {
    /// Flat adjacency of the neighborhood, canonicalized for `graph_fp`.
    pub fn adjacency(&self) -> serde_json::Value {
        let mut edges: Vec<serde_json::Value> = Vec::new();
        for e in &self.events {
            edges.push(json!({ "from": e.id, "to": self.anchor.id, "kind": "event" }));
        }
        for t in &self.preceding {
            edges.push(json!({ "from": t.from, "to": t.to, "kind": "transition", "id": t.id }));
        }
        for t in &self.succeeding {
            edges.push(json!({ "from": t.from, "to": t.to, "kind": "transition", "id": t.id }));
        }
        json!({ "anchor": self.anchor.id, "edges": edges })
    }
}

pub struct GraphExpander {
    memory: Arc<dyn MemoryApi>,
    cache: Arc<SnapshotCache>,
}

impl GraphExpander {
    pub fn new(memory: Arc<dyn MemoryApi>, cache: Arc<SnapshotCache>) -> Self {
        Self { memory, cache }
    }

    /// Expand and enrich under the per-stage budgets: the candidates call
    /// runs inside the expand deadline, the enrich fan-out inside the
    /// enrich deadline.
    pub async fn expand(
        &self,
        anchor_id: &str,
        snapshot_etag: &str,
        budgets: &StageTimeoutsMs,
    ) -> Result<Neighborhood> {
        let cache_key = SnapshotCache::key("expand", snapshot_etag, &json!({ "id": anchor_id }));
        if let Some(hit) = self.cache.get::<Neighborhood>(&cache_key).await {
            debug!(anchor_id, "expand cache hit");
            return Ok(hit);
        }

        let candidates = tokio::time::timeout(
            Duration::from_millis(budgets.expand),
            self.memory.expand_candidates(anchor_id),
        )
        .await
        .map_err(|_| GatewayError::StageTimeout {
            stage: Stage::Expand,
        })??;

        let enriched = tokio::time::timeout(Duration::from_millis(budgets.enrich), async {
            let anchor = self
                .enrich_anchor(&candidates.anchor.id, snapshot_etag)
                .await?;
            // Enrich all neighbors concurrently; ordering is restored by the
            // builder's deterministic sort, so join order does not matter.
            let events = try_join_all(
                dedupe(&candidates.events)
                    .into_iter()
                    .map(|id| self.enrich_event(id, snapshot_etag)),
            )
            .await?;
            let preceding = try_join_all(
                dedupe(&candidates.preceding)
                    .into_iter()
                    .map(|id| self.enrich_transition(id, snapshot_etag, Orientation::Preceding)),
            )
            .await?;
            let succeeding = try_join_all(
                dedupe(&candidates.succeeding)
                    .into_iter()
                    .map(|id| self.enrich_transition(id, snapshot_etag, Orientation::Succeeding)),
            )
            .await?;
            Ok::<Neighborhood, GatewayError>(Neighborhood {
                anchor,
                events,
                preceding,
                succeeding,
            })
        })
        .await
        .map_err(|_| GatewayError::StageTimeout {
            stage: Stage::Enrich,
        })??;

        self.cache.put(cache_key, &enriched, TTL_EXPAND).await;
        Ok(enriched)
    }

    async fn enrich_anchor(&self, id: &str, _snapshot_etag: &str) -> Result<Anchor> {
        let key = SnapshotCache::key("enrich/decision", "record", &json!(id));
        let cached: Option<CachedRecord<Anchor>> = self.cache.get(&key).await;
        let if_none_match = cached.as_ref().and_then(|c| c.etag.as_deref());
        let enriched = self.memory.enrich_decision(id, if_none_match).await?;
        settle("decision", id, enriched, cached, &self.cache, key).await
    }

    async fn enrich_event(&self, id: String, _snapshot_etag: &str) -> Result<Event> {
        let key = SnapshotCache::key("enrich/event", "record", &json!(id));
        let cached: Option<CachedRecord<Event>> = self.cache.get(&key).await;
        let if_none_match = cached.as_ref().and_then(|c| c.etag.as_deref());
        let enriched = self.memory.enrich_event(&id, if_none_match).await?;
        settle("event", &id, enriched, cached, &self.cache, key).await
    }

    async fn enrich_transition(
        &self,
        id: String,
        _snapshot_etag: &str,
        orientation: Orientation,
    ) -> Result<Transition> {
        let key = SnapshotCache::key("enrich/transition", "record", &json!(id));
        let cached: Option<CachedRecord<Transition>> = self.cache.get(&key).await;
        let if_none_match = cached.as_ref().and_then(|c| c.etag.as_deref());
        let enriched = self.memory.enrich_transition(&id, if_none_match).await?;
        let mut record = settle("transition", &id, enriched, cached, &self.cache, key).await?;
        record.orientation = Some(orientation);
        Ok(record)
    }
}

/// A cached enriched record together with the ETag it was served under,
/// for `If-None-Match` revalidation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CachedRecord<T> {
    etag: Option<String>,
    record: T,
}

/// Resolve a conditional enrich response: a fresh record replaces the cached
/// copy, a 304 revalidates it, and an empty response with no cached copy is
/// an upstream contract violation.
async fn settle<T: Clone + serde::Serialize>(
    kind: &str,
    id: &str,
    enriched: bv_memory_client::Enriched<T>,
    cached: Option<CachedRecord<T>>,
    cache: &SnapshotCache,
    key: String,
) -> Result<T> {
    match (enriched.record, cached) {
        (Some(record), _) => {
            cache
                .put(
                    key,
                    &CachedRecord {
                        etag: enriched.etag,
                        record: record.clone(),
                    },
                    TTL_ENRICH,
                )
                .await;
            Ok(record)
        }
        (None, Some(cached)) => Ok(cached.record),
        (None, None) => Err(GatewayError::Upstream(format!(
            "enrich {kind}/{id} returned no record"
        ))),
    }
}

/// Preserve first occurrence order while dropping duplicate ids.
fn dedupe(candidates: &[CandidateRef]) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|c| seen.insert(c.id.as_str()))
        .map(|c| c.id.clone())
        .collect()
}
