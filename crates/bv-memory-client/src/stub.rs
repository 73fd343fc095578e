//! In-process Memory API twin for tests and smoke tooling.
//!
//! Holds records in maps and answers the same contract as the HTTP client,
//! including ETag short-circuits and injectable upstream failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use bv_types::{Anchor, Event, Transition};

use crate::{
    CandidateRef, Enriched, ExpandCandidates, MemoryApi, MemoryError, Result, SchemaRels,
};

#[derive(Default)]
pub struct StubMemoryClient {
    snapshot: String,
    decisions: HashMap<String, Anchor>,
    events: HashMap<String, Event>,
    transitions: HashMap<String, Transition>,
    neighborhoods: HashMap<String, ExpandCandidates>,
    fail_expand: bool,
    enrich_calls: AtomicUsize,
}

impl StubMemoryClient {
    pub fn new(snapshot_etag: impl Into<String>) -> Self {
        Self {
            snapshot: snapshot_etag.into(),
            ..Self::default()
        }
    }

    pub fn with_decision(mut self, anchor: Anchor) -> Self {
        self.decisions.insert(anchor.id.clone(), anchor);
        self
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.events.insert(event.id.clone(), event);
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.insert(transition.id.clone(), transition);
        self
    }

    /// Register the one-hop neighborhood for an anchor id.
    pub fn with_neighborhood(
        mut self,
        anchor_id: &str,
        events: &[&str],
        preceding: &[&str],
        succeeding: &[&str],
    ) -> Self {
        let candidate = |id: &&str, node_type: &str| CandidateRef {
            id: (*id).to_string(),
            node_type: node_type.to_string(),
        };
        self.neighborhoods.insert(
            anchor_id.to_string(),
            ExpandCandidates {
                anchor: CandidateRef {
                    id: anchor_id.to_string(),
                    node_type: "decision".to_string(),
                },
                events: events.iter().map(|id| candidate(id, "event")).collect(),
                preceding: preceding
                    .iter()
                    .map(|id| candidate(id, "transition"))
                    .collect(),
                succeeding: succeeding
                    .iter()
                    .map(|id| candidate(id, "transition"))
                    .collect(),
            },
        );
        self
    }

    /// Make every expansion fail with an upstream error.
    pub fn failing_expand(mut self) -> Self {
        self.fail_expand = true;
        self
    }

    /// How many enrich calls this stub has served.
    pub fn enrich_call_count(&self) -> usize {
        self.enrich_calls.load(Ordering::Relaxed)
    }

    fn etag_for(&self, id: &str) -> String {
        format!("\"{}-{}\"", self.snapshot, id)
    }

    fn enriched<T: Clone>(&self, id: &str, if_none_match: Option<&str>, record: &T) -> Enriched<T> {
        let etag = self.etag_for(id);
        if if_none_match == Some(etag.as_str()) {
            Enriched {
                record: None,
                etag: Some(etag),
            }
        } else {
            Enriched {
                record: Some(record.clone()),
                etag: Some(etag),
            }
        }
    }
}

#[async_trait]
impl MemoryApi for StubMemoryClient {
    async fn expand_candidates(&self, id: &str) -> Result<ExpandCandidates> {
        if self.fail_expand {
            return Err(MemoryError::Upstream {
                status: 503,
                message: "injected expand failure".to_string(),
            });
        }
        self.neighborhoods
            .get(id)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))
    }

    async fn enrich_decision(
        &self,
        id: &str,
        if_none_match: Option<&str>,
    ) -> Result<Enriched<Anchor>> {
        self.enrich_calls.fetch_add(1, Ordering::Relaxed);
        self.decisions
            .get(id)
            .map(|record| self.enriched(id, if_none_match, record))
            .ok_or_else(|| MemoryError::NotFound(format!("decision/{id}")))
    }

    async fn enrich_event(&self, id: &str, if_none_match: Option<&str>) -> Result<Enriched<Event>> {
        self.enrich_calls.fetch_add(1, Ordering::Relaxed);
        self.events
            .get(id)
            .map(|record| self.enriched(id, if_none_match, record))
            .ok_or_else(|| MemoryError::NotFound(format!("event/{id}")))
    }

    async fn enrich_transition(
        &self,
        id: &str,
        if_none_match: Option<&str>,
    ) -> Result<Enriched<Transition>> {
        self.enrich_calls.fetch_add(1, Ordering::Relaxed);
        self.transitions
            .get(id)
            .map(|record| self.enriched(id, if_none_match, record))
            .ok_or_else(|| MemoryError::NotFound(format!("transition/{id}")))
    }

    async fn schema_rels(&self) -> Result<SchemaRels> {
        Ok(SchemaRels {
            relations: vec![
                "CAUSAL".to_string(),
                "LED_TO".to_string(),
                "ALIAS_OF".to_string(),
            ],
        })
    }

    async fn schema_fields(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "fields": ["rationale", "description", "reason", "summary"]
        }))
    }

    async fn snapshot_etag(&self) -> Result<String> {
        Ok(self.snapshot.clone())
    }
}
