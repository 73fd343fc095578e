//! Client for the Memory API: one-hop candidate expansion, per-record
//! enrichment with conditional fetch, and the schema explorer.
//!
//! `MemoryApi` is the seam the gateway depends on; `HttpMemoryClient` is the
//! production implementation and `StubMemoryClient` the in-process twin used
//! by tests and smoke tooling.

pub mod http;
pub mod stub;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bv_types::{Anchor, Event, Transition};

pub use http::HttpMemoryClient;
pub use stub::StubMemoryClient;

/// Response header carrying the current snapshot identity on every Memory
/// API response.
pub const SNAPSHOT_ETAG_HEADER: &str = "x-snapshot-etag";

/// Errors surfaced by Memory API calls.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("memory api returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("memory api transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("memory api response decode failure: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("memory api response missing snapshot etag")]
    MissingSnapshotEtag,
}

pub type Result<T> = std::result::Result<T, MemoryError>;

/// A bare node reference returned by candidate expansion. Enrichment turns
/// these into full records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidateRef {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

/// The one-hop neighborhood of an anchor, as ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpandCandidates {
    pub anchor: CandidateRef,
    #[serde(default)]
    pub events: Vec<CandidateRef>,
    #[serde(default)]
    pub preceding: Vec<CandidateRef>,
    #[serde(default)]
    pub succeeding: Vec<CandidateRef>,
}

/// An enrichment result: `record` is `None` when the server answered
/// `304 Not Modified` to an `If-None-Match` probe.
#[derive(Debug, Clone)]
pub struct Enriched<T> {
    pub record: Option<T>,
    pub etag: Option<String>,
}

/// Allowed relation types from the schema explorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaRels {
    pub relations: Vec<String>,
}

/// The Memory API surface the gateway consumes.
#[async_trait]
pub trait MemoryApi: Send + Sync {
    /// `POST /api/graph/expand_candidates` with `{id, k: 1}`.
    async fn expand_candidates(&self, id: &str) -> Result<ExpandCandidates>;

    /// `GET /api/enrich/decision/{id}`.
    async fn enrich_decision(&self, id: &str, if_none_match: Option<&str>)
        -> Result<Enriched<Anchor>>;

    /// `GET /api/enrich/event/{id}`.
    async fn enrich_event(&self, id: &str, if_none_match: Option<&str>) -> Result<Enriched<Event>>;

    /// `GET /api/enrich/transition/{id}`.
    async fn enrich_transition(
        &self,
        id: &str,
        if_none_match: Option<&str>,
    ) -> Result<Enriched<Transition>>;

    /// `GET /api/schema/rels`.
    async fn schema_rels(&self) -> Result<SchemaRels>;

    /// `GET /api/schema/fields` (raw, proxied by the gateway).
    async fn schema_fields(&self) -> Result<serde_json::Value>;

    /// The current snapshot identity, from the `X-Snapshot-ETag` response
    /// header of a lightweight probe.
    async fn snapshot_etag(&self) -> Result<String>;
}
