//! Resolver: map free text or a slug to an anchor id.
//!
//! Cascade: exact anchor-reference short-circuit, then lexical BM25 over the
//! search view, then (when embeddings are enabled) cosine similarity over the
//! vector index. Deterministic on ties: BM25 hits outrank vector hits, and
//! within a modality the lowest id wins.

pub mod arango;
pub mod vector;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use bv_types::is_anchor_ref;

use crate::error::{GatewayError, Result};
use vector::EmbeddingIndex;

/// How many candidates each modality contributes before merging.
const CANDIDATES_PER_MODALITY: usize = 10;

/// Errors internal to the search backends.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search backend failure: {0}")]
    Backend(String),
    #[error("search transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One scored hit from a search modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A lexical/vector index the resolver can query.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// BM25 search over `{rationale, description, reason, summary}`.
    async fn search_text(
        &self,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<SearchHit>, SearchError>;

    /// Cosine search over the HNSW vector index.
    async fn search_vector(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> std::result::Result<Vec<SearchHit>, SearchError>;
}

/// Resolver output: the winning anchor plus the ranked candidates that were
/// considered (absent on short-circuit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveResult {
    pub anchor_id: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<Vec<SearchHit>>,
}

pub struct Resolver {
    backend: Arc<dyn SearchBackend>,
    embeddings: Arc<dyn EmbeddingIndex>,
    enable_embeddings: bool,
}

impl Resolver {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        embeddings: Arc<dyn EmbeddingIndex>,
        enable_embeddings: bool,
    ) -> Self {
        Self {
            backend,
            embeddings,
            enable_embeddings,
        }
    }

    pub async fn resolve(&self, input: &str) -> Result<ResolveResult> {
        let input = input.trim();
        if input.is_empty() {
            return Err(GatewayError::BadRequest(
                "empty question and no anchor".to_string(),
            ));
        }

        // Canonical references bypass the cascade entirely.
        if is_anchor_ref(input) {
            debug!(anchor = input, "resolver short-circuit");
            return Ok(ResolveResult {
                anchor_id: input.to_string(),
                confidence: 1.0,
                matches: None,
            });
        }

        // Modality 0: lexical BM25.
        let mut candidates: Vec<(u8, SearchHit)> = self
            .backend
            .search_text(input, CANDIDATES_PER_MODALITY)
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?
            .into_iter()
            .map(|hit| (0u8, hit))
            .collect();

        // Modality 1: vector cosine, only when enabled and an embedding is
        // available for the query text.
        if self.enable_embeddings {
            if let Some(vector) = self
                .embeddings
                .embed(input)
                .await
                .map_err(|e| GatewayError::Upstream(e.to_string()))?
            {
                let vector_hits = self
                    .backend
                    .search_vector(&vector, CANDIDATES_PER_MODALITY)
                    .await
                    .map_err(|e| GatewayError::Upstream(e.to_string()))?;
                candidates.extend(vector_hits.into_iter().map(|hit| (1u8, hit)));
            }
        }

        if candidates.is_empty() {
            return Err(GatewayError::NotFound(input.to_string()));
        }

        // Highest score wins; ties break BM25-first, then lowest id.
        candidates.sort_by(|(ma, a), (mb, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ma.cmp(mb))
                .then(a.id.cmp(&b.id))
        });

        let best = candidates[0].1.clone();
        let confidence = squash(best.score);
        let matches = candidates.into_iter().map(|(_, hit)| hit).collect();

        Ok(ResolveResult {
            anchor_id: best.id,
            confidence,
            matches: Some(matches),
        })
    }
}

/// Squash a non-negative relevance score into (0, 1).
fn squash(score: f64) -> f64 {
    let s = score.max(0.0);
    s / (s + 1.0)
}

/// In-memory backend for tests and smoke checks: token-overlap scoring over
/// the same four text fields the production view indexes.
#[derive(Default)]
pub struct StaticSearchBackend {
    docs: Vec<(String, String)>,
}

impl StaticSearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_doc(mut self, id: &str, text: &str) -> Self {
        self.docs.push((id.to_string(), text.to_lowercase()));
        self
    }
}

#[async_trait]
impl SearchBackend for StaticSearchBackend {
    async fn search_text(
        &self,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<SearchHit>, SearchError> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let mut hits: Vec<SearchHit> = self
            .docs
            .iter()
            .filter_map(|(id, text)| {
                let overlap = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (overlap > 0).then(|| SearchHit {
                    id: id.clone(),
                    score: overlap as f64,
                    title: None,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn search_vector(
        &self,
        _embedding: &[f32],
        _limit: usize,
    ) -> std::result::Result<Vec<SearchHit>, SearchError> {
        Ok(Vec::new())
    }
}
