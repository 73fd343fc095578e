//! ArangoDB-backed search: BM25 over the `nodes_search` view and cosine over
//! the `vec_hnsw_768` index, both through the HTTP cursor API.
//!
//! The same client carries the admin calls the ops CLI uses to bootstrap the
//! `text_en` analyzer, the search view, the vector index, and seed documents.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::ArangoSettings;

use super::{SearchBackend, SearchError, SearchHit};

/// Collection holding graph nodes.
pub const NODES_COLLECTION: &str = "nodes";
/// ArangoSearch view the BM25 queries run against.
pub const SEARCH_VIEW: &str = "nodes_search";
/// English text analyzer bootstrapped by the ops CLI.
pub const TEXT_ANALYZER: &str = "text_en";
/// Name of the optional 768-dim HNSW vector index.
pub const VECTOR_INDEX: &str = "vec_hnsw_768";

#[derive(Debug, Deserialize)]
struct CursorResponse {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    code: u16,
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
    #[serde(default)]
    result: Vec<Value>,
}

pub struct ArangoSearchBackend {
    base_url: String,
    db: String,
    user: String,
    password: String,
    client: reqwest::Client,
}

impl ArangoSearchBackend {
    pub fn new(settings: &ArangoSettings, timeout: Duration) -> Result<Self, SearchError> {
        // ARANGO_HOSTS may list several comma-separated endpoints; the
        // gateway talks to the first one.
        let base_url = settings
            .hosts
            .split(',')
            .next()
            .unwrap_or(&settings.hosts)
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            db: settings.db.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            client,
        })
    }

    fn db_url(&self, path: &str) -> String {
        format!("{}/_db/{}{}", self.base_url, self.db, path)
    }

    /// Run one AQL query and return the result rows.
    pub async fn cursor(&self, query: &str, bind_vars: Value) -> Result<Vec<Value>, SearchError> {
        let resp = self
            .client
            .post(self.db_url("/_api/cursor"))
            .basic_auth(&self.user, Some(&self.password))
            .json(&json!({
                "query": query,
                "bindVars": bind_vars,
                "batchSize": 1000,
            }))
            .send()
            .await?;

        let status = resp.status();
        let body: CursorResponse = resp
            .json()
            .await
            .map_err(|e| SearchError::Backend(format!("cursor decode: {e}")))?;
        if body.error || !status.is_success() {
            return Err(SearchError::Backend(format!(
                "AQL failed (HTTP {}, code {}): {}",
                status,
                body.code,
                body.error_message.unwrap_or_default()
            )));
        }
        Ok(body.result)
    }

    fn hits_from_rows(rows: Vec<Value>) -> Vec<SearchHit> {
        rows.into_iter()
            .filter_map(|row| {
                let id = row.get("id")?.as_str()?.to_string();
                let score = row.get("score")?.as_f64()?;
                let title = row
                    .get("title")
                    .and_then(|t| t.as_str())
                    .map(str::to_string);
                Some(SearchHit { id, score, title })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Admin operations (ops CLI)
    // ------------------------------------------------------------------

    /// Create the `text_en` analyzer if it does not already exist.
    pub async fn ensure_analyzer(&self) -> Result<(), SearchError> {
        let resp = self
            .client
            .post(self.db_url("/_api/analyzer"))
            .basic_auth(&self.user, Some(&self.password))
            .json(&json!({
                "name": TEXT_ANALYZER,
                "type": "text",
                "properties": {
                    "locale": "en",
                    "case": "lower",
                    "stemming": true,
                    "accent": false,
                },
                "features": ["frequency", "norm", "position"],
            }))
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => {
                info!(analyzer = TEXT_ANALYZER, "analyzer ready");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(analyzer = TEXT_ANALYZER, "analyzer already exists");
                Ok(())
            }
            s => Err(SearchError::Backend(format!(
                "analyzer create failed: HTTP {s}"
            ))),
        }
    }

    /// Create the `nodes_search` ArangoSearch view over the text fields.
    pub async fn ensure_view(&self) -> Result<(), SearchError> {
        let analyzer = format!("{}::{}", self.db, TEXT_ANALYZER);
        let field = json!({ "analyzers": [analyzer] });
        let resp = self
            .client
            .post(self.db_url("/_api/view"))
            .basic_auth(&self.user, Some(&self.password))
            .json(&json!({
                "name": SEARCH_VIEW,
                "type": "arangosearch",
                "links": {
                    NODES_COLLECTION: {
                        "fields": {
                            "rationale": field,
                            "description": field,
                            "reason": field,
                            "summary": field,
                        },
                        "includeAllFields": false,
                    }
                }
            }))
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => {
                info!(view = SEARCH_VIEW, "search view ready");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(view = SEARCH_VIEW, "search view already exists");
                Ok(())
            }
            s => Err(SearchError::Backend(format!("view create failed: HTTP {s}"))),
        }
    }

    /// Create the optional 768-dim HNSW cosine index on `embedding`.
    pub async fn ensure_vector_index(&self, dimension: usize) -> Result<(), SearchError> {
        let resp = self
            .client
            .post(self.db_url(&format!(
                "/_api/index?collection={NODES_COLLECTION}"
            )))
            .basic_auth(&self.user, Some(&self.password))
            .json(&json!({
                "name": VECTOR_INDEX,
                "type": "vector",
                "fields": ["embedding"],
                "params": {
                    "metric": "cosine",
                    "dimension": dimension,
                    "nLists": 100,
                },
            }))
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => {
                info!(index = VECTOR_INDEX, dimension, "vector index ready");
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            s => Err(SearchError::Backend(format!(
                "vector index create failed: HTTP {s}"
            ))),
        }
    }

    /// Bulk-insert seed documents into the nodes collection.
    pub async fn insert_documents(&self, docs: &[Value]) -> Result<usize, SearchError> {
        let resp = self
            .client
            .post(self.db_url(&format!(
                "/_api/document/{NODES_COLLECTION}?overwriteMode=replace"
            )))
            .basic_auth(&self.user, Some(&self.password))
            .json(docs)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SearchError::Backend(format!(
                "seed insert failed: HTTP {}",
                resp.status()
            )));
        }
        Ok(docs.len())
    }
}

#[async_trait]
impl SearchBackend for ArangoSearchBackend {
    async fn search_text(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        let aql = format!(
            "FOR d IN {SEARCH_VIEW} \
             SEARCH ANALYZER( \
               TOKENS(@q, \"{TEXT_ANALYZER}\") ANY IN d.rationale OR \
               TOKENS(@q, \"{TEXT_ANALYZER}\") ANY IN d.description OR \
               TOKENS(@q, \"{TEXT_ANALYZER}\") ANY IN d.reason OR \
               TOKENS(@q, \"{TEXT_ANALYZER}\") ANY IN d.summary, \
             \"{TEXT_ANALYZER}\") \
             SORT BM25(d) DESC, d.id ASC \
             LIMIT @limit \
             RETURN {{ id: d.id, score: BM25(d), title: d.title }}"
        );
        let rows = self
            .cursor(&aql, json!({ "q": query, "limit": limit }))
            .await?;
        Ok(Self::hits_from_rows(rows))
    }

    async fn search_vector(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let aql = format!(
            "FOR d IN {NODES_COLLECTION} \
             LET score = APPROX_NEAR_COSINE(d.embedding, @vector) \
             SORT score DESC, d.id ASC \
             LIMIT @limit \
             RETURN {{ id: d.id, score: score, title: d.title }}"
        );
        let rows = self
            .cursor(&aql, json!({ "vector": embedding, "limit": limit }))
            .await?;
        Ok(Self::hits_from_rows(rows))
    }
}
