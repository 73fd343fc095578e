//! HttpMemoryClient — calls the Memory API over HTTP.
//!
//! Error bodies are mapped to `MemoryError` based on HTTP status; every
//! response is expected to carry `X-Snapshot-ETag`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use bv_types::{Anchor, Event, Transition};

use crate::{
    Enriched, ExpandCandidates, MemoryApi, MemoryError, Result, SchemaRels, SNAPSHOT_ETAG_HEADER,
};

pub struct HttpMemoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMemoryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn error_from(resp: reqwest::Response) -> MemoryError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or(body);
        MemoryError::Upstream { status, message }
    }

    async fn enrich<T: DeserializeOwned>(
        &self,
        kind: &str,
        id: &str,
        if_none_match: Option<&str>,
    ) -> Result<Enriched<T>> {
        let mut req = self.client.get(self.url(&format!("/api/enrich/{kind}/{id}")));
        if let Some(etag) = if_none_match {
            req = req.header(IF_NONE_MATCH, etag);
        }
        let resp = req.send().await?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            let etag = header_string(&resp, ETAG.as_str());
            debug!(kind, id, "enrich not modified");
            return Ok(Enriched { record: None, etag });
        }
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(MemoryError::NotFound(format!("{kind}/{id}")));
        }
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }

        let etag = header_string(&resp, ETAG.as_str());
        let body = resp.text().await?;
        let record: T = serde_json::from_str(&body)?;
        Ok(Enriched {
            record: Some(record),
            etag,
        })
    }
}

fn header_string(resp: &reqwest::Response, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl MemoryApi for HttpMemoryClient {
    async fn expand_candidates(&self, id: &str) -> Result<ExpandCandidates> {
        let resp = self
            .client
            .post(self.url("/api/graph/expand_candidates"))
            .json(&json!({ "id": id, "k": 1 }))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn enrich_decision(
        &self,
        id: &str,
        if_none_match: Option<&str>,
    ) -> Result<Enriched<Anchor>> {
        self.enrich("decision", id, if_none_match).await
    }

    async fn enrich_event(&self, id: &str, if_none_match: Option<&str>) -> Result<Enriched<Event>> {
        self.enrich("event", id, if_none_match).await
    }

    async fn enrich_transition(
        &self,
        id: &str,
        if_none_match: Option<&str>,
    ) -> Result<Enriched<Transition>> {
        self.enrich("transition", id, if_none_match).await
    }

    async fn schema_rels(&self) -> Result<SchemaRels> {
        let resp = self.client.get(self.url("/api/schema/rels")).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn schema_fields(&self) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(self.url("/api/schema/fields"))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn snapshot_etag(&self) -> Result<String> {
        let resp = self.client.get(self.url("/api/schema/rels")).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        header_string(&resp, SNAPSHOT_ETAG_HEADER).ok_or(MemoryError::MissingSnapshotEtag)
    }
}
