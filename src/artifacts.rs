//! Artifact persistence under `request_id/`.
//!
//! Every completed request writes six artifacts in a fixed order: envelope,
//! pre-selection evidence, post-selection evidence, raw model output,
//! validator report, final response. Writes are best-effort: a failing
//! store logs a warning and never blocks the response.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

pub const ENVELOPE: &str = "envelope.json";
pub const EVIDENCE_PRE: &str = "evidence.pre.json";
pub const EVIDENCE_POST: &str = "evidence.post.json";
pub const LLM_RAW: &str = "llm.raw.json";
pub const VALIDATOR_REPORT: &str = "validator.report.json";
pub const FINAL: &str = "final.json";

/// A write/read store for request artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, request_id: &str, name: &str, bytes: &[u8]) -> anyhow::Result<()>;
    async fn get(&self, request_id: &str, name: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// The artifact bytes of one completed request.
#[derive(Debug, Clone)]
pub struct RequestArtifacts {
    pub envelope: Vec<u8>,
    pub evidence_pre: Vec<u8>,
    pub evidence_post: Vec<u8>,
    /// `null` (the JSON literal) when `llm.mode = "off"`.
    pub llm_raw: Vec<u8>,
    pub validator_report: Vec<u8>,
    pub final_response: Vec<u8>,
}

impl RequestArtifacts {
    fn ordered(&self) -> [(&'static str, &[u8]); 6] {
        [
            (ENVELOPE, self.envelope.as_slice()),
            (EVIDENCE_PRE, self.evidence_pre.as_slice()),
            (EVIDENCE_POST, self.evidence_post.as_slice()),
            (LLM_RAW, self.llm_raw.as_slice()),
            (VALIDATOR_REPORT, self.validator_report.as_slice()),
            (FINAL, self.final_response.as_slice()),
        ]
    }
}

/// Write all artifacts in the contract order, best-effort.
pub async fn persist_all(
    store: &dyn ArtifactStore,
    request_id: &str,
    artifacts: &RequestArtifacts,
) {
    for (name, bytes) in artifacts.ordered() {
        if let Err(error) = store.put(request_id, name, bytes).await {
            warn!(request_id, name, %error, "artifact write failed");
        } else {
            debug!(request_id, name, bytes = bytes.len(), "artifact written");
        }
    }
}

/// Filesystem store: `<root>/<request_id>/<name>`.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, request_id: &str, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let dir = self.root.join(request_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(name), bytes).await?;
        Ok(())
    }

    async fn get(&self, request_id: &str, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.root.join(request_id).join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// MinIO-style object store: `PUT {endpoint}/{bucket}/{request_id}/{name}`.
/// The artifacts bucket is provisioned with an anonymous-write policy by the
/// deployment stack.
pub struct HttpObjectStore {
    endpoint: String,
    bucket: String,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            client: reqwest::Client::new(),
        }
    }

    fn object_url(&self, request_id: &str, name: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.bucket,
            request_id,
            name
        )
    }
}

#[async_trait]
impl ArtifactStore for HttpObjectStore {
    async fn put(&self, request_id: &str, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let resp = self
            .client
            .put(self.object_url(request_id, name))
            .header("content-type", "application/json")
            .body(bytes.to_vec())
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("object store returned HTTP {}", resp.status());
        }
        Ok(())
    }

    async fn get(&self, request_id: &str, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let resp = self
            .client
            .get(self.object_url(request_id, name))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            anyhow::bail!("object store returned HTTP {}", resp.status());
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts() -> RequestArtifacts {
        RequestArtifacts {
            envelope: b"{\"envelope\":true}".to_vec(),
            evidence_pre: b"{\"pre\":true}".to_vec(),
            evidence_post: b"{\"post\":true}".to_vec(),
            llm_raw: b"null".to_vec(),
            validator_report: b"{\"ok\":true}".to_vec(),
            final_response: b"{\"final\":true}".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        persist_all(&store, "req-1", &artifacts()).await;

        let envelope = store.get("req-1", ENVELOPE).await.unwrap().unwrap();
        assert_eq!(envelope, b"{\"envelope\":true}");
        let llm_raw = store.get("req-1", LLM_RAW).await.unwrap().unwrap();
        assert_eq!(llm_raw, b"null");
    }

    #[tokio::test]
    async fn test_fs_store_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        assert!(store.get("nope", FINAL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persist_all_survives_store_failure() {
        struct FailingStore;

        #[async_trait]
        impl ArtifactStore for FailingStore {
            async fn put(&self, _: &str, _: &str, _: &[u8]) -> anyhow::Result<()> {
                anyhow::bail!("disk on fire")
            }
            async fn get(&self, _: &str, _: &str) -> anyhow::Result<Option<Vec<u8>>> {
                Ok(None)
            }
        }

        // Must not panic or propagate.
        persist_all(&FailingStore, "req-1", &artifacts()).await;
    }

    #[tokio::test]
    async fn test_all_six_artifacts_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        persist_all(&store, "req-2", &artifacts()).await;
        for name in [
            ENVELOPE,
            EVIDENCE_PRE,
            EVIDENCE_POST,
            LLM_RAW,
            VALIDATOR_REPORT,
            FINAL,
        ] {
            assert!(store.get("req-2", name).await.unwrap().is_some(), "{name}");
        }
    }
}
