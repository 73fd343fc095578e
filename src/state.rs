//! Shared application state wired at startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use bv_memory_client::{HttpMemoryClient, MemoryApi};

use crate::artifacts::{ArtifactStore, FsArtifactStore, HttpObjectStore};
use crate::cache::SnapshotCache;
use crate::config::Settings;
use crate::evidence::selector::SelectorConfig;
use crate::expander::GraphExpander;
use crate::llm::{HttpLlmClient, LlmCaller, LlmClient};
use crate::pipeline::Pipeline;
use crate::policy::PolicySnapshot;
use crate::resolver::arango::ArangoSearchBackend;
use crate::resolver::vector::{DisabledEmbeddings, EmbeddingIndex};
use crate::resolver::{Resolver, SearchBackend};
use crate::validator;

/// Shared state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub policy: Arc<PolicySnapshot>,
    pub policy_fp: String,
    pub schema_fp: String,
    pub memory: Arc<dyn MemoryApi>,
    pub cache: Arc<SnapshotCache>,
    pub store: Arc<dyn ArtifactStore>,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Wire production components from settings.
    pub fn build(settings: Settings) -> anyhow::Result<Self> {
        let outbound_timeout = Duration::from_millis(
            settings
                .stage_timeouts
                .resolve
                .max(settings.stage_timeouts.enrich)
                .max(settings.stage_timeouts.expand)
                + 250,
        );

        let memory: Arc<dyn MemoryApi> = Arc::new(
            HttpMemoryClient::new(settings.memory_api_base.clone(), outbound_timeout)
                .context("memory api client")?,
        );
        let search: Arc<dyn SearchBackend> = Arc::new(
            ArangoSearchBackend::new(&settings.arango, outbound_timeout)
                .map_err(|e| anyhow::anyhow!("arango backend: {e}"))?,
        );
        let llm: Arc<dyn LlmClient> = Arc::new(
            HttpLlmClient::new(&settings.llm).map_err(|e| anyhow::anyhow!("llm client: {e}"))?,
        );

        let store: Arc<dyn ArtifactStore> = match &settings.minio_endpoint {
            Some(endpoint) => {
                info!(endpoint, bucket = %settings.minio_bucket, "artifacts go to object store");
                Arc::new(HttpObjectStore::new(endpoint.clone(), settings.minio_bucket.clone()))
            }
            None => {
                info!(dir = %settings.artifact_dir.display(), "artifacts go to filesystem");
                Arc::new(FsArtifactStore::new(settings.artifact_dir.clone()))
            }
        };

        if settings.redis_url.is_some() {
            warn!("REDIS_URL is set but the external cache is not wired; using the in-process cache");
        }

        Self::with_components(
            settings,
            memory,
            search,
            Arc::new(DisabledEmbeddings),
            llm,
            store,
        )
    }

    /// Wire state from explicit components. Tests and smoke tooling inject
    /// stubs here.
    pub fn with_components(
        settings: Settings,
        memory: Arc<dyn MemoryApi>,
        search: Arc<dyn SearchBackend>,
        embeddings: Arc<dyn EmbeddingIndex>,
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn ArtifactStore>,
    ) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);
        let policy = Arc::new(PolicySnapshot::from_settings(&settings));
        let policy_fp = policy.fingerprint();
        let schema_fp = validator::schema_fingerprint();
        let cache = Arc::new(SnapshotCache::new());

        let resolver = Resolver::new(search, embeddings, settings.enable_embeddings);
        let expander = GraphExpander::new(memory.clone(), cache.clone());
        let llm_caller = LlmCaller::new(llm);
        let selector_config = SelectorConfig::from_settings(&settings);

        let pipeline = Arc::new(Pipeline::new(
            resolver,
            expander,
            llm_caller,
            store.clone(),
            cache.clone(),
            selector_config,
        ));

        Ok(Self {
            settings,
            policy,
            policy_fp,
            schema_fp,
            memory,
            cache,
            store,
            pipeline,
        })
    }
}
