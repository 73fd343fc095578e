//! Environment-driven gateway settings.
//!
//! Every recognized variable has a default so the gateway boots in a bare
//! environment; `dotenvy` is loaded by the binaries before `from_env()`.

use std::net::SocketAddr;
use std::path::PathBuf;

use bv_types::{LlmMode, StageTimeoutsMs};

/// Default byte budget for the prompt bundle.
pub const DEFAULT_MAX_PROMPT_BYTES: usize = 8192;
/// Default soft threshold below which no truncation happens.
pub const DEFAULT_SOFT_THRESHOLD_BYTES: usize = 6144;
/// Default minimum evidence items kept through truncation.
pub const DEFAULT_MIN_EVIDENCE_ITEMS: usize = 1;

/// ArangoDB connection settings for the search backend and the ops CLI.
#[derive(Debug, Clone)]
pub struct ArangoSettings {
    pub hosts: String,
    pub db: String,
    pub user: String,
    pub password: String,
}

/// Model invocation settings feeding `policy.llm`.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub mode: LlmMode,
    pub model_id: String,
    pub api_base: String,
    pub api_key: String,
}

/// Requests allowed per second, per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_second: u32,
}

impl RateLimit {
    /// Parse the `"<n>/second"` form used by `API_RATE_LIMIT_DEFAULT`.
    fn parse(raw: &str) -> Option<Self> {
        let (count, unit) = raw.split_once('/')?;
        if unit.trim() != "second" {
            return None;
        }
        count.trim().parse().ok().map(|per_second| Self { per_second })
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub gateway_bind: SocketAddr,
    pub gateway_base: String,
    pub memory_api_base: String,

    pub max_prompt_bytes: usize,
    pub soft_threshold_bytes: usize,
    pub min_evidence_items: usize,
    pub selector_model_id: String,

    pub enable_embeddings: bool,
    pub embedding_dim: usize,

    pub rate_limit: RateLimit,
    pub stage_timeouts: StageTimeoutsMs,

    pub arango: ArangoSettings,
    pub redis_url: Option<String>,
    pub minio_endpoint: Option<String>,
    pub minio_bucket: String,
    pub artifact_dir: PathBuf,

    pub llm: LlmSettings,
    pub signing_public_key_b64: Option<String>,
    pub gateway_version: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary lookup. Lets tests supply overrides
    /// without touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let parse_usize = |key: &str, default: usize| {
            get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let parse_u64 = |key: &str, default: u64| {
            get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };

        let stage_timeouts = StageTimeoutsMs {
            resolve: parse_u64("TIMEOUT_SEARCH_MS", 800),
            expand: parse_u64("TIMEOUT_GRAPH_EXPAND_MS", 250),
            enrich: parse_u64("TIMEOUT_ENRICH_MS", 600),
            llm: parse_u64("TIMEOUT_LLM_MS", 1500),
            validate: parse_u64("TIMEOUT_VALIDATOR_MS", 300),
            render: parse_u64("TIMEOUT_RENDER_MS", 50),
        };

        let llm_mode = match get("LLM_MODE").as_deref() {
            Some("off") => LlmMode::Off,
            _ => LlmMode::On,
        };

        Self {
            gateway_bind: get("GATEWAY_BIND")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8081))),
            gateway_base: get("GATEWAY_BASE")
                .unwrap_or_else(|| "http://localhost:8081".to_string()),
            memory_api_base: get("MEMORY_API_BASE")
                .unwrap_or_else(|| "http://localhost:8000".to_string()),

            max_prompt_bytes: parse_usize("MAX_PROMPT_BYTES", DEFAULT_MAX_PROMPT_BYTES),
            soft_threshold_bytes: parse_usize(
                "SOFT_THRESHOLD_BYTES",
                DEFAULT_SOFT_THRESHOLD_BYTES,
            ),
            min_evidence_items: parse_usize("MIN_EVIDENCE_ITEMS", DEFAULT_MIN_EVIDENCE_ITEMS),
            selector_model_id: get("SELECTOR_MODEL_ID")
                .unwrap_or_else(|| "deterministic-baseline".to_string()),

            enable_embeddings: matches!(
                get("ENABLE_EMBEDDINGS").as_deref(),
                Some("1") | Some("true") | Some("yes")
            ),
            embedding_dim: parse_usize("EMBEDDING_DIM", 768),

            rate_limit: get("API_RATE_LIMIT_DEFAULT")
                .as_deref()
                .and_then(RateLimit::parse)
                .unwrap_or(RateLimit { per_second: 50 }),
            stage_timeouts,

            arango: ArangoSettings {
                hosts: get("ARANGO_HOSTS").unwrap_or_else(|| "http://localhost:8529".to_string()),
                db: get("ARANGO_DB").unwrap_or_else(|| "batvault".to_string()),
                user: get("ARANGO_USER").unwrap_or_else(|| "root".to_string()),
                password: get("ARANGO_PASSWORD").unwrap_or_default(),
            },
            redis_url: get("REDIS_URL"),
            minio_endpoint: get("MINIO_ENDPOINT"),
            minio_bucket: get("MINIO_BUCKET").unwrap_or_else(|| "batvault-artifacts".to_string()),
            artifact_dir: get("ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./artifacts")),

            llm: LlmSettings {
                mode: llm_mode,
                model_id: get("LLM_MODEL_ID").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                api_base: get("OPENAI_API_BASE")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                api_key: get("OPENAI_API_KEY").unwrap_or_default(),
            },
            signing_public_key_b64: get("SIGNING_PUBLIC_KEY_B64"),
            gateway_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_with(vars: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings_with(&[]);
        assert_eq!(s.max_prompt_bytes, 8192);
        assert_eq!(s.soft_threshold_bytes, 6144);
        assert_eq!(s.min_evidence_items, 1);
        assert_eq!(s.embedding_dim, 768);
        assert!(!s.enable_embeddings);
        assert_eq!(s.llm.mode, LlmMode::On);
        assert_eq!(s.rate_limit.per_second, 50);
        assert_eq!(s.stage_timeouts.llm, 1500);
    }

    #[test]
    fn test_overrides() {
        let s = settings_with(&[
            ("MAX_PROMPT_BYTES", "4096"),
            ("LLM_MODE", "off"),
            ("ENABLE_EMBEDDINGS", "true"),
            ("TIMEOUT_LLM_MS", "500"),
            ("API_RATE_LIMIT_DEFAULT", "10/second"),
        ]);
        assert_eq!(s.max_prompt_bytes, 4096);
        assert_eq!(s.llm.mode, LlmMode::Off);
        assert!(s.enable_embeddings);
        assert_eq!(s.stage_timeouts.llm, 500);
        assert_eq!(s.rate_limit.per_second, 10);
    }

    #[test]
    fn test_rate_limit_parse_rejects_other_units() {
        assert_eq!(RateLimit::parse("10/minute"), None);
        assert_eq!(RateLimit::parse("garbage"), None);
        assert_eq!(
            RateLimit::parse("25/second"),
            Some(RateLimit { per_second: 25 })
        );
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let s = settings_with(&[("MAX_PROMPT_BYTES", "")]);
        assert_eq!(s.max_prompt_bytes, 8192);
    }
}
