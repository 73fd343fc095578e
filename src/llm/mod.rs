//! Model invocation with retry/timeout policy and strict output parsing.
//!
//! The caller streams tokens while accumulating the full text, then parses
//! the final chunk as a `WhyDecisionAnswer`. Parse and network failures are
//! retried up to twice inside the stage budget; schema failures are not
//! retried (the output is well-formed JSON of the wrong shape — another
//! attempt will not fix the model's contract).

pub mod http;
pub mod templater;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use bv_types::WhyDecisionAnswer;

use crate::prompt::SealedEnvelope;

pub use http::HttpLlmClient;

/// Maximum retries after the first attempt, on parse/network failures.
const MAX_RETRIES: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("model call timed out")]
    Timeout,
    #[error("model transport failure: {0}")]
    Transport(String),
    #[error("model output parse failure: {0}")]
    Parse(String),
    #[error("model output schema failure: {0}")]
    Schema(String),
}

impl LlmError {
    /// The `fallback_reason` recorded when this failure exhausts the stage.
    pub fn fallback_reason(&self) -> &'static str {
        match self {
            LlmError::Timeout => "llm_timeout",
            LlmError::Transport(_) => "llm_upstream_error",
            LlmError::Parse(_) => "llm_parse_error",
            LlmError::Schema(_) => "llm_schema_error",
        }
    }

    fn retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout | LlmError::Transport(_) | LlmError::Parse(_)
        )
    }
}

/// A model backend able to stream one completion.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion for the sealed envelope, forwarding token chunks
    /// through `tokens` as they arrive, and return the accumulated text.
    async fn complete(
        &self,
        envelope: &SealedEnvelope,
        tokens: mpsc::Sender<String>,
    ) -> Result<String, LlmError>;
}

/// Outcome of a successful model call.
#[derive(Debug, Clone)]
pub struct LlmResult {
    pub answer: WhyDecisionAnswer,
    pub raw: String,
    pub retries: u32,
}

pub struct LlmCaller {
    client: Arc<dyn LlmClient>,
}

impl LlmCaller {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    /// Invoke the model under `budget`, retrying per policy. On final
    /// failure the caller returns the last error together with how many
    /// retries were burned, so the orchestrator can fall back.
    pub async fn call(
        &self,
        envelope: &SealedEnvelope,
        budget: Duration,
        tokens: mpsc::Sender<String>,
    ) -> Result<LlmResult, (LlmError, u32)> {
        let started = Instant::now();
        let mut retries = 0u32;

        loop {
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err((LlmError::Timeout, retries));
            }

            let attempt = tokio::time::timeout(
                remaining,
                self.client.complete(envelope, tokens.clone()),
            )
            .await;

            let error = match attempt {
                Ok(Ok(raw)) => match parse_answer(&raw) {
                    Ok(answer) => {
                        return Ok(LlmResult {
                            answer,
                            raw,
                            retries,
                        })
                    }
                    Err(e) => e,
                },
                Ok(Err(e)) => e,
                Err(_) => LlmError::Timeout,
            };

            if !error.retryable() || retries >= MAX_RETRIES {
                return Err((error, retries));
            }
            retries += 1;
            warn!(retry = retries, error = %error, "model call failed, retrying");

            // Short jittered pause so a flapping upstream is not hammered
            // back-to-back within the stage budget.
            let jitter_ms = rand::thread_rng().gen_range(25..75);
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
        }
    }
}

/// Parse the accumulated model text into a `WhyDecisionAnswer`.
///
/// Non-JSON text is a `Parse` failure (retryable); well-formed JSON that
/// does not match the answer schema is a `Schema` failure (not retried).
pub fn parse_answer(raw: &str) -> Result<WhyDecisionAnswer, LlmError> {
    let cleaned = strip_fences(raw);
    let start = cleaned.find('{');
    let end = cleaned.rfind('}');
    let json_str = match (start, end) {
        (Some(s), Some(e)) if s < e => &cleaned[s..=e],
        _ => {
            return Err(LlmError::Parse(format!(
                "no JSON object in {} chars of output",
                cleaned.len()
            )))
        }
    };

    let value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| LlmError::Parse(format!("invalid JSON: {e}")))?;
    debug!("model produced parseable JSON");
    serde_json::from_value(value).map_err(|e| LlmError::Schema(e.to_string()))
}

/// Remove a surrounding markdown code fence, if the model added one.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
        if let Some(end) = body.rfind("```") {
            return body[..end].trim();
        }
        return body.trim();
    }
    trimmed
}

/// Scripted model for tests: plays back a sequence of canned outputs, one
/// per attempt, optionally emitting token chunks first.
pub struct StubLlmClient {
    outputs: std::sync::Mutex<Vec<String>>,
    tokens_per_call: Vec<String>,
}

impl StubLlmClient {
    /// `outputs` are consumed front-to-back, one per `complete` call; the
    /// last entry repeats once exhausted.
    pub fn scripted(outputs: Vec<String>) -> Self {
        Self {
            outputs: std::sync::Mutex::new(outputs),
            tokens_per_call: Vec::new(),
        }
    }

    pub fn with_tokens(mut self, tokens: Vec<String>) -> Self {
        self.tokens_per_call = tokens;
        self
    }

    /// A stub that always answers with the given valid answer JSON.
    pub fn answering(answer: &WhyDecisionAnswer) -> Self {
        Self::scripted(vec![serde_json::to_string(answer).unwrap_or_default()])
    }
}

#[async_trait]
impl LlmClient for StubLlmClient {
    async fn complete(
        &self,
        _envelope: &SealedEnvelope,
        tokens: mpsc::Sender<String>,
    ) -> Result<String, LlmError> {
        for t in &self.tokens_per_call {
            let _ = tokens.send(t.clone()).await;
        }
        let mut outputs = self.outputs.lock().expect("stub lock");
        let out = if outputs.len() > 1 {
            outputs.remove(0)
        } else {
            outputs.first().cloned().unwrap_or_default()
        };
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_types::{Anchor, AnchorType, EvidenceBundle, Intent, TransitionSet};
    use serde_json::Map;

    fn sealed() -> SealedEnvelope {
        let mut bundle = EvidenceBundle {
            anchor: Anchor {
                id: "panasonic#exit".to_string(),
                anchor_type: AnchorType::Decision,
                domain: "panasonic".to_string(),
                timestamp: "2012-03-01T00:00:00Z".parse().unwrap(),
                title: "Exit plasma".to_string(),
                option: None,
                decision_maker: None,
                x_extra: Map::new(),
            },
            events: vec![],
            transitions: TransitionSet::default(),
            allowed_ids: vec![],
        };
        bundle.refresh_allowed_ids();
        crate::prompt::seal(
            Intent::WhyDecision,
            "why",
            &bundle,
            &serde_json::json!({}),
            "sha256:p",
            "sha256:s",
        )
    }

    fn valid_answer_json() -> String {
        r#"{"short_answer":"Because demand collapsed.","supporting_ids":["panasonic#exit"]}"#
            .to_string()
    }

    #[test]
    fn test_parse_answer_accepts_plain_json() {
        let a = parse_answer(&valid_answer_json()).unwrap();
        assert_eq!(a.supporting_ids, vec!["panasonic#exit"]);
    }

    #[test]
    fn test_parse_answer_strips_fences() {
        let fenced = format!("```json\n{}\n```", valid_answer_json());
        assert!(parse_answer(&fenced).is_ok());
    }

    #[test]
    fn test_parse_answer_non_json_is_parse_error() {
        assert!(matches!(
            parse_answer("I think the decision was good."),
            Err(LlmError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_answer_wrong_shape_is_schema_error() {
        assert!(matches!(
            parse_answer(r#"{"answer":"nope"}"#),
            Err(LlmError::Schema(_))
        ));
    }

    #[tokio::test]
    async fn test_caller_retries_parse_failures_then_succeeds() {
        let client = StubLlmClient::scripted(vec![
            "garbage".to_string(),
            "still garbage".to_string(),
            valid_answer_json(),
        ]);
        let caller = LlmCaller::new(Arc::new(client));
        let (tx, _rx) = mpsc::channel(8);
        let result = caller
            .call(&sealed(), Duration::from_secs(5), tx)
            .await
            .unwrap();
        assert_eq!(result.retries, 2);
    }

    #[tokio::test]
    async fn test_caller_gives_up_after_two_retries() {
        let client = StubLlmClient::scripted(vec!["garbage".to_string()]);
        let caller = LlmCaller::new(Arc::new(client));
        let (tx, _rx) = mpsc::channel(8);
        let (err, retries) = caller
            .call(&sealed(), Duration::from_secs(5), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
        assert_eq!(retries, 2);
        assert_eq!(err.fallback_reason(), "llm_parse_error");
    }

    #[tokio::test]
    async fn test_caller_does_not_retry_schema_errors() {
        let client = StubLlmClient::scripted(vec![
            r#"{"wrong":"shape"}"#.to_string(),
            valid_answer_json(),
        ]);
        let caller = LlmCaller::new(Arc::new(client));
        let (tx, _rx) = mpsc::channel(8);
        let (err, retries) = caller
            .call(&sealed(), Duration::from_secs(5), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Schema(_)));
        assert_eq!(retries, 0);
    }

    #[tokio::test]
    async fn test_caller_forwards_tokens() {
        let client = StubLlmClient::scripted(vec![valid_answer_json()])
            .with_tokens(vec!["Because".to_string(), " demand".to_string()]);
        let caller = LlmCaller::new(Arc::new(client));
        let (tx, mut rx) = mpsc::channel(8);
        caller
            .call(&sealed(), Duration::from_secs(5), tx)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("Because"));
        assert_eq!(rx.recv().await.as_deref(), Some(" demand"));
    }
}
