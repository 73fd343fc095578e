//! HTTP model client speaking an OpenAI-compatible chat-completions API
//! with server-sent-event streaming.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::config::LlmSettings;
use crate::prompt::SealedEnvelope;

use super::{LlmClient, LlmError};

const SYSTEM_PROMPT: &str = "You answer questions about recorded decisions. \
You receive a JSON envelope containing the anchor decision, its one-hop \
evidence, and the exact set of citable ids (allowed_ids). Respond ONLY with \
a JSON object of shape {\"short_answer\": string (max 320 chars), \
\"supporting_ids\": [string], \"rationale_note\": string (optional, max 280 \
chars)}. Every id in supporting_ids MUST come from allowed_ids and MUST \
include the anchor id.";

/// Chat message of the completions request.
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// One streamed completion chunk.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

pub struct HttpLlmClient {
    api_base: String,
    api_key: String,
    model_id: String,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(Self {
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model_id: settings.model_id.clone(),
            client,
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(
        &self,
        envelope: &SealedEnvelope,
        tokens: mpsc::Sender<String>,
    ) -> Result<String, LlmError> {
        let envelope_json = String::from_utf8(envelope.canonical.clone())
            .map_err(|e| LlmError::Transport(format!("envelope not UTF-8: {e}")))?;

        let request = json!({
            "model": self.model_id,
            "messages": [
                ChatMessage { role: "system".to_string(), content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user".to_string(), content: envelope_json },
            ],
            "max_tokens": envelope.envelope.constraints.max_tokens,
            "temperature": 0.0,
            "stream": true,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "model endpoint rejected the request");
            return Err(LlmError::Transport(format!("HTTP {status}: {body}")));
        }

        // SSE framing: lines of `data: <json>`, terminated by `data: [DONE]`.
        let mut accumulated = String::new();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| LlmError::Transport(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    debug!(chars = accumulated.len(), "model stream complete");
                    return Ok(accumulated);
                }
                let Ok(chunk) = serde_json::from_str::<ChatChunk>(data) else {
                    continue;
                };
                if let Some(delta) = chunk
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.as_deref())
                {
                    accumulated.push_str(delta);
                    // Backpressure: a full token channel pauses this read
                    // loop until the emitter drains.
                    if tokens.send(delta.to_string()).await.is_err() {
                        return Err(LlmError::Transport(
                            "token consumer went away".to_string(),
                        ));
                    }
                }
            }
        }

        if accumulated.is_empty() {
            Err(LlmError::Transport("model stream ended empty".to_string()))
        } else {
            Ok(accumulated)
        }
    }
}
