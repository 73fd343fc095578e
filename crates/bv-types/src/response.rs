//! The v3 response envelope and the NDJSON stream line shapes.

use serde::{Deserialize, Serialize};

use crate::answer::{Intent, WhyDecisionAnswer};
use crate::evidence::{CompletenessFlags, EvidenceBundle};
use crate::meta::MetaInfo;

/// Response schema version emitted on every final line.
pub const SCHEMA_VERSION: &str = "v3";

/// The structured response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhyDecisionResponse {
    pub intent: Intent,
    pub evidence: EvidenceBundle,
    pub answer: WhyDecisionAnswer,
    pub completeness_flags: CompletenessFlags,
    pub meta: MetaInfo,
}

/// The outer envelope of the final NDJSON line and of `final.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseEnvelope {
    pub schema_version: String,
    pub response: WhyDecisionResponse,
}

impl ResponseEnvelope {
    pub fn new(response: WhyDecisionResponse) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            response,
        }
    }
}

/// One line of the NDJSON response body.
///
/// Ordering contract: any number of `token` lines, then exactly one `final`
/// line, or a single `error` line before close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "evt", rename_all = "lowercase")]
pub enum StreamEvent {
    Token {
        token: String,
    },
    Final {
        schema_version: String,
        response: Box<WhyDecisionResponse>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl StreamEvent {
    pub fn final_line(response: WhyDecisionResponse) -> Self {
        StreamEvent::Final {
            schema_version: SCHEMA_VERSION.to_string(),
            response: Box::new(response),
        }
    }

    /// Serialize to a single newline-terminated NDJSON line.
    pub fn to_ndjson_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            // Serialization of these shapes cannot fail; keep the stream
            // well-formed if it ever does.
            r#"{"evt":"error","code":"internal","message":"serialization failure"}"#.to_string()
        });
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_line_shape() {
        let line = StreamEvent::Token {
            token: "Because".to_string(),
        }
        .to_ndjson_line();
        assert_eq!(line, "{\"evt\":\"token\",\"token\":\"Because\"}\n");
    }

    #[test]
    fn test_error_line_shape() {
        let line = StreamEvent::Error {
            code: "timeout".to_string(),
            message: "stage resolve exceeded budget".to_string(),
        }
        .to_ndjson_line();
        assert!(line.starts_with("{\"evt\":\"error\""));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_final_line_carries_schema_version() {
        let json = serde_json::json!({
            "evt": "final",
            "schema_version": "v3",
        });
        // Round-trip shape check happens in the integration suite where a
        // full response is available; here we only pin the tag names.
        assert_eq!(json["evt"], "final");
    }
}
