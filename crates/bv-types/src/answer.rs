//! Answer records and query intents.

use serde::{Deserialize, Serialize};

/// Maximum length of `short_answer`, in characters.
pub const MAX_SHORT_ANSWER_CHARS: usize = 320;

/// Maximum length of `rationale_note`, in characters.
pub const MAX_RATIONALE_NOTE_CHARS: usize = 280;

/// What the caller is asking of the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    #[default]
    WhyDecision,
    WhoDecided,
    WhenDecided,
    Chains,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::WhyDecision => "why_decision",
            Intent::WhoDecided => "who_decided",
            Intent::WhenDecided => "when_decided",
            Intent::Chains => "chains",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The answer object produced by the LLM or the templater.
///
/// Invariants enforced by the validator: `supporting_ids` stays inside
/// the shipped bundle's `allowed_ids`, and the anchor id is cited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhyDecisionAnswer {
    pub short_answer: String,
    pub supporting_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale_note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_wire_names() {
        assert_eq!(
            serde_json::to_string(&Intent::WhyDecision).unwrap(),
            "\"why_decision\""
        );
        let parsed: Intent = serde_json::from_str("\"who_decided\"").unwrap();
        assert_eq!(parsed, Intent::WhoDecided);
    }

    #[test]
    fn test_intent_default_is_why() {
        assert_eq!(Intent::default(), Intent::WhyDecision);
    }

    #[test]
    fn test_answer_rejects_unknown_fields() {
        let raw = r#"{"short_answer":"x","supporting_ids":["a"],"confidence":0.9}"#;
        assert!(serde_json::from_str::<WhyDecisionAnswer>(raw).is_err());
    }

    #[test]
    fn test_answer_round_trip_without_note() {
        let a = WhyDecisionAnswer {
            short_answer: "Because demand collapsed.".to_string(),
            supporting_ids: vec!["a".to_string()],
            rationale_note: None,
        };
        let json = serde_json::to_string(&a).unwrap();
        assert!(!json.contains("rationale_note"));
        let back: WhyDecisionAnswer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
