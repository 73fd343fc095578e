//! Response validation: schema shape, ID scope, lengths, completeness, and
//! transition-citation gating.
//!
//! The orchestrator runs this on the model's answer; on failure it swaps in
//! the templater's answer and validates again. The second pass failing is a
//! hard bug and is logged as critical by the pipeline.

use serde_json::json;

use bv_types::{
    CompletenessFlags, EvidenceBundle, Intent, RelationKind, ValidatorReport, WhyDecisionAnswer,
    MAX_RATIONALE_NOTE_CHARS, MAX_SHORT_ANSWER_CHARS,
};

/// Stable descriptor of the response contract; `schema_fp` is the
/// fingerprint of its canonical form.
pub fn schema_descriptor() -> serde_json::Value {
    json!({
        "name": "WhyDecisionResponse@1",
        "answer_schema": "WhyDecisionAnswer@1",
        "answer_fields": {
            "short_answer": { "type": "string", "max_chars": MAX_SHORT_ANSWER_CHARS },
            "supporting_ids": { "type": "array", "items": "string", "min_items": 1 },
            "rationale_note": { "type": "string", "max_chars": MAX_RATIONALE_NOTE_CHARS, "optional": true },
        },
        "evidence_fields": ["anchor", "events", "transitions", "allowed_ids"],
        "completeness_fields": ["has_preceding", "has_succeeding", "event_count"],
    })
}

/// `sha256:` fingerprint of the response schema descriptor.
pub fn schema_fingerprint() -> String {
    bv_canon::fingerprint_value(&schema_descriptor())
}

/// Validate an answer against the bundle it ships with.
pub fn validate(
    intent: Intent,
    question: &str,
    bundle: &EvidenceBundle,
    flags: &CompletenessFlags,
    answer: &WhyDecisionAnswer,
) -> ValidatorReport {
    let mut errors: Vec<String> = Vec::new();

    // Shape: typed parsing enforces the field set; the residual shape
    // check is the non-empty citation list.
    if answer.supporting_ids.is_empty() {
        errors.push("supporting_ids must not be empty".to_string());
    }

    // The anchor must be cited.
    if !answer.supporting_ids.contains(&bundle.anchor.id) {
        errors.push(format!(
            "anchor id {} missing from supporting_ids",
            bundle.anchor.id
        ));
    }

    // Citations stay inside the allowed set.
    for id in &answer.supporting_ids {
        if !bundle.allowed_ids.contains(id) {
            errors.push(format!("supporting id {id} not in allowed_ids"));
        }
    }

    // allowed_ids is the exact union over the shipped bundle.
    let expected = bundle.computed_allowed_ids();
    if bundle.allowed_ids != expected {
        errors.push(format!(
            "allowed_ids is not the exact anchor/events/transitions union \
             (got {}, expected {})",
            bundle.allowed_ids.len(),
            expected.len()
        ));
    }

    // Length caps.
    if answer.short_answer.chars().count() > MAX_SHORT_ANSWER_CHARS {
        errors.push(format!(
            "short_answer exceeds {MAX_SHORT_ANSWER_CHARS} chars"
        ));
    }
    if let Some(note) = &answer.rationale_note {
        if note.chars().count() > MAX_RATIONALE_NOTE_CHARS {
            errors.push(format!(
                "rationale_note exceeds {MAX_RATIONALE_NOTE_CHARS} chars"
            ));
        }
    }

    // Completeness flags match the bundle cardinalities.
    let computed_flags = bundle.completeness_flags();
    if *flags != computed_flags {
        errors.push("completeness_flags do not match evidence cardinalities".to_string());
    }

    // Transition citations must be exactly the orientation the
    // question asks for. ALIAS_OF edges are neither preceding nor
    // succeeding in the citation sense and are exempt from the gate.
    errors.extend(transition_gate_errors(intent, question, bundle, answer));

    ValidatorReport {
        ok: errors.is_empty(),
        errors,
    }
}

fn transition_gate_errors(
    intent: Intent,
    question: &str,
    bundle: &EvidenceBundle,
    answer: &WhyDecisionAnswer,
) -> Vec<String> {
    let gated_ids = |transitions: &[bv_types::Transition]| -> Vec<String> {
        transitions
            .iter()
            .filter(|t| t.relation != RelationKind::AliasOf)
            .map(|t| t.id.clone())
            .collect()
    };

    let all_transition_ids: Vec<String> = bundle
        .transitions
        .iter()
        .filter(|t| t.relation != RelationKind::AliasOf)
        .map(|t| t.id.clone())
        .collect();

    let mut cited: Vec<String> = answer
        .supporting_ids
        .iter()
        .filter(|id| all_transition_ids.contains(id))
        .cloned()
        .collect();
    if cited.is_empty() {
        return Vec::new();
    }
    cited.sort();

    let asks_what_next = question.to_lowercase().contains("what next");
    let expected: Option<(&str, Vec<String>)> = if asks_what_next {
        Some(("succeeding", gated_ids(&bundle.transitions.succeeding)))
    } else if intent == Intent::WhyDecision {
        Some(("preceding", gated_ids(&bundle.transitions.preceding)))
    } else {
        None
    };

    match expected {
        Some((orientation, mut expected_ids)) => {
            expected_ids.sort();
            if cited != expected_ids {
                vec![format!(
                    "cited transitions must be exactly the {orientation} set"
                )]
            } else {
                Vec::new()
            }
        }
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_types::{Anchor, AnchorType, Event, Orientation, Transition, TransitionSet};
    use serde_json::Map;

    fn anchor() -> Anchor {
        Anchor {
            id: "panasonic#exit".to_string(),
            anchor_type: AnchorType::Decision,
            domain: "panasonic".to_string(),
            timestamp: "2012-03-01T00:00:00Z".parse().unwrap(),
            title: "Exit plasma".to_string(),
            option: None,
            decision_maker: None,
            x_extra: Map::new(),
        }
    }

    fn event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            node_type: "event".to_string(),
            timestamp: "2011-06-01T00:00:00Z".parse().unwrap(),
            summary: None,
            description: None,
            tags: vec![],
            based_on: vec![],
            transitions: vec![],
            snippet: None,
            x_extra: Map::new(),
        }
    }

    fn transition(id: &str, relation: RelationKind, orientation: Orientation) -> Transition {
        Transition {
            id: id.to_string(),
            node_type: "transition".to_string(),
            timestamp: "2012-01-01T00:00:00Z".parse().unwrap(),
            from: "a".to_string(),
            to: "b".to_string(),
            relation,
            reason: None,
            summary: None,
            tags: vec![],
            orientation: Some(orientation),
            x_extra: Map::new(),
        }
    }

    fn bundle() -> EvidenceBundle {
        let mut b = EvidenceBundle {
            anchor: anchor(),
            events: vec![event("ev-1"), event("ev-2")],
            transitions: TransitionSet {
                preceding: vec![transition("tr-1", RelationKind::Causal, Orientation::Preceding)],
                succeeding: vec![transition("tr-2", RelationKind::LedTo, Orientation::Succeeding)],
            },
            allowed_ids: vec![],
        };
        b.refresh_allowed_ids();
        b
    }

    fn answer(ids: &[&str]) -> WhyDecisionAnswer {
        WhyDecisionAnswer {
            short_answer: "Because demand collapsed.".to_string(),
            supporting_ids: ids.iter().map(|s| s.to_string()).collect(),
            rationale_note: None,
        }
    }

    fn check(b: &EvidenceBundle, a: &WhyDecisionAnswer) -> ValidatorReport {
        validate(
            Intent::WhyDecision,
            "why was this decided",
            b,
            &b.completeness_flags(),
            a,
        )
    }

    #[test]
    fn test_valid_answer_passes() {
        let b = bundle();
        let report = check(&b, &answer(&["panasonic#exit", "ev-1"]));
        assert!(report.ok, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_missing_anchor_citation_fails() {
        let b = bundle();
        let report = check(&b, &answer(&["ev-1"]));
        assert!(!report.ok);
        assert!(report.errors.iter().any(|e| e.contains("anchor")));
    }

    #[test]
    fn test_out_of_scope_citation_fails() {
        let b = bundle();
        let report = check(&b, &answer(&["panasonic#exit", "rogue-id"]));
        assert!(!report.ok);
        assert!(report.errors.iter().any(|e| e.contains("rogue-id")));
    }

    #[test]
    fn test_empty_supporting_ids_fails() {
        let b = bundle();
        let report = check(&b, &answer(&[]));
        assert!(!report.ok);
    }

    #[test]
    fn test_mutated_allowed_ids_rejected() {
        let mut b = bundle();
        b.allowed_ids.retain(|id| id != "ev-2");
        let report = check(&b, &answer(&["panasonic#exit"]));
        assert!(!report.ok);
        assert!(report.errors.iter().any(|e| e.contains("exact")));

        let mut extra = bundle();
        extra.allowed_ids.push("zz-extra".to_string());
        let report = check(&extra, &answer(&["panasonic#exit"]));
        assert!(!report.ok);
    }

    #[test]
    fn test_overlong_short_answer_fails() {
        let b = bundle();
        let mut a = answer(&["panasonic#exit"]);
        a.short_answer = "x".repeat(321);
        let report = check(&b, &a);
        assert!(!report.ok);
    }

    #[test]
    fn test_overlong_rationale_note_fails() {
        let b = bundle();
        let mut a = answer(&["panasonic#exit"]);
        a.rationale_note = Some("x".repeat(281));
        let report = check(&b, &a);
        assert!(!report.ok);
    }

    #[test]
    fn test_wrong_completeness_flags_fail() {
        let b = bundle();
        let wrong = CompletenessFlags {
            has_preceding: false,
            has_succeeding: true,
            event_count: 2,
        };
        let report = validate(Intent::WhyDecision, "why", &b, &wrong, &answer(&["panasonic#exit"]));
        assert!(!report.ok);
    }

    #[test]
    fn test_why_citing_preceding_set_exactly_passes() {
        let b = bundle();
        let report = check(&b, &answer(&["panasonic#exit", "tr-1"]));
        assert!(report.ok, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_why_citing_succeeding_fails_gate() {
        let b = bundle();
        let report = check(&b, &answer(&["panasonic#exit", "tr-2"]));
        assert!(!report.ok);
        assert!(report.errors.iter().any(|e| e.contains("preceding")));
    }

    #[test]
    fn test_what_next_requires_succeeding_set() {
        let b = bundle();
        let flags = b.completeness_flags();
        let ok = validate(
            Intent::WhyDecision,
            "what next after the exit?",
            &b,
            &flags,
            &answer(&["panasonic#exit", "tr-2"]),
        );
        assert!(ok.ok, "errors: {:?}", ok.errors);

        let bad = validate(
            Intent::WhyDecision,
            "what next after the exit?",
            &b,
            &flags,
            &answer(&["panasonic#exit", "tr-1"]),
        );
        assert!(!bad.ok);
    }

    #[test]
    fn test_alias_of_exempt_from_gate() {
        let mut b = bundle();
        b.transitions.preceding.push(transition(
            "tr-alias",
            RelationKind::AliasOf,
            Orientation::Preceding,
        ));
        b.refresh_allowed_ids();
        // Citing the alias does not trigger the orientation gate, and the
        // gate over real transitions still applies unchanged.
        let report = check(&b, &answer(&["panasonic#exit", "tr-1", "tr-alias"]));
        assert!(report.ok, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_schema_fingerprint_is_stable() {
        assert_eq!(schema_fingerprint(), schema_fingerprint());
        assert!(bv_canon::is_fingerprint(&schema_fingerprint()));
    }
}
