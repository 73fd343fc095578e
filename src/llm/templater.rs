//! Deterministic fallback answers.
//!
//! Used when the model is off, fails its retry budget, or produces output
//! the validator rejects. The templater builds a fixed-shape sentence from
//! the anchor and the transition counts, and cites `[anchor.id]` plus the
//! two best-scored event ids, intersected with `allowed_ids` — a shape that
//! can never fail schema or ID-scope checks.

use bv_types::{EvidenceBundle, Intent, WhyDecisionAnswer, MAX_SHORT_ANSWER_CHARS};

use crate::evidence::selector::item_score;

/// How many event ids the fallback cites beyond the anchor.
const CITED_EVENTS: usize = 2;

/// Build the deterministic fallback answer for a bundle.
pub fn fallback_answer(intent: Intent, bundle: &EvidenceBundle) -> WhyDecisionAnswer {
    WhyDecisionAnswer {
        short_answer: clamp_chars(&sentence(intent, bundle), MAX_SHORT_ANSWER_CHARS),
        supporting_ids: supporting_ids(bundle),
        rationale_note: None,
    }
}

fn sentence(intent: Intent, bundle: &EvidenceBundle) -> String {
    let anchor = &bundle.anchor;
    let subject = anchor.option.as_deref().unwrap_or(&anchor.title);
    let preceding = bundle.transitions.preceding.len();
    let succeeding = bundle.transitions.succeeding.len();
    let events = bundle.events.len();

    match intent {
        Intent::WhyDecision => format!(
            "{subject}: supported by {events} recorded event{} in the decision's \
             neighborhood, with {preceding} preceding and {succeeding} succeeding \
             transition{}.",
            plural(events),
            plural(succeeding),
        ),
        Intent::WhoDecided => match &anchor.decision_maker {
            Some(maker) => format!("{subject} was decided by {maker}."),
            None => format!("{subject}: no decision maker is recorded for this decision."),
        },
        Intent::WhenDecided => format!(
            "{subject} was decided on {}.",
            anchor.timestamp.format("%Y-%m-%d")
        ),
        Intent::Chains => format!(
            "{subject} sits in a chain with {preceding} preceding and {succeeding} \
             succeeding transition{} within its one-hop neighborhood.",
            plural(succeeding),
        ),
    }
}

fn supporting_ids(bundle: &EvidenceBundle) -> Vec<String> {
    let mut cited: Vec<String> = vec![bundle.anchor.id.clone()];

    // Best two events by the selector's own score, ties to the lower id.
    let mut scored: Vec<(&String, f64)> = bundle
        .events
        .iter()
        .map(|e| {
            (
                &e.id,
                item_score(&bundle.anchor, e.timestamp, &e.tags, None),
            )
        })
        .collect();
    scored.sort_by(|(id_a, score_a), (id_b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(id_a.cmp(id_b))
    });
    cited.extend(scored.iter().take(CITED_EVENTS).map(|(id, _)| (*id).clone()));

    cited.retain(|id| bundle.allowed_ids.contains(id));
    cited.sort();
    cited.dedup();
    // With zero events the anchor alone is cited; allowed_ids always
    // contains the anchor, so the list cannot end up empty.
    cited
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Truncate to at most `max` characters on a char boundary.
fn clamp_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}
