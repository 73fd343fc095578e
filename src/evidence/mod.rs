//! Evidence assembly: normalize the enriched neighborhood into a bundle with
//! `allowed_ids` computed before any selection happens.

pub mod selector;

use bv_types::{normalize_tag, EvidenceBundle, Event, Transition, TransitionSet};

use crate::expander::Neighborhood;

/// Build an evidence bundle from an enriched neighborhood.
///
/// Tags are normalized to lower-kebab and de-duplicated; events and
/// transitions are sorted by (timestamp, id) so the bundle bytes are
/// deterministic for a given neighborhood. `allowed_ids` holds the exact
/// anchor ∪ events ∪ transitions union, unique and ascending.
pub fn build(neighborhood: Neighborhood) -> EvidenceBundle {
    let Neighborhood {
        anchor,
        mut events,
        mut preceding,
        mut succeeding,
    } = neighborhood;

    for event in &mut events {
        normalize_tags(&mut event.tags);
    }
    for transition in preceding.iter_mut().chain(succeeding.iter_mut()) {
        normalize_tags(&mut transition.tags);
    }

    events.sort_by(event_order);
    preceding.sort_by(transition_order);
    succeeding.sort_by(transition_order);

    let mut bundle = EvidenceBundle {
        anchor,
        events,
        transitions: TransitionSet {
            preceding,
            succeeding,
        },
        allowed_ids: Vec::new(),
    };
    bundle.refresh_allowed_ids();
    bundle
}

fn normalize_tags(tags: &mut Vec<String>) {
    let mut normalized: Vec<String> = tags
        .iter()
        .map(|t| normalize_tag(t))
        .filter(|t| !t.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    *tags = normalized;
}

fn event_order(a: &Event, b: &Event) -> std::cmp::Ordering {
    a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id))
}

fn transition_order(a: &Transition, b: &Transition) -> std::cmp::Ordering {
    a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_types::{Anchor, AnchorType, Orientation, RelationKind};
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

    fn event(id: &str, ts: &str, tags: &[&str]) -> Event {
        Event {
            id: id.to_string(),
            node_type: "event".to_string(),
            timestamp: ts.parse().unwrap(),
            summary: None,
            description: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            based_on: vec![],
            transitions: vec![],
            snippet: None,
            x_extra: Map::new(),
        }
    }

    fn transition(id: &str) -> Transition {
        Transition {
            id: id.to_string(),
            node_type: "transition".to_string(),
            timestamp: "2012-01-01T00:00:00Z".parse().unwrap(),
            from: "a".to_string(),
            to: "b".to_string(),
            relation: RelationKind::Causal,
            reason: None,
            summary: None,
            tags: vec![],
            orientation: Some(Orientation::Preceding),
            x_extra: Map::new(),
        }
    }

    #[test]
    fn test_build_sorts_and_computes_allowed_ids() {
        let n = Neighborhood {
            anchor: anchor(),
            events: vec![
                event("ev-b", "2011-06-01T00:00:00Z", &[]),
                event("ev-a", "2011-01-01T00:00:00Z", &[]),
            ],
            preceding: vec![transition("tr-1")],
            succeeding: vec![],
        };
        let bundle = build(n);
        assert_eq!(bundle.events[0].id, "ev-a");
        assert_eq!(
            bundle.allowed_ids,
            vec!["ev-a", "ev-b", "panasonic#exit", "tr-1"]
        );
    }

    #[test]
    fn test_build_normalizes_tags() {
        let n = Neighborhood {
            anchor: anchor(),
            events: vec![event(
                "ev-1",
                "2011-06-01T00:00:00Z",
                &["Market Share", "market-share", "TV_panels"],
            )],
            preceding: vec![],
            succeeding: vec![],
        };
        let bundle = build(n);
        assert_eq!(bundle.events[0].tags, vec!["market-share", "tv-panels"]);
    }

    #[test]
    fn test_same_timestamp_orders_by_id() {
        let n = Neighborhood {
            anchor: anchor(),
            events: vec![
                event("ev-z", "2011-06-01T00:00:00Z", &[]),
                event("ev-a", "2011-06-01T00:00:00Z", &[]),
            ],
            preceding: vec![],
            succeeding: vec![],
        };
        let bundle = build(n);
        assert_eq!(bundle.events[0].id, "ev-a");
    }
}
