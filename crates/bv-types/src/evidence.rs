//! Evidence records: anchors, events, transitions, and the bundle the
//! selector and validator operate on.
//!
//! The bundle invariant: `allowed_ids` equals the exact union of the
//! anchor id, event ids, and transition ids (both orientations), unique
//! and sorted ascending.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Anchor node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnchorType {
    Decision,
    Event,
}

/// Transition relation kinds allowed by the graph schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Causal,
    LedTo,
    AliasOf,
}

/// Which side of the anchor a transition sits on. Derived at expansion time,
/// never present in the enriched store record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Preceding,
    Succeeding,
}

/// The anchor record of an evidence bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Anchor {
    pub id: String,
    #[serde(rename = "type")]
    pub anchor_type: AnchorType,
    pub domain: String,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_maker: Option<String>,
    #[serde(rename = "x-extra", default, skip_serializing_if = "Map::is_empty")]
    pub x_extra: Map<String, Value>,
}

/// A one-hop neighbor event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub based_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(rename = "x-extra", default, skip_serializing_if = "Map::is_empty")]
    pub x_extra: Map<String, Value>,
}

/// A transition edge between two decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transition {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub relation: RelationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
    #[serde(rename = "x-extra", default, skip_serializing_if = "Map::is_empty")]
    pub x_extra: Map<String, Value>,
}

/// Transitions split by orientation relative to the anchor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionSet {
    #[serde(default)]
    pub preceding: Vec<Transition>,
    #[serde(default)]
    pub succeeding: Vec<Transition>,
}

impl TransitionSet {
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.preceding.iter().chain(self.succeeding.iter())
    }

    pub fn len(&self) -> usize {
        self.preceding.len() + self.succeeding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preceding.is_empty() && self.succeeding.is_empty()
    }
}

/// Evidence shipped with an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvidenceBundle {
    pub anchor: Anchor,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub transitions: TransitionSet,
    #[serde(default)]
    pub allowed_ids: Vec<String>,
}

impl EvidenceBundle {
    /// The exact union of anchor, event, and transition ids, unique and
    /// sorted ascending.
    pub fn computed_allowed_ids(&self) -> Vec<String> {
        let mut ids: BTreeSet<&str> = BTreeSet::new();
        ids.insert(self.anchor.id.as_str());
        for e in &self.events {
            ids.insert(e.id.as_str());
        }
        for t in self.transitions.iter() {
            ids.insert(t.id.as_str());
        }
        ids.into_iter().map(str::to_string).collect()
    }

    /// Re-establish the union invariant after any mutation of the
    /// evidence lists.
    pub fn refresh_allowed_ids(&mut self) {
        self.allowed_ids = self.computed_allowed_ids();
    }

    /// Completeness flags matching the bundle cardinalities.
    pub fn completeness_flags(&self) -> CompletenessFlags {
        CompletenessFlags {
            has_preceding: !self.transitions.preceding.is_empty(),
            has_succeeding: !self.transitions.succeeding.is_empty(),
            event_count: self.events.len(),
        }
    }

    /// Total candidate evidence items (events + both transition sides).
    pub fn item_count(&self) -> usize {
        self.events.len() + self.transitions.len()
    }
}

/// Flags summarizing what the neighborhood contained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompletenessFlags {
    pub has_preceding: bool,
    pub has_succeeding: bool,
    pub event_count: usize,
}

/// Normalize a tag to lower-kebab: lowercase, runs of non-alphanumerics
/// collapse to a single dash, no leading/trailing dash.
pub fn normalize_tag(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    let mut pending_dash = false;
    for ch in tag.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}
