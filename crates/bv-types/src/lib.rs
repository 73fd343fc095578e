//! BatVault data model.
//!
//! Tagged records with explicit field sets: unknown fields are rejected on
//! every wire type, and the only extension point is the `x-extra` object on
//! leaf records. Shared by the gateway, the memory client, and the tests.

pub mod anchor;
pub mod answer;
pub mod evidence;
pub mod meta;
pub mod response;

pub use anchor::{is_anchor_ref, AnchorParseError, AnchorRef};
pub use answer::{Intent, WhyDecisionAnswer, MAX_RATIONALE_NOTE_CHARS, MAX_SHORT_ANSWER_CHARS};
pub use evidence::{
    normalize_tag, Anchor, AnchorType, CompletenessFlags, Event, EvidenceBundle, Orientation,
    RelationKind, Transition, TransitionSet,
};
pub use meta::{
    Budgets, EvidenceCounts, EvidenceSets, ExcludedId, Fingerprints, LlmMode, LlmPolicy, MetaInfo,
    PayloadSource, PolicyMeta, RequestMeta, RuntimeMeta, SelectionMetrics, StageTimeoutsMs,
    TruncationMetrics, TruncationPass, ValidatorReport,
};
pub use response::{ResponseEnvelope, StreamEvent, WhyDecisionResponse, SCHEMA_VERSION};
