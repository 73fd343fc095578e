//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Map;
use tempfile::TempDir;

use batvault_gateway::artifacts::FsArtifactStore;
use batvault_gateway::config::Settings;
use batvault_gateway::llm::StubLlmClient;
use batvault_gateway::resolver::vector::DisabledEmbeddings;
use batvault_gateway::resolver::StaticSearchBackend;
use batvault_gateway::state::AppState;
use bv_memory_client::StubMemoryClient;
use bv_types::{Anchor, AnchorType, Event, Orientation, RelationKind, Transition};

pub const SNAPSHOT: &str = "E1";
pub const ANCHOR_ID: &str = "panasonic#exit-plasma-2012";

pub fn anchor() -> Anchor {
    Anchor {
        id: ANCHOR_ID.to_string(),
        anchor_type: AnchorType::Decision,
        domain: "panasonic".to_string(),
        timestamp: "2012-03-01T00:00:00Z".parse().unwrap(),
        title: "Exit plasma TV production".to_string(),
        option: Some("Exit plasma production".to_string()),
        decision_maker: Some("Kazuhiro Tsuga".to_string()),
        x_extra: Map::new(),
    }
}

pub fn event(id: &str, ts: &str) -> Event {
    Event {
        id: id.to_string(),
        node_type: "event".to_string(),
        timestamp: ts.parse().unwrap(),
        summary: Some("plasma demand falls".to_string()),
        description: None,
        tags: vec!["market".to_string()],
        based_on: vec![],
        transitions: vec![],
        snippet: None,
        x_extra: Map::new(),
    }
}

pub fn transition(id: &str, relation: RelationKind, orientation: Orientation) -> Transition {
    Transition {
        id: id.to_string(),
        node_type: "transition".to_string(),
        timestamp: "2012-01-15T00:00:00Z".parse().unwrap(),
        from: "panasonic#cut-costs-2011".to_string(),
        to: ANCHOR_ID.to_string(),
        relation,
        reason: Some("cost pressure".to_string()),
        summary: None,
        tags: vec![],
        orientation: Some(orientation),
        x_extra: Map::new(),
    }
}

/// A stub memory service with the standard test neighborhood: two events,
/// one preceding and one succeeding transition.
pub fn memory() -> StubMemoryClient {
    StubMemoryClient::new(SNAPSHOT)
        .with_decision(anchor())
        .with_event(event("ev-demand-2011", "2011-06-01T00:00:00Z"))
        .with_event(event("ev-writedown-2011", "2011-10-01T00:00:00Z"))
        .with_transition(transition(
            "tr-cut-costs",
            RelationKind::Causal,
            Orientation::Preceding,
        ))
        .with_transition(transition(
            "tr-sell-plant",
            RelationKind::LedTo,
            Orientation::Succeeding,
        ))
        .with_neighborhood(
            ANCHOR_ID,
            &["ev-demand-2011", "ev-writedown-2011"],
            &["tr-cut-costs"],
            &["tr-sell-plant"],
        )
}

pub fn settings(llm_mode: &str) -> Settings {
    let mode = llm_mode.to_string();
    Settings::from_lookup(move |key| match key {
        "LLM_MODE" => Some(mode.clone()),
        _ => None,
    })
}

/// Wire an app with stub collaborators. Artifacts land in the returned
/// tempdir.
pub fn app(llm_mode: &str, llm_outputs: Vec<String>) -> (AppState, TempDir) {
    app_with(settings(llm_mode), llm_outputs)
}

pub fn app_with(settings: Settings, llm_outputs: Vec<String>) -> (AppState, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FsArtifactStore::new(dir.path()));
    let search = StaticSearchBackend::new().with_doc(
        ANCHOR_ID,
        "exit plasma tv production falling demand panel prices",
    );
    let llm = StubLlmClient::scripted(llm_outputs);

    let state = AppState::with_components(
        settings,
        Arc::new(memory()),
        Arc::new(search),
        Arc::new(DisabledEmbeddings),
        Arc::new(llm),
        store,
    )
    .expect("app state");
    (state, dir)
}

/// A model output that passes the validator for the standard neighborhood.
pub fn good_llm_answer() -> String {
    format!(
        r#"{{"short_answer":"Plasma demand collapsed and panel prices fell.","supporting_ids":["{ANCHOR_ID}","ev-demand-2011"]}}"#
    )
}
