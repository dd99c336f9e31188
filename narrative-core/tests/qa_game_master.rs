//! QA tests for the game master's reaction pipeline.
//!
//! These tests drive a full game master through scripted narrators:
//! - Initialization with and without a working backend
//! - Consequences and surprises feeding back into the world
//! - Player decisions shaping the offered choices
//!
//! Run with: `cargo test -p narrative-core --test qa_game_master`

use narrative_core::gm::agent::{GameMasterConfig, GameStatus, GAME_MASTER_PERSONA};
use narrative_core::gm::choice::CHOICE_PERSONA;
use narrative_core::gm::consequence::CONSEQUENCE_PERSONA;
use narrative_core::gm::surprise::{SurpriseState, SURPRISE_COOLDOWN_MS, SURPRISE_PERSONA};
use narrative_core::gm::{ChoiceContext, GameMaster, PlayStyle, PlayerDecision};
use narrative_core::testing::{
    assert_calls, assert_property, assert_property_near, assert_status, FailingNarrator, ScriptedNarrator,
    TestHarness, HARNESS_START_MS,
};
use narrative_core::world::WorldState;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn no_consequences() -> ScriptedNarrator {
    ScriptedNarrator::new().always(CONSEQUENCE_PERSONA.name, json!({"consequences": []}))
}

fn twist() -> Value {
    json!({
        "path": "properties.reality_stability",
        "value": 0.2,
        "intensity": 0.6,
        "description": "The sky cracks open"
    })
}

// =============================================================================
// INITIALIZATION
// =============================================================================

#[tokio::test]
async fn test_fresh_world_defaults() {
    let harness = TestHarness::new(ScriptedNarrator::new());
    assert_property_near(&harness, "properties.reality_stability", 0.85);
    assert_property(&harness, "timeline", json!("normal"));
    assert_status(&harness, GameStatus::Uninitialized);
}

#[tokio::test]
async fn test_initialize_survives_dead_backend() {
    let narrator = Arc::new(FailingNarrator::transport("connection refused"));
    let mut game = GameMaster::with_config(
        WorldState::new(),
        narrator.clone(),
        GameMasterConfig::default().with_seed(1),
    );

    game.initialize_world().await.expect("initialization always succeeds");

    assert!(game.is_running());
    assert_eq!(game.world().get_f64("properties.tech_level"), Some(0.7));
    assert_eq!(game.world().get_f64("system.stability"), Some(0.5));
    assert!(narrator.call_count() >= 1);
    assert_eq!(game.pending_reactions(), 0);
}

#[tokio::test]
async fn test_initialize_rejects_invalid_generated_world() {
    // Out-of-range slider: the whole document is rejected.
    let narrator = no_consequences().always(
        GAME_MASTER_PERSONA.name,
        json!({
            "timeline": "utopian",
            "properties": {"reality_stability": 3.0, "magic_level": 0.1, "tech_level": 0.9, "population": 0.8}
        }),
    );
    let mut harness = TestHarness::new(narrator);
    harness.game.initialize_world().await.unwrap();

    assert_property(&harness, "timeline", json!("normal"));
    assert_property_near(&harness, "properties.reality_stability", 0.85);
    assert_status(&harness, GameStatus::Running);
}

// =============================================================================
// REACTION PIPELINE
// =============================================================================

#[tokio::test]
async fn test_consequence_chain_is_recorded() {
    let narrator = ScriptedNarrator::new()
        .respond(
            CONSEQUENCE_PERSONA.name,
            json!({"consequences": [
                {"path": "properties.population", "value": 0.3, "description": "Refugees flee the rift"},
                {"path": "regions.north.sealed", "value": true}
            ]}),
        )
        .always(CONSEQUENCE_PERSONA.name, json!({"consequences": []}));
    let mut harness = TestHarness::new(narrator);

    harness
        .game
        .apply("properties.magic_level", json!(0.9))
        .await
        .unwrap();

    assert_property_near(&harness, "properties.population", 0.3);
    assert_property(&harness, "regions.north.sealed", json!(true));
    assert_calls(&harness, CONSEQUENCE_PERSONA.name, 3);

    let recent = harness.game.memory().recent_events(5);
    let paths: Vec<_> = recent.iter().filter_map(|e| e.path.as_deref()).collect();
    assert_eq!(
        paths,
        vec!["properties.magic_level", "properties.population", "regions.north.sealed"]
    );
}

#[tokio::test]
async fn test_surprise_respects_cooldown() {
    let narrator = no_consequences().always(SURPRISE_PERSONA.name, twist());
    let config = TestHarness::config().with_surprise_frequency(1.0);
    let mut harness = TestHarness::with_config(narrator, config);

    harness.game.apply("properties.magic_level", json!(0.5)).await.unwrap();
    assert_calls(&harness, SURPRISE_PERSONA.name, 1);
    assert_property_near(&harness, "properties.reality_stability", 0.2);
    assert_eq!(harness.game.surprise_state(), SurpriseState::Cooldown);

    harness.advance(SURPRISE_COOLDOWN_MS - 1);
    harness.game.apply("properties.magic_level", json!(0.6)).await.unwrap();
    assert_calls(&harness, SURPRISE_PERSONA.name, 1);

    harness.advance(1);
    assert_eq!(harness.game.surprise_state(), SurpriseState::Dormant);
    harness.game.apply("properties.magic_level", json!(0.7)).await.unwrap();
    assert_calls(&harness, SURPRISE_PERSONA.name, 2);
}

#[tokio::test]
async fn test_broken_consequence_reply_falls_back() {
    let narrator = ScriptedNarrator::new().always(
        CONSEQUENCE_PERSONA.name,
        json!({"consequences": [{"path": "", "value": 1}]}),
    );
    let mut harness = TestHarness::new(narrator);

    harness.game.apply("properties.magic_level", json!(0.4)).await.unwrap();
    assert_property_near(&harness, "system.stability", 0.5);
    assert_property_near(&harness, "properties.magic_level", 0.4);
}

#[tokio::test]
async fn test_snapshots_follow_transitions() {
    let narrator = no_consequences().always(
        GAME_MASTER_PERSONA.name,
        json!({"name": "Flood", "description": "The river rises", "path": "properties.population", "value": 0.45}),
    );
    let mut harness = TestHarness::new(narrator);
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    harness.game.subscribe(move |snapshot| {
        sink.lock().unwrap().push((snapshot.status, snapshot.recent_events.len()));
    });

    harness.game.initialize_world().await.unwrap();
    harness.game.progress_narrative().await.unwrap();
    harness.game.pause();
    harness.game.resume();

    let seen = statuses.lock().unwrap().clone();
    assert_eq!(
        seen.iter().map(|(status, _)| *status).collect::<Vec<_>>(),
        vec![GameStatus::Running, GameStatus::Running, GameStatus::Paused, GameStatus::Running]
    );
    assert!(seen.iter().all(|(_, events)| *events <= 5));
    assert_eq!(seen.last().unwrap().1, 5);
}

// =============================================================================
// PLAYER MODEL
// =============================================================================

#[tokio::test]
async fn test_aggressive_player_sees_aggressive_choice_first() {
    let choice = |style: &str| {
        json!({"text": "Storm the gate", "action": "attack", "style": style, "riskLevel": 0.5})
    };
    let narrator = no_consequences().always(
        CHOICE_PERSONA.name,
        json!({"choices": [choice("passive"), choice("neutral"), choice("aggressive")]}),
    );
    let mut harness = TestHarness::new(narrator);

    for _ in 0..3 {
        harness.game.record_player_decision(PlayerDecision {
            action_type: Some("aggressive".to_string()),
            risk_level: 0.5,
            ..PlayerDecision::default()
        });
    }
    assert_eq!(harness.game.analyzer().profile().play_style, PlayStyle::Aggressive);

    let choices = harness
        .game
        .generate_choices(&ChoiceContext::new("The gate is barred"))
        .await;
    assert_eq!(choices.len(), 3);
    assert_eq!(choices[0].choice.style, Some(PlayStyle::Aggressive));
    assert_eq!(choices[1].choice.style, Some(PlayStyle::Passive));
}

#[tokio::test]
async fn test_decision_time_uses_harness_clock() {
    let mut harness = TestHarness::new(no_consequences());
    let presented_at = HARNESS_START_MS;
    harness.advance(4_000);

    harness.game.record_player_decision(PlayerDecision {
        presented_at: Some(presented_at),
        ..PlayerDecision::default()
    });

    let history = harness.game.analyzer().history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].decision_time, 4_000);
    assert!((harness.game.analyzer().profile().decision_speed - 0.4).abs() < 1e-9);
}
