//! QA tests for save/load and state round trips.
//!
//! These tests verify that world and agent state survive serialization.
//! Run with: `cargo test -p narrative-core --test qa_persistence`

use narrative_core::gm::agent::{GameMasterConfig, GameStatus};
use narrative_core::gm::consequence::CONSEQUENCE_PERSONA;
use narrative_core::gm::{GameMaster, GameMasterError, NarrativeMemory, PlayerAnalyzer, PlayerDecision};
use narrative_core::persist::{list_saves, PersistError, SavedSession, SAVE_VERSION};
use narrative_core::testing::{ScriptedNarrator, TestHarness};
use narrative_core::world::WorldState;
use serde_json::{json, Map};
use std::sync::Arc;
use tempfile::TempDir;

fn quiet() -> ScriptedNarrator {
    ScriptedNarrator::new().always(CONSEQUENCE_PERSONA.name, json!({"consequences": []}))
}

async fn played_harness() -> TestHarness {
    let mut harness = TestHarness::new(quiet());
    harness.game.initialize_world().await.unwrap();
    harness
        .game
        .apply("properties.magic_level", json!(0.65))
        .await
        .unwrap();
    harness.game.add_timeline_branch("the comet returns", "magical", 0.25);
    harness.game.record_interaction(&["mara", "oren"], Map::new());
    harness.game.record_player_decision(PlayerDecision {
        action_type: Some("passive".to_string()),
        content_type: Some("mystery".to_string()),
        satisfaction: 0.8,
        ..PlayerDecision::default()
    });
    harness
}

// =============================================================================
// TEST 1: World round trip
// =============================================================================

#[test]
fn test_world_round_trip_preserves_every_path() {
    let mut world = WorldState::new();
    world.set_property("properties.magic_level", json!(0.42)).unwrap();
    world.set_property("regions.south.capital", json!("Velm")).unwrap();
    world.add_timeline_branch("eclipse", "post-apocalyptic", 0.1);

    let restored = WorldState::from_json(&world.to_json().unwrap()).unwrap();
    for path in [
        "id",
        "timeline",
        "properties.magic_level",
        "properties.population",
        "regions.south.capital",
        "possibleBranches.0.timeline",
    ] {
        assert_eq!(restored.get_property(path), world.get_property(path), "path {path}");
    }
    assert_eq!(restored.snapshot(), world.snapshot());
}

// =============================================================================
// TEST 2: Agent round trips
// =============================================================================

#[tokio::test]
async fn test_memory_and_analyzer_round_trip() {
    let harness = played_harness().await;

    let memory = NarrativeMemory::from_json(&harness.game.memory().to_json().unwrap()).unwrap();
    assert_eq!(&memory, harness.game.memory());

    let analyzer = PlayerAnalyzer::from_json(&harness.game.analyzer().to_json().unwrap()).unwrap();
    assert_eq!(&analyzer, harness.game.analyzer());
}

// =============================================================================
// TEST 3: Save and load a whole session
// =============================================================================

#[tokio::test]
async fn test_save_and_load_session() {
    let harness = played_harness().await;
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path = dir.path().join("session.json");

    harness.game.save(&path).await.expect("Failed to save");
    assert!(path.exists(), "Save file should exist after saving");

    let loaded = GameMaster::<WorldState>::load(&path, Arc::new(quiet()), TestHarness::config())
        .await
        .expect("Failed to load");

    assert_eq!(loaded.status(), GameStatus::Running);
    assert_eq!(loaded.world().snapshot(), harness.game.world().snapshot());
    assert_eq!(loaded.world().branches().len(), 1);
    assert_eq!(loaded.memory().len(), harness.game.memory().len());
    assert!(loaded.memory().relationship("oren", "mara").is_some());
    assert_eq!(loaded.analyzer().history().len(), 1);
    assert_eq!(
        loaded.consequences().cache_len(),
        harness.game.consequences().cache_len()
    );
}

#[tokio::test]
async fn test_loaded_session_keeps_reacting() {
    let harness = played_harness().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("session.json");
    harness.game.save(&path).await.unwrap();

    let narrator = Arc::new(quiet());
    let mut loaded = GameMaster::<WorldState>::load(&path, narrator.clone(), TestHarness::config())
        .await
        .unwrap();
    let before = loaded.memory().len();
    loaded.apply("properties.population", json!(0.1)).await.unwrap();

    assert_eq!(loaded.memory().len(), before + 1);
    assert_eq!(narrator.call_count(CONSEQUENCE_PERSONA.name), 1);
}

#[tokio::test]
async fn test_save_metadata_and_listing() {
    let harness = played_harness().await;
    let dir = TempDir::new().unwrap();
    harness.game.save(dir.path().join("one.json")).await.unwrap();

    let saves = list_saves(dir.path()).await.unwrap();
    assert_eq!(saves.len(), 1);
    let metadata = &saves[0].metadata;
    assert_eq!(metadata.world_id, harness.game.world().id());
    assert_eq!(metadata.timeline, "normal");
    assert_eq!(metadata.status, GameStatus::Running);
    assert_eq!(metadata.event_count, harness.game.memory().len());
}

#[tokio::test]
async fn test_load_rejects_future_version() {
    let harness = played_harness().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("future.json");

    let mut saved = SavedSession::new(
        harness.game.world().snapshot(),
        harness.game.state(),
        chrono::Utc::now(),
    );
    saved.version = SAVE_VERSION + 1;
    saved.save_json(&path).await.unwrap();

    let err = GameMaster::<WorldState>::load(&path, Arc::new(quiet()), TestHarness::config())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GameMasterError::Persist(PersistError::VersionMismatch { .. })
    ));
}

#[tokio::test]
async fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = GameMaster::<WorldState>::load(dir.path().join("nope.json"), Arc::new(quiet()), GameMasterConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GameMasterError::Persist(PersistError::Io(_))));
}
