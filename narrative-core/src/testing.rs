//! Testing utilities.
//!
//! This module provides tools for integration testing:
//! - `ScriptedNarrator` for deterministic tests without API calls
//! - `FailingNarrator` for exercising fallback paths
//! - `TestHarness` for scripted game scenarios
//! - Assertion helpers for verifying world and game state

use crate::clock::ManualClock;
use crate::gm::agent::{GameMaster, GameMasterConfig, GameStatus};
use crate::narrator::{NarrativeError, NarrativeRequest, Narrator};
use crate::world::WorldState;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Answer = Result<Value, NarrativeError>;

#[derive(Debug, Default)]
struct Script {
    /// One-shot answers, consumed in order before the standing answer.
    queued: HashMap<String, VecDeque<Answer>>,
    /// Answer given every time once the queue is empty.
    standing: HashMap<String, Answer>,
    requests: Vec<NarrativeRequest>,
}

/// A narrator that returns scripted answers per agent and records every
/// request it receives.
///
/// Agents with no script get a transport error.
#[derive(Debug, Default)]
pub struct ScriptedNarrator {
    script: Mutex<Script>,
}

impl ScriptedNarrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn script_mut(&mut self) -> &mut Script {
        self.script.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every request from `agent` with `value`.
    pub fn always(mut self, agent: impl Into<String>, value: Value) -> Self {
        self.script_mut().standing.insert(agent.into(), Ok(value));
        self
    }

    /// Answer the next request from `agent` with `value`.
    pub fn respond(mut self, agent: impl Into<String>, value: Value) -> Self {
        self.push_answer(agent.into(), Ok(value));
        self
    }

    /// Fail every request from `agent`.
    pub fn fail(mut self, agent: impl Into<String>, error: NarrativeError) -> Self {
        self.script_mut().standing.insert(agent.into(), Err(error));
        self
    }

    fn push_answer(&mut self, agent: String, answer: Answer) {
        self.script_mut().queued.entry(agent).or_default().push_back(answer);
    }

    /// Queue a one-shot answer after construction.
    pub fn push_response(&self, agent: impl Into<String>, value: Value) {
        self.script()
            .queued
            .entry(agent.into())
            .or_default()
            .push_back(Ok(value));
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<NarrativeRequest> {
        self.script().requests.clone()
    }

    pub fn call_count(&self, agent: &str) -> usize {
        self.script().requests.iter().filter(|r| r.agent == agent).count()
    }

    pub fn total_calls(&self) -> usize {
        self.script().requests.len()
    }
}

#[async_trait]
impl Narrator for ScriptedNarrator {
    async fn generate(&self, request: &NarrativeRequest) -> Result<Value, NarrativeError> {
        let mut script = self.script();
        script.requests.push(request.clone());

        if let Some(answer) = script
            .queued
            .get_mut(&request.agent)
            .and_then(VecDeque::pop_front)
        {
            return answer;
        }
        match script.standing.get(&request.agent) {
            Some(answer) => answer.clone(),
            None => Err(NarrativeError::Transport(format!(
                "no scripted response for {}",
                request.agent
            ))),
        }
    }
}

/// A narrator that always fails with the same error.
#[derive(Debug)]
pub struct FailingNarrator {
    error: NarrativeError,
    calls: AtomicUsize,
}

impl FailingNarrator {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(NarrativeError::Transport(message.into()))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(NarrativeError::Validation(message.into()))
    }

    fn new(error: NarrativeError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Narrator for FailingNarrator {
    async fn generate(&self, _request: &NarrativeRequest) -> Result<Value, NarrativeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Start time of the harness clock.
pub const HARNESS_START_MS: i64 = 1_700_000_000_000;

/// Test harness for running game scenarios.
///
/// The game master shares the harness clock with its world, never rolls a
/// surprise, and uses a fixed seed.
pub struct TestHarness {
    /// The game master under test.
    pub game: GameMaster<WorldState>,
    /// The scripted narrator behind it.
    pub narrator: Arc<ScriptedNarrator>,
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    /// Configuration used by [`new`](Self::new).
    pub fn config() -> GameMasterConfig {
        GameMasterConfig::default()
            .with_surprise_frequency(0.0)
            .with_seed(7)
    }

    pub fn new(narrator: ScriptedNarrator) -> Self {
        Self::with_config(narrator, Self::config())
    }

    pub fn with_config(narrator: ScriptedNarrator, config: GameMasterConfig) -> Self {
        let narrator = Arc::new(narrator);
        let clock = Arc::new(ManualClock::new(HARNESS_START_MS));
        let world = WorldState::new().with_clock(clock.clone());
        let game = GameMaster::with_config(world, narrator.clone(), config).with_clock(clock.clone());

        Self { game, narrator, clock }
    }

    /// Current value at `path`, cloned.
    pub fn property(&self, path: &str) -> Option<Value> {
        self.game.world().get_property(path).cloned()
    }

    pub fn f64(&self, path: &str) -> Option<f64> {
        self.game.world().get_f64(path)
    }

    /// Move the clock forward by `millis`.
    pub fn advance(&self, millis: i64) -> i64 {
        self.clock.advance(millis)
    }

    pub fn status(&self) -> GameStatus {
        self.game.status()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that the world holds `expected` at `path`.
#[track_caller]
pub fn assert_property(harness: &TestHarness, path: &str, expected: Value) {
    let actual = harness.property(path);
    assert_eq!(
        actual.as_ref(),
        Some(&expected),
        "Expected '{path}' to be {expected}, got {actual:?}"
    );
}

/// Assert that a numeric property is within 1e-9 of `expected`.
#[track_caller]
pub fn assert_property_near(harness: &TestHarness, path: &str, expected: f64) {
    match harness.f64(path) {
        Some(actual) => assert!(
            (actual - expected).abs() < 1e-9,
            "Expected '{path}' to be {expected}, got {actual}"
        ),
        None => panic!("Expected '{path}' to be {expected}, but it is missing or not a number"),
    }
}

/// Assert the game master is in `expected` status.
#[track_caller]
pub fn assert_status(harness: &TestHarness, expected: GameStatus) {
    let actual = harness.status();
    assert_eq!(actual, expected, "Expected status {expected}, got {actual}");
}

/// Assert `agent` was asked exactly `expected` times.
#[track_caller]
pub fn assert_calls(harness: &TestHarness, agent: &str, expected: usize) {
    let actual = harness.narrator.call_count(agent);
    assert_eq!(actual, expected, "Expected {expected} calls to {agent}, got {actual}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrator::AgentPersona;
    use serde_json::json;

    const ORACLE: AgentPersona = AgentPersona::new("oracle", "You foretell.");

    fn request() -> NarrativeRequest {
        NarrativeRequest::new(&ORACLE, "What comes next?", json!({"type": "object"}))
    }

    #[tokio::test]
    async fn test_queued_answers_come_before_standing() {
        let narrator = ScriptedNarrator::new()
            .always("oracle", json!({"n": 0}))
            .respond("oracle", json!({"n": 1}))
            .respond("oracle", json!({"n": 2}));

        assert_eq!(narrator.generate(&request()).await.unwrap(), json!({"n": 1}));
        assert_eq!(narrator.generate(&request()).await.unwrap(), json!({"n": 2}));
        assert_eq!(narrator.generate(&request()).await.unwrap(), json!({"n": 0}));
        assert_eq!(narrator.call_count("oracle"), 3);
        assert_eq!(narrator.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_unscripted_agent_fails() {
        let narrator = ScriptedNarrator::new();
        let err = narrator.generate(&request()).await.unwrap_err();
        assert_eq!(err, NarrativeError::Transport("no scripted response for oracle".to_string()));
        assert_eq!(narrator.requests()[0].prompt, "What comes next?");
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let narrator = ScriptedNarrator::new().fail("oracle", NarrativeError::Validation("bad".to_string()));
        assert!(matches!(
            narrator.generate(&request()).await,
            Err(NarrativeError::Validation(_))
        ));

        narrator.push_response("oracle", json!({}));
        assert!(narrator.generate(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_narrator_counts_calls() {
        let narrator = FailingNarrator::validation("nope");
        assert!(narrator.generate(&request()).await.is_err());
        assert!(narrator.generate(&request()).await.is_err());
        assert_eq!(narrator.call_count(), 2);
    }

    #[test]
    fn test_harness_shares_clock() {
        let mut harness = TestHarness::new(ScriptedNarrator::new());
        harness.advance(500);
        let change = harness
            .game
            .world_mut()
            .set_property("properties.magic_level", json!(0.4))
            .unwrap();
        assert_eq!(change.timestamp, HARNESS_START_MS + 500);
        assert_property(&harness, "properties.magic_level", json!(0.4));
        assert_property_near(&harness, "properties.tech_level", 0.7);
        assert_status(&harness, GameStatus::Uninitialized);
        assert_calls(&harness, "oracle", 0);
    }
}
