//! The game master: wires the world store to the agent pipeline.
//!
//! Every world mutation is observed by a listener that enqueues the change on
//! a shared [`ReactionQueue`]. The game master drains that queue after each
//! operation that mutates the world, running the reaction pipeline for every
//! change: record → analyze → consequences → surprise. Changes made while
//! reacting are queued one level deeper, and anything past the configured
//! depth or per-drain budget is dropped with a warning.

use super::analyzer::{PlayerAnalyzer, PlayerDecision, PlayerImpact, Recommendations};
use super::choice::{BranchingChoice, Choice, ChoiceContext, ChoiceGenerator, ScoredChoice};
use super::consequence::{ConsequenceEngine, LongTermConsequence, CONSEQUENCE_PERSONA};
use super::creators::{
    CharacterCreator, CharacterProfile, Dialogue, DialogueCreator, EventGenerator, WorldEvent, CHARACTER_PERSONA,
    DIALOGUE_PERSONA, EVENT_PERSONA,
};
use super::memory::{EventKind, MemoryError, NarrativeEvent, NarrativeMemory};
use super::performance::{PerformanceSummary, PerformanceTracker};
use super::surprise::{Foreshadowing, SurpriseEngine, SurpriseState, SURPRISE_PERSONA};
use crate::clock::{Clock, SystemClock};
use crate::narrator::{self, unit_interval, AgentPersona, NarrativeError, Narrator, Payload};
use crate::persist::{PersistError, SavedSession};
use crate::world::{
    EvolveOutcome, ListenerId, Timeline, TimelineBranch, WorldChange, WorldError, WorldState, WorldStore,
    DEFAULT_MAGIC_LEVEL, DEFAULT_POPULATION, DEFAULT_REALITY_STABILITY, DEFAULT_TECH_LEVEL,
};
use crate::Schema;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const GAME_MASTER_PERSONA: AgentPersona =
    AgentPersona::new("game-master", include_str!("prompts/game_master.txt"));

/// Written when the reaction pipeline fails.
pub const FALLBACK_PATH: &str = "system.stability";
pub const FALLBACK_STABILITY: f64 = 0.5;

/// Sliders every world must carry.
pub const CORE_PROPERTIES: [&str; 4] = ["reality_stability", "magic_level", "tech_level", "population"];

/// Errors from game master operations.
#[derive(Debug, Error)]
pub enum GameMasterError {
    #[error("Narrative error: {0}")]
    Narrative(#[from] NarrativeError),

    #[error("World error: {0}")]
    World(#[from] WorldError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Initialization failed: {0}")]
    Initialization(Box<GameMasterError>),

    #[error("Game master is not running (status: {0})")]
    NotRunning(GameStatus),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// Lifecycle of the game master.
///
/// `Uninitialized → Initializing → Running ⇄ Paused`, with `Failed` terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Uninitialized,
    Initializing,
    Running,
    Paused,
    Failed,
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameStatus::Uninitialized => "uninitialized",
            GameStatus::Initializing => "initializing",
            GameStatus::Running => "running",
            GameStatus::Paused => "paused",
            GameStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Configuration for a game master.
#[derive(Debug, Clone, PartialEq)]
pub struct GameMasterConfig {
    /// Initial surprise chance per reaction.
    pub surprise_frequency: f64,

    /// Deepest reaction level still processed. Changes made by the pipeline
    /// while reacting to a depth `d` change have depth `d + 1`.
    pub max_reaction_depth: usize,

    /// Maximum changes processed by one drain of the reaction queue.
    pub max_reactions_per_drain: usize,

    /// Seed for the surprise and evolution RNGs. `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for GameMasterConfig {
    fn default() -> Self {
        Self {
            surprise_frequency: super::surprise::DEFAULT_SURPRISE_FREQUENCY,
            max_reaction_depth: 3,
            max_reactions_per_drain: 64,
            seed: None,
        }
    }
}

impl GameMasterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `NARRATIVE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            surprise_frequency: env_or("NARRATIVE_SURPRISE_FREQUENCY", defaults.surprise_frequency),
            max_reaction_depth: env_or("NARRATIVE_MAX_REACTION_DEPTH", defaults.max_reaction_depth),
            max_reactions_per_drain: env_or("NARRATIVE_MAX_REACTIONS", defaults.max_reactions_per_drain),
            seed: std::env::var("NARRATIVE_SEED")
                .ok()
                .and_then(|raw| parse_env("NARRATIVE_SEED", &raw)),
        }
    }

    pub fn with_surprise_frequency(mut self, frequency: f64) -> Self {
        self.surprise_frequency = frequency;
        self
    }

    pub fn with_max_reaction_depth(mut self, depth: usize) -> Self {
        self.max_reaction_depth = depth;
        self
    }

    pub fn with_max_reactions_per_drain(mut self, budget: usize) -> Self {
        self.max_reactions_per_drain = budget;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| parse_env(key, &raw))
        .unwrap_or(default)
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// A complete starting world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
#[serde(rename_all = "camelCase")]
#[schema(name = "world")]
pub struct InitialWorld {
    /// normal, magical, technological, post-apocalyptic, utopian, or a custom name
    pub timeline: Timeline,
    /// Named sliders in [0, 1]; must include reality_stability, magic_level, tech_level and population
    pub properties: BTreeMap<String, f64>,
    /// A short overview of the setting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Characters present at the start
    #[serde(default)]
    #[schema(optional)]
    pub characters: Vec<CharacterProfile>,
    /// Events already unfolding
    #[serde(default)]
    #[schema(rename = "currentEvents", optional)]
    pub current_events: Vec<WorldEvent>,
}

impl Payload for InitialWorld {
    fn validate(&self) -> Result<(), String> {
        for name in CORE_PROPERTIES {
            if !self.properties.contains_key(name) {
                return Err(format!("missing core property '{name}'"));
            }
        }
        for (name, value) in &self.properties {
            if name.is_empty() || name.contains('.') {
                return Err(format!("invalid property name '{name}'"));
            }
            unit_interval(name, *value)?;
        }
        self.characters.iter().try_for_each(Payload::validate)?;
        self.current_events.iter().try_for_each(Payload::validate)
    }
}

/// How `initialize_world` ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum InitOutcome {
    /// The generated world was applied.
    Generated,
    /// Generation failed and the safe defaults were applied instead.
    Fallback(String),
    /// The world was already initialized; nothing happened.
    AlreadyInitialized,
}

/// Result of one drain of the reaction queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactionReport {
    pub processed: usize,
    pub dropped: usize,
}

/// Pending world changes, each tagged with the depth that produced it.
#[derive(Debug, Default)]
pub struct ReactionQueue {
    pending: VecDeque<(WorldChange, usize)>,
    /// Depth stamped on changes enqueued right now.
    depth: usize,
}

impl ReactionQueue {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn lock(queue: &Mutex<ReactionQueue>) -> MutexGuard<'_, ReactionQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What subscribers receive after every meaningful transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub world_state: Value,
    pub recent_events: Vec<NarrativeEvent>,
    pub is_running: bool,
    pub status: GameStatus,
    pub performance: PerformanceSummary,
}

/// Persistent part of the game master.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMasterState {
    pub status: GameStatus,
    pub narrative_memory: NarrativeMemory,
    pub player_analyzer: PlayerAnalyzer,
    pub consequence_engine: ConsequenceEngine,
    pub surprise_engine: SurpriseEngine,
}

/// Handle returned by [`GameMaster::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Subscriber = Box<dyn Fn(&GameSnapshot) + Send + Sync>;

/// Orchestrates the agents around one world.
pub struct GameMaster<W: WorldStore = WorldState> {
    world: W,
    narrator: Arc<dyn Narrator>,
    clock: Arc<dyn Clock>,
    status: GameStatus,
    memory: NarrativeMemory,
    analyzer: PlayerAnalyzer,
    consequences: ConsequenceEngine,
    surprise: SurpriseEngine,
    choices: ChoiceGenerator,
    characters: CharacterCreator,
    events: EventGenerator,
    dialogue: DialogueCreator,
    performance: PerformanceTracker,
    config: GameMasterConfig,
    rng: StdRng,
    reactions: Arc<Mutex<ReactionQueue>>,
    listener_id: ListenerId,
    subscribers: Vec<(SubscriberId, Subscriber)>,
    next_subscriber: u64,
}

impl<W: WorldStore + fmt::Debug> fmt::Debug for GameMaster<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameMaster")
            .field("world", &self.world)
            .field("status", &self.status)
            .field("events", &self.memory.len())
            .field("config", &self.config)
            .field("pending_reactions", &lock(&self.reactions).len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl<W: WorldStore> GameMaster<W> {
    pub fn new(world: W, narrator: Arc<dyn Narrator>) -> Self {
        Self::with_config(world, narrator, GameMasterConfig::default())
    }

    /// Take ownership of `world` and start observing its changes.
    pub fn with_config(mut world: W, narrator: Arc<dyn Narrator>, config: GameMasterConfig) -> Self {
        let reactions = Arc::new(Mutex::new(ReactionQueue::default()));
        let queue = Arc::clone(&reactions);
        let listener_id = world.add_listener(Arc::new(move |change: &WorldChange| {
            let mut queue = lock(&queue);
            let depth = queue.depth;
            queue.pending.push_back((change.clone(), depth));
        }));

        let mut surprise = SurpriseEngine::new().with_frequency(config.surprise_frequency);
        let rng = match config.seed {
            Some(seed) => {
                surprise = surprise.with_seed(seed);
                StdRng::seed_from_u64(seed.wrapping_add(1))
            }
            None => StdRng::from_entropy(),
        };

        Self {
            world,
            narrator,
            clock: Arc::new(SystemClock::new()),
            status: GameStatus::Uninitialized,
            memory: NarrativeMemory::new(),
            analyzer: PlayerAnalyzer::new(),
            consequences: ConsequenceEngine::new(),
            surprise,
            choices: ChoiceGenerator::new(),
            characters: CharacterCreator,
            events: EventGenerator,
            dialogue: DialogueCreator,
            performance: PerformanceTracker::new(),
            config,
            rng,
            reactions,
            listener_id,
            subscribers: Vec::new(),
            next_subscriber: 0,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    /// Direct access to the world. Changes made through it are queued and
    /// handled on the next [`process_reactions`](Self::process_reactions).
    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    /// Stop observing the world and hand it back.
    pub fn into_world(mut self) -> W {
        self.world.remove_listener(self.listener_id);
        self.world
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == GameStatus::Running
    }

    pub fn memory(&self) -> &NarrativeMemory {
        &self.memory
    }

    pub fn analyzer(&self) -> &PlayerAnalyzer {
        &self.analyzer
    }

    pub fn consequences(&self) -> &ConsequenceEngine {
        &self.consequences
    }

    pub fn surprise(&self) -> &SurpriseEngine {
        &self.surprise
    }

    pub fn performance(&self) -> &PerformanceTracker {
        &self.performance
    }

    pub fn config(&self) -> &GameMasterConfig {
        &self.config
    }

    pub fn surprise_state(&self) -> SurpriseState {
        self.surprise.state_at(self.clock.now_millis())
    }

    pub fn pending_reactions(&self) -> usize {
        lock(&self.reactions).len()
    }

    fn begin_call(&mut self, persona: &AgentPersona) -> Instant {
        self.performance.track_agent_call(persona.name);
        Instant::now()
    }

    fn end_call(&mut self, start: Instant) {
        let elapsed = self.performance.track_response_time(start);
        debug!(elapsed_ms = elapsed.as_millis() as u64, "Agent call finished");
    }

    fn ensure_running(&self) -> Result<(), GameMasterError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(GameMasterError::NotRunning(self.status))
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Populate the world. Always ends up running unless even the safe
    /// defaults cannot be written; a second call is a logged no-op.
    pub async fn initialize_world(&mut self) -> Result<InitOutcome, GameMasterError> {
        match self.status {
            GameStatus::Running | GameStatus::Paused => {
                info!("World already initialized");
                return Ok(InitOutcome::AlreadyInitialized);
            }
            GameStatus::Failed => return Err(GameMasterError::NotRunning(self.status)),
            GameStatus::Uninitialized | GameStatus::Initializing => {}
        }
        self.status = GameStatus::Initializing;

        let outcome = match self.generate_initial_world().await {
            Ok(()) => InitOutcome::Generated,
            Err(err) => {
                warn!(error = %err, "World generation failed, applying safe defaults");
                if let Err(fallback) = self.apply_safe_defaults() {
                    error!(error = %fallback, "Could not apply safe defaults");
                    self.status = GameStatus::Failed;
                    self.notify_subscribers();
                    return Err(GameMasterError::Initialization(Box::new(fallback)));
                }
                InitOutcome::Fallback(err.to_string())
            }
        };

        self.status = GameStatus::Running;
        info!(world = self.world.world_id(), "World initialized");
        self.drain_reactions().await;
        self.notify_subscribers();
        Ok(outcome)
    }

    async fn generate_initial_world(&mut self) -> Result<(), GameMasterError> {
        let start = self.begin_call(&GAME_MASTER_PERSONA);
        let result = narrator::request::<InitialWorld>(
            &*self.narrator,
            &GAME_MASTER_PERSONA,
            "Initialize a new game world with default settings",
        )
        .await;
        self.end_call(start);
        let initial = result?;

        self.world.set_property("timeline", json!(initial.timeline))?;
        for (name, value) in &initial.properties {
            self.world.set_property(&format!("properties.{name}"), json!(value))?;
        }
        self.world
            .set_property("characters", serde_json::to_value(&initial.characters)?)?;
        self.world
            .set_property("currentEvents", serde_json::to_value(&initial.current_events)?)?;
        if let Some(description) = initial.description {
            self.world.set_property("description", Value::String(description))?;
        }
        Ok(())
    }

    fn apply_safe_defaults(&mut self) -> Result<(), GameMasterError> {
        let defaults = [
            ("properties.reality_stability", json!(DEFAULT_REALITY_STABILITY)),
            ("properties.magic_level", json!(DEFAULT_MAGIC_LEVEL)),
            ("properties.tech_level", json!(DEFAULT_TECH_LEVEL)),
            ("properties.population", json!(DEFAULT_POPULATION)),
            ("timeline", json!(Timeline::Normal)),
            ("characters", json!([])),
            ("currentEvents", json!([])),
        ];
        for (path, value) in defaults {
            self.world.set_property(path, value)?;
        }
        Ok(())
    }

    /// Ask for one narrative step and apply it.
    ///
    /// On failure the game master pauses and the error is returned; call
    /// [`resume`](Self::resume) to continue.
    pub async fn progress_narrative(&mut self) -> Result<WorldChange, GameMasterError> {
        self.ensure_running()?;
        match self.next_narrative_step().await {
            Ok(change) => {
                self.drain_reactions().await;
                self.notify_subscribers();
                Ok(change)
            }
            Err(err) => {
                error!(error = %err, "Failed to progress narrative");
                self.status = GameStatus::Paused;
                self.notify_subscribers();
                Err(err)
            }
        }
    }

    async fn next_narrative_step(&mut self) -> Result<WorldChange, GameMasterError> {
        let state = self.world.to_json()?;
        let prompt = format!("Progress the main narrative based on current world state: {state}");
        let start = self.begin_call(&GAME_MASTER_PERSONA);
        let result = narrator::request::<WorldEvent>(&*self.narrator, &GAME_MASTER_PERSONA, prompt).await;
        self.end_call(start);
        let event = result?;
        debug!(name = %event.name, path = %event.path, "Narrative progressed");
        Ok(self.world.set_property(&event.path, event.value)?)
    }

    pub fn pause(&mut self) -> bool {
        if self.status != GameStatus::Running {
            return false;
        }
        self.status = GameStatus::Paused;
        info!("Game paused");
        self.notify_subscribers();
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.status != GameStatus::Paused {
            return false;
        }
        self.status = GameStatus::Running;
        info!("Game resumed");
        self.notify_subscribers();
        true
    }

    // ========================================================================
    // Reaction pipeline
    // ========================================================================

    /// React to one change. Never fails: any error is logged and replaced
    /// by a single write of `system.stability = 0.5`.
    pub async fn handle_world_change(&mut self, change: &WorldChange) {
        if let Err(err) = self.react(change).await {
            warn!(path = %change.path, error = %err, "Reaction pipeline failed, applying fallback");
            if let Err(err) = self.world.set_property(FALLBACK_PATH, json!(FALLBACK_STABILITY)) {
                warn!(error = %err, "Fallback mutation failed");
            }
        }
    }

    async fn react(&mut self, change: &WorldChange) -> Result<(), GameMasterError> {
        let now = self.clock.now_millis();
        let event = self.memory.record_at(NarrativeEvent::from(change), now);
        let impact = self.analyzer.analyze_impact_at(&event, now);

        let start = self.begin_call(&CONSEQUENCE_PERSONA);
        let result = self
            .consequences
            .generate_consequences(&*self.narrator, &event, &impact)
            .await;
        self.end_call(start);
        for consequence in result? {
            self.world.set_property(&consequence.path, consequence.value)?;
        }

        let start = Instant::now();
        let result = self
            .surprise
            .check_for_surprise_at(&*self.narrator, &self.world, &self.memory, now)
            .await;
        // Ok(None) means the engine never reached the narrator.
        if !matches!(result, Ok(None)) {
            self.performance.track_agent_call(SURPRISE_PERSONA.name);
            self.end_call(start);
        }
        if let Some(surprise) = result? {
            self.world.set_property(&surprise.path, surprise.value)?;
        }
        Ok(())
    }

    /// Drain the reaction queue and notify subscribers if anything was handled.
    pub async fn process_reactions(&mut self) -> ReactionReport {
        let report = self.drain_reactions().await;
        if report.processed > 0 {
            self.notify_subscribers();
        }
        report
    }

    async fn drain_reactions(&mut self) -> ReactionReport {
        let mut report = ReactionReport::default();
        loop {
            let next = lock(&self.reactions).pending.pop_front();
            let Some((change, depth)) = next else {
                break;
            };

            if depth > self.config.max_reaction_depth {
                warn!(path = %change.path, depth, "Reaction depth cap exceeded, dropping change");
                report.dropped += 1;
                continue;
            }
            if report.processed >= self.config.max_reactions_per_drain {
                let rest = {
                    let mut queue = lock(&self.reactions);
                    let rest = queue.pending.len();
                    queue.pending.clear();
                    rest
                };
                report.dropped += rest + 1;
                warn!(
                    budget = self.config.max_reactions_per_drain,
                    dropped = rest + 1,
                    "Reaction budget exhausted, dropping remaining changes"
                );
                break;
            }

            lock(&self.reactions).depth = depth + 1;
            self.handle_world_change(&change).await;
            report.processed += 1;
        }
        lock(&self.reactions).depth = 0;

        if report.processed > 0 || report.dropped > 0 {
            debug!(processed = report.processed, dropped = report.dropped, "Reactions drained");
        }
        report
    }

    // ========================================================================
    // Subscribers
    // ========================================================================

    pub fn subscribe(&mut self, callback: impl Fn(&GameSnapshot) + Send + Sync + 'static) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            world_state: self.world.snapshot(),
            recent_events: self.memory.recent_events(5).into_iter().cloned().collect(),
            is_running: self.is_running(),
            status: self.status,
            performance: self.performance.summary(),
        }
    }

    fn notify_subscribers(&self) {
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for (_, subscriber) in &self.subscribers {
            subscriber(&snapshot);
        }
    }

    // ========================================================================
    // Player-facing operations
    // ========================================================================

    /// Ranked choices for the current situation, or two safe defaults if
    /// generation fails.
    pub async fn generate_choices(&mut self, context: &ChoiceContext) -> Vec<ScoredChoice> {
        let start = self.begin_call(&super::choice::CHOICE_PERSONA);
        let result = self
            .choices
            .generate_choices(&*self.narrator, context, &self.memory, &self.analyzer)
            .await;
        self.end_call(start);
        match result {
            Ok(choices) => choices,
            Err(err) => {
                warn!(error = %err, "Choice generation failed, offering defaults");
                default_choices()
            }
        }
    }

    /// Choices that each lead into a different timeline.
    pub async fn branching_choices(&mut self) -> Result<Vec<BranchingChoice>, GameMasterError> {
        let start = self.begin_call(&super::choice::CHOICE_PERSONA);
        let result = self
            .choices
            .generate_branching_choices(&*self.narrator, &self.world, &self.memory)
            .await;
        self.end_call(start);
        Ok(result?)
    }

    /// Record a decision and fold it into the player profile.
    pub fn record_player_decision(&mut self, decision: PlayerDecision) -> PlayerImpact {
        let now = self.clock.now_millis();
        let decision = self.memory.record_player_decision_at(decision, now);
        let event = self.memory.record_at(decision.to_event(), now);
        let impact = self.analyzer.analyze_impact_at(&event, now);
        debug!(play_style = %impact.play_style, risk = impact.risk_tolerance, "Player decision recorded");
        self.notify_subscribers();
        impact
    }

    /// Record an interaction between characters. The first two listed
    /// characters grow closer.
    pub fn record_interaction(&mut self, characters: &[&str], details: Map<String, Value>) -> NarrativeEvent {
        let mut event = NarrativeEvent::new(EventKind::CharacterInteraction).with_characters(characters.iter().copied());
        event.details = details;
        self.memory.record_at(event, self.clock.now_millis())
    }

    pub fn recommendations(&self) -> Recommendations {
        self.analyzer.recommendations()
    }

    // ========================================================================
    // Content generation
    // ========================================================================

    /// Ask for a custom event. The event is returned, not applied; `None`
    /// when generation fails.
    pub async fn orchestrate_event(&mut self, event_type: &str, context: &Value) -> Option<WorldEvent> {
        let prompt = format!("Orchestrate a {event_type} event with this context: {context}");
        let start = self.begin_call(&GAME_MASTER_PERSONA);
        let result = narrator::request::<WorldEvent>(&*self.narrator, &GAME_MASTER_PERSONA, prompt).await;
        self.end_call(start);
        match result {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(event_type, error = %err, "Event orchestration failed");
                None
            }
        }
    }

    /// Create a character and add it to the world.
    pub async fn introduce_character(&mut self, prompt: &str) -> Result<CharacterProfile, GameMasterError> {
        let start = self.begin_call(&CHARACTER_PERSONA);
        let result = self.characters.create_character(&*self.narrator, prompt).await;
        self.end_call(start);
        let character = result?;

        let mut roster = self
            .world
            .get_property("characters")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        roster.push(serde_json::to_value(&character)?);
        self.world.set_property("characters", Value::Array(roster))?;
        info!(id = %character.id, name = %character.name, "Character introduced");

        self.drain_reactions().await;
        self.notify_subscribers();
        Ok(character)
    }

    /// Generate a chain of events and make it the world's current events.
    pub async fn generate_current_events(
        &mut self,
        prompt: &str,
        count: usize,
    ) -> Result<Vec<WorldEvent>, GameMasterError> {
        let start = self.begin_call(&EVENT_PERSONA);
        let result = self.events.generate_event_chain(&*self.narrator, prompt, count).await;
        self.end_call(start);
        let events = result?;

        self.world
            .set_property("currentEvents", serde_json::to_value(&events)?)?;
        self.drain_reactions().await;
        self.notify_subscribers();
        Ok(events)
    }

    pub async fn create_dialogue(&mut self, prompt: &str, scenes: usize) -> Result<Vec<Dialogue>, GameMasterError> {
        let start = self.begin_call(&DIALOGUE_PERSONA);
        let result = if scenes <= 1 {
            self.dialogue
                .create_dialogue(&*self.narrator, prompt)
                .await
                .map(|scene| vec![scene])
        } else {
            self.dialogue
                .create_multi_scene_dialogue(&*self.narrator, prompt, scenes)
                .await
        };
        self.end_call(start);
        Ok(result?)
    }

    pub async fn long_term_consequences(&mut self) -> Result<Vec<LongTermConsequence>, GameMasterError> {
        let start = self.begin_call(&CONSEQUENCE_PERSONA);
        let result = self
            .consequences
            .generate_long_term_consequences(&*self.narrator, &self.memory)
            .await;
        self.end_call(start);
        Ok(result?)
    }

    pub async fn foreshadowing(&mut self) -> Result<Foreshadowing, GameMasterError> {
        let start = self.begin_call(&SURPRISE_PERSONA);
        let result = self
            .surprise
            .generate_foreshadowing(&*self.narrator, &self.memory)
            .await;
        self.end_call(start);
        Ok(result?)
    }

    /// Write to the world directly, then react to the change.
    pub async fn apply(&mut self, path: &str, value: Value) -> Result<WorldChange, GameMasterError> {
        let change = self.world.set_property(path, value)?;
        self.process_reactions().await;
        Ok(change)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn state(&self) -> GameMasterState {
        GameMasterState {
            status: self.status,
            narrative_memory: self.memory.clone(),
            player_analyzer: self.analyzer.clone(),
            consequence_engine: self.consequences.clone(),
            surprise_engine: self.surprise.clone(),
        }
    }

    /// Replace the agent state with a saved one.
    pub fn restore(&mut self, state: GameMasterState) {
        self.status = match state.status {
            GameStatus::Initializing => GameStatus::Uninitialized,
            status => status,
        };
        self.memory = state.narrative_memory;
        self.analyzer = state.player_analyzer;
        self.consequences = state.consequence_engine;
        self.surprise = state.surprise_engine;
        if let Some(seed) = self.config.seed {
            self.surprise.reseed(seed);
        }
    }

    pub fn to_json(&self) -> Result<String, GameMasterError> {
        Ok(serde_json::to_string(&self.state())?)
    }

    /// Rebuild a game master around `world` from [`to_json`](Self::to_json) output.
    pub fn from_json(
        json: &str,
        world: W,
        narrator: Arc<dyn Narrator>,
        config: GameMasterConfig,
    ) -> Result<Self, GameMasterError> {
        let state: GameMasterState = serde_json::from_str(json)?;
        let mut game = Self::with_config(world, narrator, config);
        game.restore(state);
        Ok(game)
    }

    /// Write the world and the agent state to a save file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), GameMasterError> {
        let session = SavedSession::new(self.world.snapshot(), self.state(), self.clock.now());
        session.save_json(path).await?;
        Ok(())
    }
}

impl GameMaster<WorldState> {
    /// Resume a session written by [`save`](Self::save).
    pub async fn load(
        path: impl AsRef<Path>,
        narrator: Arc<dyn Narrator>,
        config: GameMasterConfig,
    ) -> Result<Self, GameMasterError> {
        let session = SavedSession::load_json(path).await?;
        let world = WorldState::from_value(session.world)?;
        let mut game = Self::with_config(world, narrator, config);
        game.restore(session.game_master);
        info!(world = game.world.id(), status = %game.status, "Session loaded");
        Ok(game)
    }

    /// One evolution step, then react to what changed.
    pub async fn evolve_world(&mut self) -> Result<EvolveOutcome, GameMasterError> {
        let outcome = self.world.evolve_with(&mut self.rng)?;
        self.process_reactions().await;
        Ok(outcome)
    }

    pub fn add_timeline_branch(
        &mut self,
        trigger: impl Into<String>,
        timeline: impl Into<Timeline>,
        probability: f64,
    ) -> TimelineBranch {
        self.world.add_timeline_branch(trigger, timeline, probability)
    }
}

fn default_choices() -> Vec<ScoredChoice> {
    [
        Choice::new("Continue forward", "continue", 0.1),
        Choice::new("Wait and observe", "wait", 0.1),
    ]
    .into_iter()
    .map(|choice| ScoredChoice {
        choice,
        preference_score: 0.0,
    })
    .collect()
}
