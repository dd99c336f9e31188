//! The game master and the agents it orchestrates.

pub mod agent;
pub mod analyzer;
pub mod choice;
pub mod consequence;
pub mod creators;
pub mod memory;
pub mod performance;
pub mod surprise;

pub use agent::{
    GameMaster, GameMasterConfig, GameMasterError, GameMasterState, GameSnapshot, GameStatus, InitOutcome,
    InitialWorld, ReactionReport, SubscriberId,
};
pub use analyzer::{PlayStyle, PlayerAnalyzer, PlayerDecision, PlayerImpact, PlayerProfile, Recommendations};
pub use choice::{BranchingChoice, Choice, ChoiceContext, ChoiceGenerator, ScoredChoice};
pub use consequence::{Consequence, ConsequenceEngine, LongTermConsequence};
pub use creators::{CharacterCreator, CharacterProfile, Dialogue, DialogueCreator, EventGenerator, WorldEvent};
pub use memory::{CharacterRef, EventKind, MemoryError, NarrativeEvent, NarrativeMemory, Relationship};
pub use performance::{PerformanceSummary, PerformanceTracker};
pub use surprise::{Foreshadowing, Surprise, SurpriseEngine, SurpriseState};
