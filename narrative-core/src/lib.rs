//! Narrative-state orchestration core.
//!
//! This crate provides:
//! - A path-addressed world store with change notification
//! - Cooperating agents (memory, player analysis, consequences, surprises, choices)
//! - A game master that drives the reaction pipeline over a bounded queue
//! - Session persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use narrative_core::{DeepseekNarrator, GameMaster, GameMasterConfig, WorldState};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let narrator = Arc::new(DeepseekNarrator::from_env()?);
//!     let mut game = GameMaster::with_config(WorldState::new(), narrator, GameMasterConfig::from_env());
//!
//!     game.initialize_world().await?;
//!     let change = game.progress_narrative().await?;
//!     println!("{} -> {}", change.path, change.new_value);
//!
//!     game.save("session.json").await?;
//!     Ok(())
//! }
//! ```

// Lets `#[derive(Schema)]` refer to `::narrative_core` from inside this crate.
extern crate self as narrative_core;

pub mod clock;
pub mod gm;
pub mod narrator;
pub mod persist;
pub mod testing;
pub mod world;

pub use narrative_macros::Schema;

// Primary public API
pub use clock::{Clock, ManualClock, SystemClock};
pub use gm::{GameMaster, GameMasterConfig, GameMasterError, GameSnapshot, GameStatus};
pub use narrator::{DeepseekNarrator, NarrativeError, NarrativeRequest, Narrator, Payload, ResponseSchema};
pub use persist::{PersistError, SavedSession};
pub use testing::{FailingNarrator, ScriptedNarrator, TestHarness};
pub use world::{WorldChange, WorldError, WorldState, WorldStore};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    /// A sudden change of weather
    #[derive(Schema, Deserialize)]
    #[schema(name = "weather_shift")]
    struct WeatherShift {
        /// Sky condition, e.g. "storm"
        sky: String,
        /// Temperature change in degrees
        delta: Option<f64>,
        regions: Vec<String>,
    }

    #[test]
    fn test_schema_derive() {
        assert_eq!(WeatherShift::schema_name(), "weather_shift");
        let schema = WeatherShift::response_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["description"], "A sudden change of weather");
        assert_eq!(schema["properties"]["sky"]["type"], "string");
        assert_eq!(schema["properties"]["sky"]["description"], "Sky condition, e.g. \"storm\"");
        assert_eq!(schema["properties"]["delta"]["type"], "number");
        assert_eq!(schema["properties"]["regions"]["items"]["type"], "string");

        // Option fields are not required
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "sky"));
        assert!(!required.iter().any(|v| v == "delta"));
    }
}
