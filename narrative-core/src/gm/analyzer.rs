//! Player behavior analysis.
//!
//! The profile is derived from the last ten recorded decisions and is
//! recomputed each time a `PLAYER_DECISION` event comes through.

use super::memory::{EventKind, NarrativeEvent};
use crate::narrator::ResponseSchema;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Number of decisions the profile is computed from.
pub const PROFILE_WINDOW: usize = 10;

/// Decision time (ms) that counts as maximally deliberate.
pub const DECISION_TIME_SCALE: f64 = 10_000.0;

/// Decisions with a risk level above this count as risky.
pub const RISKY_THRESHOLD: f64 = 0.7;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How the player tends to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayStyle {
    Aggressive,
    Passive,
    #[default]
    Neutral,
}

impl PlayStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayStyle::Aggressive => "aggressive",
            PlayStyle::Passive => "passive",
            PlayStyle::Neutral => "neutral",
        }
    }
}

impl fmt::Display for PlayStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ResponseSchema for PlayStyle {
    fn schema_name() -> &'static str {
        "play_style"
    }

    fn response_schema() -> Value {
        json!({
            "type": "string",
            "enum": ["aggressive", "passive", "neutral"]
        })
    }
}

/// A decision the player made.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDecision {
    /// `aggressive`, `passive`, or anything else.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default)]
    pub risk_level: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub satisfaction: f64,
    /// When the options were shown (epoch ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presented_at: Option<i64>,
    /// When the decision was recorded (epoch ms).
    #[serde(default)]
    pub timestamp: i64,
    /// Milliseconds between presentation and decision.
    #[serde(default)]
    pub decision_time: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlayerDecision {
    /// Read a decision from a `PLAYER_DECISION` event. The event's timestamp
    /// is the moment of decision.
    pub fn from_event(event: &NarrativeEvent) -> Result<Self, serde_json::Error> {
        let mut decision: PlayerDecision = serde_json::from_value(Value::Object(event.details.clone()))?;
        decision.timestamp = event.timestamp;
        Ok(decision)
    }

    /// The event form of this decision, for recording in memory.
    pub fn to_event(&self) -> NarrativeEvent {
        let mut event = NarrativeEvent::new(EventKind::PlayerDecision);
        if let Ok(Value::Object(mut fields)) = serde_json::to_value(self) {
            fields.remove("timestamp");
            fields.remove("decisionTime");
            event.details = fields;
        }
        event
    }

    fn is_action(&self, action: &str) -> bool {
        self.action_type.as_deref() == Some(action)
    }
}

/// Derived summary of recent decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub play_style: PlayStyle,
    pub decision_speed: f64,
    pub risk_tolerance: f64,
    pub preferred_content: BTreeMap<String, f64>,
}

impl Default for PlayerProfile {
    fn default() -> Self {
        Self {
            play_style: PlayStyle::Neutral,
            decision_speed: 0.0,
            risk_tolerance: 0.5,
            preferred_content: BTreeMap::new(),
        }
    }
}

/// What the other agents see of the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerImpact {
    pub play_style: PlayStyle,
    pub risk_tolerance: f64,
    pub content_preferences: BTreeMap<String, f64>,
}

impl Default for PlayerImpact {
    fn default() -> Self {
        PlayerProfile::default().impact()
    }
}

impl PlayerProfile {
    pub fn impact(&self) -> PlayerImpact {
        PlayerImpact {
            play_style: self.play_style,
            risk_tolerance: self.risk_tolerance,
            content_preferences: self.preferred_content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    /// Up to three content types, best first.
    pub preferred_content_types: Vec<String>,
    pub difficulty_adjustment: f64,
}

/// Rolling player profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerAnalyzer {
    profile: PlayerProfile,
    history: Vec<PlayerDecision>,
}

impl PlayerAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(&self) -> &PlayerProfile {
        &self.profile
    }

    pub fn history(&self) -> &[PlayerDecision] {
        &self.history
    }

    pub fn current_impact(&self) -> PlayerImpact {
        self.profile.impact()
    }

    pub fn analyze_impact(&mut self, event: &NarrativeEvent) -> PlayerImpact {
        self.analyze_impact_at(event, Utc::now().timestamp_millis())
    }

    /// Record player decisions and refresh the profile; any other event only
    /// reads the current profile.
    pub fn analyze_impact_at(&mut self, event: &NarrativeEvent, now: i64) -> PlayerImpact {
        if event.is(&EventKind::PlayerDecision) {
            match PlayerDecision::from_event(event) {
                Ok(decision) => {
                    self.record_decision_at(decision, now);
                    self.update_profile();
                }
                Err(e) => warn!(error = %e, "Ignoring malformed player decision"),
            }
        }
        self.current_impact()
    }

    fn record_decision_at(&mut self, mut decision: PlayerDecision, now: i64) {
        decision.decision_time = decision
            .presented_at
            .map(|presented| decision.timestamp - presented)
            .unwrap_or(0);
        decision.timestamp = now;
        self.history.push(decision);
    }

    fn update_profile(&mut self) {
        let start = self.history.len().saturating_sub(PROFILE_WINDOW);
        let recent = &self.history[start..];
        let profile = &mut self.profile;

        if recent.is_empty() {
            profile.risk_tolerance = 0.5;
            return;
        }
        let count = recent.len() as f64;

        let mean_time = recent.iter().map(|d| d.decision_time as f64).sum::<f64>() / count;
        profile.decision_speed = (mean_time / DECISION_TIME_SCALE).min(1.0);

        let risky = recent.iter().filter(|d| d.risk_level > RISKY_THRESHOLD).count();
        profile.risk_tolerance = risky as f64 / count;

        let aggressive = recent.iter().filter(|d| d.is_action("aggressive")).count();
        let passive = recent.iter().filter(|d| d.is_action("passive")).count();
        profile.play_style = if aggressive > passive * 2 {
            PlayStyle::Aggressive
        } else if passive > aggressive * 2 {
            PlayStyle::Passive
        } else {
            PlayStyle::Neutral
        };

        for decision in recent {
            if let Some(content_type) = &decision.content_type {
                *profile
                    .preferred_content
                    .entry(content_type.clone())
                    .or_insert(0.0) += decision.satisfaction * 0.1;
            }
        }

        debug!(
            play_style = %profile.play_style,
            risk_tolerance = profile.risk_tolerance,
            decision_speed = profile.decision_speed,
            "Player profile updated"
        );
    }

    pub fn recommendations(&self) -> Recommendations {
        let mut scored: Vec<(&String, f64)> = self
            .profile
            .preferred_content
            .iter()
            .map(|(name, score)| (name, *score))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Recommendations {
            preferred_content_types: scored.into_iter().take(3).map(|(name, _)| name.clone()).collect(),
            difficulty_adjustment: self.difficulty(),
        }
    }

    /// `clamp01(0.5 + 0.2 * decision_speed + 0.3 * risk_tolerance)`.
    pub fn difficulty(&self) -> f64 {
        (0.5 + self.profile.decision_speed * 0.2 + self.profile.risk_tolerance * 0.3).clamp(0.0, 1.0)
    }

    pub fn to_json(&self) -> Result<String, AnalyzerError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, AnalyzerError> {
        Ok(serde_json::from_str(json)?)
    }
}
