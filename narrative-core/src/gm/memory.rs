//! Narrative memory: what has happened, who knows whom, and when the
//! timeline shifted.
//!
//! Holds a bounded event log (oldest evicted first), a ledger of character
//! relationships keyed by unordered pair, an append-only timeline history
//! and the log of player decisions.

use super::analyzer::PlayerDecision;
use crate::world::WorldChange;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Default event log capacity.
pub const MAX_EVENTS: usize = 1000;

/// Strength gained per recorded interaction between a pair.
pub const RELATIONSHIP_INCREMENT: f64 = 0.1;

/// Errors from memory operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Kind of recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    WorldChange,
    CharacterInteraction,
    PlayerDecision,
    ChoiceRequest,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::WorldChange => "WORLD_CHANGE",
            EventKind::CharacterInteraction => "CHARACTER_INTERACTION",
            EventKind::PlayerDecision => "PLAYER_DECISION",
            EventKind::ChoiceRequest => "CHOICE_REQUEST",
            EventKind::Other(name) => name,
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "WORLD_CHANGE" => EventKind::WorldChange,
            "CHARACTER_INTERACTION" => EventKind::CharacterInteraction,
            "PLAYER_DECISION" => EventKind::PlayerDecision,
            "CHOICE_REQUEST" => EventKind::ChoiceRequest,
            _ => EventKind::Other(value),
        }
    }
}

impl From<EventKind> for String {
    fn from(value: EventKind) -> Self {
        match value {
            EventKind::Other(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A character mentioned by an event: a bare id or a record carrying `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CharacterRef {
    Id(String),
    Record(Map<String, Value>),
}

impl CharacterRef {
    pub fn id(&self) -> Option<&str> {
        match self {
            CharacterRef::Id(id) => Some(id),
            CharacterRef::Record(record) => record.get("id").and_then(Value::as_str),
        }
    }
}

impl From<&str> for CharacterRef {
    fn from(id: &str) -> Self {
        CharacterRef::Id(id.to_string())
    }
}

/// One entry of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeEvent {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EventKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub new_value: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub old_value: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub characters: Vec<CharacterRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_id: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
    /// Any other fields the event carried.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl NarrativeEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind: Some(kind),
            path: None,
            new_value: Value::Null,
            old_value: Value::Null,
            characters: Vec::new(),
            world_id: None,
            timestamp: 0,
            details: Map::new(),
        }
    }

    pub fn with_characters<I, C>(mut self, characters: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CharacterRef>,
    {
        self.characters = characters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is(&self, kind: &EventKind) -> bool {
        self.kind.as_ref() == Some(kind)
    }

    /// Short label used in prompts and logs.
    pub fn label(&self) -> &str {
        self.kind.as_ref().map(EventKind::as_str).unwrap_or("UNTYPED")
    }
}

impl From<&WorldChange> for NarrativeEvent {
    fn from(change: &WorldChange) -> Self {
        Self {
            kind: Some(EventKind::WorldChange),
            path: Some(change.path.clone()),
            new_value: change.new_value.clone(),
            old_value: change.old_value.clone().unwrap_or(Value::Null),
            characters: Vec::new(),
            world_id: Some(change.world_id.clone()),
            timestamp: change.timestamp,
            details: Map::new(),
        }
    }
}

/// Accumulated relationship between two characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    /// The pair, in sorted order.
    pub characters: [String; 2],
    pub strength: f64,
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub history: Vec<NarrativeEvent>,
}

impl Relationship {
    fn new(a: &str, b: &str) -> Self {
        Self {
            characters: [a.to_string(), b.to_string()],
            strength: 0.0,
            relationship_type: "neutral".to_string(),
            history: Vec::new(),
        }
    }

    pub fn involves(&self, id: &str) -> bool {
        self.characters.iter().any(|c| c == id)
    }
}

/// A timeline value observed at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: i64,
    pub timeline: Value,
}

fn default_capacity() -> usize {
    MAX_EVENTS
}

/// Narrative memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeMemory {
    events: VecDeque<NarrativeEvent>,
    relationships: BTreeMap<String, Relationship>,
    timelines: Vec<TimelineEntry>,
    player_decisions: Vec<PlayerDecision>,
    #[serde(default = "default_capacity")]
    max_events: usize,
}

impl Default for NarrativeMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl NarrativeMemory {
    pub fn new() -> Self {
        Self::with_capacity(MAX_EVENTS)
    }

    /// Memory that keeps at most `max_events` events (at least one).
    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: VecDeque::new(),
            relationships: BTreeMap::new(),
            timelines: Vec::new(),
            player_decisions: Vec::new(),
            max_events: max_events.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_events
    }

    /// Record an untyped event. Fails if `event` is not a JSON object of the
    /// expected shape.
    pub fn record_event(&mut self, event: Value) -> Result<NarrativeEvent, MemoryError> {
        self.record_event_at(event, Utc::now().timestamp_millis())
    }

    pub fn record_event_at(&mut self, event: Value, now: i64) -> Result<NarrativeEvent, MemoryError> {
        if !event.is_object() {
            return Err(MemoryError::InvalidEvent(format!(
                "expected an object, got {}",
                json_kind(&event)
            )));
        }
        let event: NarrativeEvent =
            serde_json::from_value(event).map_err(|e| MemoryError::InvalidEvent(e.to_string()))?;
        Ok(self.record_at(event, now))
    }

    pub fn record(&mut self, event: NarrativeEvent) -> NarrativeEvent {
        self.record_at(event, Utc::now().timestamp_millis())
    }

    /// Append `event` stamped with `now`, evicting the oldest event on overflow.
    ///
    /// Character interactions strengthen the relationship between the first
    /// two listed characters; writes to `timeline` extend the timeline history
    /// under the event's own timestamp (or `now` when it has none).
    pub fn record_at(&mut self, event: NarrativeEvent, now: i64) -> NarrativeEvent {
        let observed_at = if event.timestamp != 0 { event.timestamp } else { now };
        let mut event = event;
        event.timestamp = now;

        if event.is(&EventKind::CharacterInteraction) {
            self.update_relationship(&event);
        }
        if event.path.as_deref() == Some("timeline") {
            self.timelines.push(TimelineEntry {
                timestamp: observed_at,
                timeline: event.new_value.clone(),
            });
        }

        self.events.push_back(event.clone());
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
        event
    }

    fn update_relationship(&mut self, event: &NarrativeEvent) {
        let (Some(first), Some(second)) = (
            event.characters.first().and_then(CharacterRef::id),
            event.characters.get(1).and_then(CharacterRef::id),
        ) else {
            return;
        };
        if first == second {
            return;
        }

        let (a, b) = if first <= second { (first, second) } else { (second, first) };
        let relationship = self
            .relationships
            .entry(pair_key(a, b))
            .or_insert_with(|| Relationship::new(a, b));
        relationship.history.push(event.clone());
        relationship.strength = (relationship.strength + RELATIONSHIP_INCREMENT).min(1.0);
        debug!(a, b, strength = relationship.strength, "Relationship updated");
    }

    pub fn record_player_decision(&mut self, decision: PlayerDecision) -> PlayerDecision {
        self.record_player_decision_at(decision, Utc::now().timestamp_millis())
    }

    pub fn record_player_decision_at(&mut self, mut decision: PlayerDecision, now: i64) -> PlayerDecision {
        decision.timestamp = now;
        self.player_decisions.push(decision.clone());
        decision
    }

    /// The last `count` events, oldest first.
    pub fn recent_events(&self, count: usize) -> Vec<&NarrativeEvent> {
        let skip = self.events.len().saturating_sub(count);
        self.events.iter().skip(skip).collect()
    }

    pub fn events(&self) -> impl Iterator<Item = &NarrativeEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Every relationship the character is part of, in pair-key order.
    pub fn character_relationships(&self, id: &str) -> Vec<&Relationship> {
        self.relationships
            .values()
            .filter(|relationship| relationship.involves(id))
            .collect()
    }

    /// The relationship between two characters, in either order.
    pub fn relationship(&self, a: &str, b: &str) -> Option<&Relationship> {
        let key = if a <= b { pair_key(a, b) } else { pair_key(b, a) };
        self.relationships.get(&key)
    }

    /// Timeline transitions, newest first.
    pub fn timeline_history(&self) -> Vec<TimelineEntry> {
        let mut history = self.timelines.clone();
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        history
    }

    pub fn player_decisions(&self) -> &[PlayerDecision] {
        &self.player_decisions
    }

    pub fn to_json(&self) -> Result<String, MemoryError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, MemoryError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn pair_key(a: &str, b: &str) -> String {
    format!("{a}|{b}")
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn interaction(a: &str, b: &str) -> NarrativeEvent {
        NarrativeEvent::new(EventKind::CharacterInteraction).with_characters([a, b])
    }

    #[test]
    fn test_new_memory_is_empty() {
        let memory = NarrativeMemory::new();
        assert!(memory.is_empty());
        assert_eq!(memory.capacity(), MAX_EVENTS);
        assert!(memory.timeline_history().is_empty());
        assert!(memory.player_decisions().is_empty());
    }

    #[test]
    fn test_record_event_rejects_non_objects() {
        let mut memory = NarrativeMemory::new();
        for bad in [json!(null), json!(3), json!("event"), json!([1, 2])] {
            assert!(matches!(
                memory.record_event(bad),
                Err(MemoryError::InvalidEvent(_))
            ));
        }
        assert!(memory.is_empty());
    }

    #[test]
    fn test_record_event_keeps_extra_fields() {
        let mut memory = NarrativeMemory::new();
        let recorded = memory
            .record_event_at(json!({"type": "test", "description": "Test event"}), 77)
            .unwrap();
        assert_eq!(recorded.timestamp, 77);
        assert_eq!(recorded.kind, Some(EventKind::Other("test".to_string())));
        assert_eq!(recorded.details["description"], "Test event");

        let recent = memory.recent_events(5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0], &recorded);
    }

    #[test]
    fn test_recent_events_are_chronological() {
        let mut memory = NarrativeMemory::new();
        for i in 0..10 {
            memory
                .record_event_at(json!({"type": "test", "description": format!("Event {i}")}), i)
                .unwrap();
        }
        let recent = memory.recent_events(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].details["description"], "Event 5");
        assert_eq!(recent[4].details["description"], "Event 9");
        assert_eq!(memory.recent_events(50).len(), 10);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut memory = NarrativeMemory::new();
        for i in 0..=MAX_EVENTS as i64 {
            memory.record_at(NarrativeEvent::new(EventKind::Other(format!("e{i}"))), i + 1);
        }
        assert_eq!(memory.len(), MAX_EVENTS);
        let first = memory.events().next().unwrap();
        assert_eq!(first.label(), "e1");
    }

    #[test]
    fn test_relationship_strength_caps_at_one() {
        let mut memory = NarrativeMemory::new();
        for k in 1..=12 {
            memory.record(interaction("char1", "char2"));
            let expected = (0.1 * k as f64).min(1.0);
            let strength = memory.relationship("char1", "char2").unwrap().strength;
            assert!((strength - expected).abs() < 1e-9, "k={k}");
        }
        let relationship = memory.relationship("char2", "char1").unwrap();
        assert_eq!(relationship.history.len(), 12);
        assert_eq!(relationship.relationship_type, "neutral");
    }

    #[test]
    fn test_relationship_pair_is_unordered() {
        let mut memory = NarrativeMemory::new();
        memory.record(interaction("b", "a"));
        memory.record(interaction("a", "b"));
        assert_eq!(memory.character_relationships("a").len(), 1);
        let strength = memory.character_relationships("b")[0].strength;
        assert!((strength - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_only_first_two_characters_count() {
        let mut memory = NarrativeMemory::new();
        memory.record(
            NarrativeEvent::new(EventKind::CharacterInteraction).with_characters(["a", "b", "c"]),
        );
        assert!(memory.relationship("a", "b").is_some());
        assert!(memory.relationship("a", "c").is_none());
        assert!(memory.character_relationships("c").is_empty());
    }

    #[test]
    fn test_relationship_from_character_records() {
        let mut memory = NarrativeMemory::new();
        memory
            .record_event(json!({
                "type": "CHARACTER_INTERACTION",
                "characters": [{"id": "char1"}, {"id": "char2"}]
            }))
            .unwrap();
        let relationships = memory.character_relationships("char1");
        assert_eq!(relationships.len(), 1);
        assert!((relationships[0].strength - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_interaction_needs_two_distinct_characters() {
        let mut memory = NarrativeMemory::new();
        memory.record(NarrativeEvent::new(EventKind::CharacterInteraction).with_characters(["a"]));
        memory.record(interaction("a", "a"));
        // Substring ids must not match.
        memory.record(interaction("ab", "cd"));
        assert!(memory.character_relationships("a").is_empty());
        assert_eq!(memory.len(), 3);
    }

    #[test]
    fn test_timeline_history_descending() {
        let mut memory = NarrativeMemory::new();
        for (ts, timeline) in [(10, "magical"), (30, "utopian"), (20, "normal")] {
            let change = WorldChange {
                path: "timeline".to_string(),
                new_value: json!(timeline),
                old_value: None,
                world_id: "w".to_string(),
                timestamp: ts,
            };
            memory.record_at(NarrativeEvent::from(&change), 1_000);
        }
        memory.record_at(NarrativeEvent::new(EventKind::WorldChange), 1_000);

        let history = memory.timeline_history();
        let stamps: Vec<i64> = history.iter().map(|entry| entry.timestamp).collect();
        assert_eq!(stamps, vec![30, 20, 10]);
        assert_eq!(history[0].timeline, json!("utopian"));
    }

    #[test]
    fn test_player_decisions_logged() {
        let mut memory = NarrativeMemory::new();
        let decision = PlayerDecision {
            action_type: Some("aggressive".to_string()),
            ..Default::default()
        };
        let logged = memory.record_player_decision_at(decision, 500);
        assert_eq!(logged.timestamp, 500);
        assert_eq!(memory.player_decisions().len(), 1);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut memory = NarrativeMemory::new();
        memory.record_at(interaction("a", "b"), 1);
        memory
            .record_event_at(json!({"path": "timeline", "newValue": "magical", "timestamp": 5, "mood": 0.25}), 2)
            .unwrap();
        memory.record_player_decision_at(PlayerDecision::default(), 3);

        let restored = NarrativeMemory::from_json(&memory.to_json().unwrap()).unwrap();
        assert_eq!(restored, memory);
        assert_eq!(restored.timeline_history()[0].timestamp, 5);
    }
}
