//! World state: a path-addressed property tree with change notification.
//!
//! The world is a single JSON document. Every mutation goes through
//! [`WorldState::set_property`], which returns a [`WorldChange`] and
//! synchronously broadcasts it to all registered listeners.

use crate::clock::{Clock, SystemClock};
use crate::narrator::ResponseSchema;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_REALITY_STABILITY: f64 = 0.85;
pub const DEFAULT_MAGIC_LEVEL: f64 = 0.3;
pub const DEFAULT_TECH_LEVEL: f64 = 0.7;
pub const DEFAULT_POPULATION: f64 = 0.5;

/// Maximum per-step drift applied to `reality_stability` by [`WorldState::evolve`].
pub const STABILITY_DRIFT: f64 = 0.05;

/// Errors from world state operations.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid world document: {0}")]
    InvalidDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorldError {
    fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        WorldError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Immutable record of one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldChange {
    pub path: String,
    pub new_value: Value,
    /// `None` when the leaf did not exist before the write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    pub world_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Which reality the world currently follows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Timeline {
    #[default]
    Normal,
    Magical,
    Technological,
    PostApocalyptic,
    Utopian,
    /// Any timeline name outside the built-in set.
    Other(String),
}

impl Timeline {
    pub fn as_str(&self) -> &str {
        match self {
            Timeline::Normal => "normal",
            Timeline::Magical => "magical",
            Timeline::Technological => "technological",
            Timeline::PostApocalyptic => "post-apocalyptic",
            Timeline::Utopian => "utopian",
            Timeline::Other(name) => name,
        }
    }
}

impl From<String> for Timeline {
    fn from(value: String) -> Self {
        match value.as_str() {
            "normal" => Timeline::Normal,
            "magical" => Timeline::Magical,
            "technological" => Timeline::Technological,
            "post-apocalyptic" => Timeline::PostApocalyptic,
            "utopian" => Timeline::Utopian,
            _ => Timeline::Other(value),
        }
    }
}

impl From<&str> for Timeline {
    fn from(value: &str) -> Self {
        Timeline::from(value.to_string())
    }
}

impl From<Timeline> for String {
    fn from(value: Timeline) -> Self {
        match value {
            Timeline::Other(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ResponseSchema for Timeline {
    fn schema_name() -> &'static str {
        "timeline"
    }

    fn response_schema() -> Value {
        json!({
            "type": "string",
            "description": "One of normal, magical, technological, post-apocalyptic, utopian, or a custom timeline name"
        })
    }
}

/// A candidate timeline switch evaluated by [`WorldState::evolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineBranch {
    pub id: String,
    pub trigger: String,
    pub timeline: Timeline,
    pub probability: f64,
}

/// Result of one evolution step.
#[derive(Debug, Clone, PartialEq)]
pub struct EvolveOutcome {
    pub reality_stability: f64,
    pub branch_taken: Option<TimelineBranch>,
}

/// A change listener. Listeners cannot fail; they observe the change after
/// the mutation has been committed.
pub type WorldListener = Arc<dyn Fn(&WorldChange) + Send + Sync>;

/// Handle returned by `add_listener`; pass it to `remove_listener` to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Capability the orchestrator needs from a world store.
pub trait WorldStore: Send + Sync {
    fn world_id(&self) -> &str;
    fn get_property(&self, path: &str) -> Option<&Value>;
    fn set_property(&mut self, path: &str, value: Value) -> Result<WorldChange, WorldError>;
    fn add_listener(&mut self, listener: WorldListener) -> ListenerId;
    fn remove_listener(&mut self, id: ListenerId) -> bool;
    /// Deep copy of the whole document.
    fn snapshot(&self) -> Value;
    fn to_json(&self) -> Result<String, WorldError>;
}

/// The in-memory world document.
pub struct WorldState {
    root: Value,
    listeners: Vec<(ListenerId, WorldListener)>,
    next_listener: u64,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("root", &self.root)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldState {
    /// Create a fresh world with default properties and the normal timeline.
    pub fn new() -> Self {
        Self::from_document(default_document(Uuid::new_v4().to_string()))
    }

    fn from_document(root: Value) -> Self {
        Self {
            root,
            listeners: Vec::new(),
            next_listener: 0,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a different time source for change timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id(&self) -> &str {
        self.root.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn timeline(&self) -> Timeline {
        self.root
            .get("timeline")
            .and_then(Value::as_str)
            .map(Timeline::from)
            .unwrap_or_default()
    }

    /// The whole document.
    pub fn document(&self) -> &Value {
        &self.root
    }

    /// Registered branches, in insertion order. Malformed entries are skipped.
    pub fn branches(&self) -> Vec<TimelineBranch> {
        self.root
            .get("possibleBranches")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look up a value by dot-separated path. Missing segments yield `None`.
    ///
    /// Array elements can be addressed by numeric segments, e.g. `characters.0.name`.
    pub fn get_property(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        path.split('.').try_fold(&self.root, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Numeric shorthand for [`get_property`](Self::get_property).
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get_property(path).and_then(Value::as_f64)
    }

    /// Write `value` at `path` and notify every listener.
    ///
    /// Missing or null intermediate nodes are created as empty objects. A path
    /// that is empty, has an empty segment, or runs through a scalar fails with
    /// [`WorldError::InvalidPath`] and leaves the document untouched.
    pub fn set_property(&mut self, path: &str, value: Value) -> Result<WorldChange, WorldError> {
        let segments = split_path(path)?;
        self.check_writable(path, &segments)?;

        let Some((leaf, parents)) = segments.split_last() else {
            return Err(WorldError::invalid_path(path, "empty path"));
        };
        let mut node = &mut self.root;
        for segment in parents {
            node = descend_mut(node, segment, path)?;
        }
        let old_value = write_leaf(node, leaf, value.clone(), path)?;

        let change = WorldChange {
            path: path.to_string(),
            new_value: value,
            old_value,
            world_id: self.id().to_string(),
            timestamp: self.clock.now_millis(),
        };
        debug!(path = %change.path, "World property set");
        self.notify(&change);
        Ok(change)
    }

    /// Validate a write without touching the document.
    fn check_writable(&self, path: &str, segments: &[&str]) -> Result<(), WorldError> {
        let mut node = &self.root;
        for (i, segment) in segments.iter().enumerate() {
            let is_leaf = i + 1 == segments.len();
            let next = match node {
                Value::Object(map) => map.get(*segment),
                Value::Array(items) => {
                    let index = parse_index(segment, items.len(), path)?;
                    items.get(index)
                }
                _ => {
                    return Err(WorldError::invalid_path(
                        path,
                        format!("segment '{segment}' is inside a non-container value"),
                    ))
                }
            };
            match next {
                // Everything below a missing or null node gets created fresh.
                None | Some(Value::Null) if !is_leaf => return Ok(()),
                Some(child) if !is_leaf => node = child,
                _ => {}
            }
        }
        Ok(())
    }

    /// Register a listener. Registering the same `Arc` twice returns the
    /// existing id and the listener still fires once per change.
    pub fn add_listener(&mut self, listener: WorldListener) -> ListenerId {
        if let Some((id, _)) = self
            .listeners
            .iter()
            .find(|(_, existing)| same_listener(existing, &listener))
        {
            return *id;
        }
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Unsubscribe. Returns false if the id was not registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn notify(&self, change: &WorldChange) {
        let listeners: Vec<WorldListener> = self
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(change);
        }
    }

    /// Append a branch candidate. No validation, no dedup, no notification.
    pub fn add_timeline_branch(
        &mut self,
        trigger: impl Into<String>,
        timeline: impl Into<Timeline>,
        probability: f64,
    ) -> TimelineBranch {
        let branch = TimelineBranch {
            id: Uuid::new_v4().to_string(),
            trigger: trigger.into(),
            timeline: timeline.into(),
            probability,
        };
        let entry = json!({
            "trigger": branch.trigger,
            "timeline": branch.timeline,
            "probability": branch.probability,
            "id": branch.id,
        });
        match self.root.get_mut("possibleBranches") {
            Some(Value::Array(items)) => items.push(entry),
            _ => {
                if let Value::Object(map) = &mut self.root {
                    map.insert("possibleBranches".to_string(), Value::Array(vec![entry]));
                }
            }
        }
        branch
    }

    /// Append a character record to `characters` (one notification for the whole list).
    pub fn add_character(&mut self, character: Value) -> Result<WorldChange, WorldError> {
        let mut characters = self
            .get_property("characters")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        characters.push(character);
        self.set_property("characters", Value::Array(characters))
    }

    /// One evolution step using the thread RNG.
    pub fn evolve(&mut self) -> Result<EvolveOutcome, WorldError> {
        self.evolve_with(&mut rand::thread_rng())
    }

    /// Drift `reality_stability` by up to ±0.05 (clamped to [0, 1]), then take
    /// the first branch, in insertion order, whose independent draw falls
    /// below its probability.
    pub fn evolve_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<EvolveOutcome, WorldError> {
        let current = self
            .get_f64("properties.reality_stability")
            .unwrap_or(DEFAULT_REALITY_STABILITY);
        let drift = rng.gen::<f64>() * (2.0 * STABILITY_DRIFT) - STABILITY_DRIFT;
        let reality_stability = (current + drift).clamp(0.0, 1.0);
        self.set_property("properties.reality_stability", json!(reality_stability))?;

        let mut branch_taken = None;
        for branch in self.branches() {
            if rng.gen::<f64>() < branch.probability {
                self.set_property("timeline", json!(branch.timeline))?;
                info!(timeline = %branch.timeline, trigger = %branch.trigger, "Timeline changed");
                branch_taken = Some(branch);
                break;
            }
        }

        Ok(EvolveOutcome {
            reality_stability,
            branch_taken,
        })
    }

    /// Deep copy of the document.
    pub fn snapshot(&self) -> Value {
        self.root.clone()
    }

    pub fn to_json(&self) -> Result<String, WorldError> {
        Ok(serde_json::to_string(&self.root)?)
    }

    /// Restore a world from [`to_json`](Self::to_json) output. Listeners are not restored.
    pub fn from_json(json: &str) -> Result<Self, WorldError> {
        let root: Value = serde_json::from_str(json)?;
        Self::from_value(root)
    }

    pub fn from_value(root: Value) -> Result<Self, WorldError> {
        if !root.is_object() {
            return Err(WorldError::InvalidDocument(
                "world document must be a JSON object".to_string(),
            ));
        }
        Ok(Self::from_document(root))
    }
}

impl WorldStore for WorldState {
    fn world_id(&self) -> &str {
        self.id()
    }

    fn get_property(&self, path: &str) -> Option<&Value> {
        WorldState::get_property(self, path)
    }

    fn set_property(&mut self, path: &str, value: Value) -> Result<WorldChange, WorldError> {
        WorldState::set_property(self, path, value)
    }

    fn add_listener(&mut self, listener: WorldListener) -> ListenerId {
        WorldState::add_listener(self, listener)
    }

    fn remove_listener(&mut self, id: ListenerId) -> bool {
        WorldState::remove_listener(self, id)
    }

    fn snapshot(&self) -> Value {
        WorldState::snapshot(self)
    }

    fn to_json(&self) -> Result<String, WorldError> {
        WorldState::to_json(self)
    }
}

fn default_document(id: String) -> Value {
    json!({
        "id": id,
        "timeline": Timeline::Normal,
        "properties": {
            "reality_stability": DEFAULT_REALITY_STABILITY,
            "magic_level": DEFAULT_MAGIC_LEVEL,
            "tech_level": DEFAULT_TECH_LEVEL,
            "population": DEFAULT_POPULATION,
        },
        "possibleBranches": [],
        "characters": [],
        "currentEvents": [],
    })
}

fn split_path(path: &str) -> Result<Vec<&str>, WorldError> {
    if path.is_empty() {
        return Err(WorldError::invalid_path(path, "empty path"));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(WorldError::invalid_path(path, "empty path segment"));
    }
    Ok(segments)
}

fn parse_index(segment: &str, len: usize, path: &str) -> Result<usize, WorldError> {
    let index: usize = segment
        .parse()
        .map_err(|_| WorldError::invalid_path(path, format!("'{segment}' is not an array index")))?;
    if index >= len {
        return Err(WorldError::invalid_path(
            path,
            format!("index {index} out of bounds (len {len})"),
        ));
    }
    Ok(index)
}

fn same_listener(a: &WorldListener, b: &WorldListener) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn descend_mut<'a>(node: &'a mut Value, segment: &str, path: &str) -> Result<&'a mut Value, WorldError> {
    let child = match node {
        Value::Object(map) => map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new())),
        Value::Array(items) => {
            let index = parse_index(segment, items.len(), path)?;
            &mut items[index]
        }
        _ => {
            return Err(WorldError::invalid_path(
                path,
                format!("segment '{segment}' is inside a non-container value"),
            ))
        }
    };
    if child.is_null() {
        *child = Value::Object(Map::new());
    }
    Ok(child)
}

fn write_leaf(node: &mut Value, leaf: &str, value: Value, path: &str) -> Result<Option<Value>, WorldError> {
    match node {
        Value::Object(map) => Ok(map.insert(leaf.to_string(), value)),
        Value::Array(items) => {
            let index = parse_index(leaf, items.len(), path)?;
            Ok(Some(std::mem::replace(&mut items[index], value)))
        }
        _ => Err(WorldError::invalid_path(
            path,
            format!("segment '{leaf}' is inside a non-container value"),
        )),
    }
}
