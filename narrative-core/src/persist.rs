//! Session persistence for save/load.
//!
//! A save file holds the world document and the game master's agent state
//! as one versioned JSON object.

use crate::gm::agent::{GameMasterState, GameStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save file version.
pub const SAVE_VERSION: u32 = 1;

/// A saved session with everything needed to resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSession {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// RFC 3339 creation time.
    pub saved_at: String,

    /// The world document.
    pub world: Value,

    pub game_master: GameMasterState,

    pub metadata: SaveMetadata,
}

/// Summary readable without restoring the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMetadata {
    pub world_id: String,
    pub timeline: String,
    pub status: GameStatus,
    pub event_count: usize,
    #[serde(default)]
    pub saved_at: String,
}

impl SavedSession {
    pub fn new(world: Value, game_master: GameMasterState, saved_at: DateTime<Utc>) -> Self {
        let saved_at = saved_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        let metadata = SaveMetadata {
            world_id: text_field(&world, "id"),
            timeline: text_field(&world, "timeline"),
            status: game_master.status,
            event_count: game_master.narrative_memory.len(),
            saved_at: saved_at.clone(),
        };

        Self {
            version: SAVE_VERSION,
            saved_at,
            world,
            game_master,
            metadata,
        }
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file, rejecting other format versions.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;
        check_version(saved.version)?;
        Ok(saved)
    }

    /// Read only the metadata of a save file.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<SaveMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: SaveMetadata,
        }

        let partial: Partial = serde_json::from_str(&content)?;
        check_version(partial.version)?;
        Ok(partial.metadata)
    }
}

fn check_version(found: u32) -> Result<(), PersistError> {
    if found == SAVE_VERSION {
        Ok(())
    } else {
        Err(PersistError::VersionMismatch {
            expected: SAVE_VERSION,
            found,
        })
    }
}

fn text_field(world: &Value, key: &str) -> String {
    world
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// A save file found on disk.
#[derive(Debug, Clone)]
pub struct SaveInfo {
    pub path: PathBuf,
    pub metadata: SaveMetadata,
}

/// List readable save files in a directory, newest first.
pub async fn list_saves(dir: impl AsRef<Path>) -> Result<Vec<SaveInfo>, PersistError> {
    let mut saves = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            if let Ok(metadata) = SavedSession::peek_metadata(&path).await {
                saves.push(SaveInfo { path, metadata });
            }
        }
    }

    saves.sort_by(|a, b| b.metadata.saved_at.cmp(&a.metadata.saved_at));
    Ok(saves)
}

/// Default save file name for a world.
pub fn save_path(base_dir: impl AsRef<Path>, world_id: &str) -> PathBuf {
    let sanitized: String = world_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    base_dir.as_ref().join(format!("{sanitized}.json"))
}
