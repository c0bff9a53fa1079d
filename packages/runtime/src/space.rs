// ABOUTME: Thread-safe in-memory registry of spaces and their sandbox-id sets
// ABOUTME: Spaces group sandboxes logically; container ownership stays with the manager

use crate::error::{Result, RuntimeError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Id of the space created at startup.
pub const DEFAULT_SPACE_ID: &str = "default";

/// A logical grouping of sandboxes.
#[derive(Debug, Clone, Serialize)]
pub struct Space {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

struct SpaceEntry {
    space: Space,
    sandbox_ids: HashSet<String>,
}

/// Registry of spaces. Owns space records and the id set of each space's
/// sandboxes; the manager owns the sandbox records themselves.
pub struct SpaceRegistry {
    spaces: RwLock<HashMap<String, SpaceEntry>>,
}

impl SpaceRegistry {
    /// Create the registry with the default space already present.
    pub fn new() -> Self {
        let now = Utc::now();
        let default = SpaceEntry {
            space: Space {
                id: DEFAULT_SPACE_ID.to_string(),
                name: DEFAULT_SPACE_ID.to_string(),
                description: String::new(),
                created_at: now,
                updated_at: now,
                metadata: None,
            },
            sandbox_ids: HashSet::new(),
        };
        let mut spaces = HashMap::new();
        spaces.insert(DEFAULT_SPACE_ID.to_string(), default);
        info!("Default space created");
        Self {
            spaces: RwLock::new(spaces),
        }
    }

    pub async fn create(
        &self,
        name: &str,
        description: String,
        metadata: Option<serde_json::Value>,
    ) -> Result<Space> {
        validate_space_name(name)?;

        let mut spaces = self.spaces.write().await;
        if spaces.values().any(|e| e.space.name == name) {
            warn!(name, "Attempted to create space with conflicting name");
            return Err(RuntimeError::SpaceNameConflict(name.to_string()));
        }

        let now = Utc::now();
        let space = Space {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description,
            created_at: now,
            updated_at: now,
            metadata,
        };
        info!(space_id = %space.id, name, "Space created");
        spaces.insert(
            space.id.clone(),
            SpaceEntry {
                space: space.clone(),
                sandbox_ids: HashSet::new(),
            },
        );
        Ok(space)
    }

    pub async fn get(&self, space_id: &str) -> Result<Space> {
        let spaces = self.spaces.read().await;
        spaces
            .get(space_id)
            .map(|e| e.space.clone())
            .ok_or(RuntimeError::SpaceNotFound)
    }

    pub async fn list(&self) -> Vec<Space> {
        let spaces = self.spaces.read().await;
        let mut all: Vec<Space> = spaces.values().map(|e| e.space.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Update description and metadata only; name and id are immutable.
    pub async fn update(
        &self,
        space_id: &str,
        description: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Space> {
        let mut spaces = self.spaces.write().await;
        let entry = spaces.get_mut(space_id).ok_or(RuntimeError::SpaceNotFound)?;
        if let Some(description) = description {
            entry.space.description = description;
        }
        if metadata.is_some() {
            entry.space.metadata = metadata;
        }
        entry.space.updated_at = Utc::now();
        info!(space_id, "Space updated");
        Ok(entry.space.clone())
    }

    /// Remove the space entry. The caller (the manager) must have deleted
    /// the contained sandboxes first.
    pub async fn delete(&self, space_id: &str) -> Result<()> {
        let mut spaces = self.spaces.write().await;
        spaces
            .remove(space_id)
            .map(|_| info!(space_id, "Space deleted"))
            .ok_or(RuntimeError::SpaceNotFound)
    }

    pub async fn contains(&self, space_id: &str) -> bool {
        self.spaces.read().await.contains_key(space_id)
    }

    pub async fn add_sandbox(&self, space_id: &str, sandbox_id: &str) -> Result<()> {
        let mut spaces = self.spaces.write().await;
        let entry = spaces.get_mut(space_id).ok_or(RuntimeError::SpaceNotFound)?;
        entry.sandbox_ids.insert(sandbox_id.to_string());
        debug!(space_id, sandbox_id, "Added sandbox reference to space");
        Ok(())
    }

    /// A missing space is tolerated here: deletion paths race with space
    /// removal and the reference is gone either way.
    pub async fn remove_sandbox(&self, space_id: &str, sandbox_id: &str) {
        let mut spaces = self.spaces.write().await;
        match spaces.get_mut(space_id) {
            Some(entry) => {
                entry.sandbox_ids.remove(sandbox_id);
                debug!(space_id, sandbox_id, "Removed sandbox reference from space");
            }
            None => {
                warn!(space_id, sandbox_id, "Space gone while removing sandbox reference");
            }
        }
    }

    pub async fn sandbox_ids(&self, space_id: &str) -> Result<Vec<String>> {
        let spaces = self.spaces.read().await;
        spaces
            .get(space_id)
            .map(|e| e.sandbox_ids.iter().cloned().collect())
            .ok_or(RuntimeError::SpaceNotFound)
    }
}

impl Default for SpaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Space names follow the DNS label grammar: lowercase alphanumerics and
/// hyphens, starting and ending alphanumeric, 1-63 characters.
pub fn validate_space_name(name: &str) -> Result<()> {
    let invalid = || RuntimeError::InvalidSpaceName(name.to_string());
    if name.is_empty() || name.len() > 63 {
        return Err(invalid());
    }
    let bytes = name.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return Err(invalid());
    }
    if !bytes.iter().all(|&b| alnum(b) || b == b'-') {
        return Err(invalid());
    }
    Ok(())
}
