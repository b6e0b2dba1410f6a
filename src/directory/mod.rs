//! Display-name lookup for participants whose handshake carries no name.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{PresenceError, Result};

pub trait UserDirectory: Send {
    fn resolve(&self, id: &str) -> Option<String>;
}

/// Directory backed by an in-memory id → name table.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    names: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a JSON object of the form `{"<id>": "<display name>"}`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let names: HashMap<String, String> = serde_json::from_str(&raw).map_err(|e| {
            PresenceError::invalid_config(format!("user directory {}: {}", path.display(), e))
        })?;

        tracing::info!(path = %path.display(), users = names.len(), "Loaded user directory");
        Ok(Self::new(names))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl UserDirectory for StaticDirectory {
    fn resolve(&self, id: &str) -> Option<String> {
        self.names
            .get(id)
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}
