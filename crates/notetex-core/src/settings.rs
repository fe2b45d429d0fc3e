//! The persisted definitions document.

use crate::error::Result;
use notetex_macros::{builtins::DEFAULT_SOURCE, Definitions, Extraction};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// User-editable macro and environment declarations shared by every note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSet {
    pub macros_source: String,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            macros_source: DEFAULT_SOURCE.to_string(),
        }
    }
}

impl CommandSet {
    pub fn new(macros_source: impl Into<String>) -> Self {
        Self {
            macros_source: macros_source.into(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let set: Self = serde_json::from_str(&content)?;
        Ok(set)
    }

    pub fn extract(&self) -> Extraction {
        Definitions::extract(&self.macros_source)
    }
}
