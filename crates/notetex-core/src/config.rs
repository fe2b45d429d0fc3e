//! Engine configuration.

use crate::error::Result;
use notetex_syntax::DelimiterSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for scanning, expansion and renderer polling.
///
/// Every field has a default, so a configuration file only needs to name the
/// settings it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Math delimiters in precedence order.
    pub delimiters: Vec<DelimiterSpec>,
    /// Delay between two readiness checks of the typesetter.
    pub ready_poll_interval_ms: u64,
    /// Readiness checks made before a cycle is abandoned.
    pub ready_max_attempts: u32,
    /// Also read declarations written in the note itself, after the
    /// definitions source.
    pub inline_definitions: bool,
    /// Environment blocks nested deeper than this are not expanded.
    pub max_environment_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delimiters: DelimiterSpec::defaults(),
            ready_poll_interval_ms: 50,
            ready_max_attempts: 20,
            inline_definitions: false,
            max_environment_depth: notetex_macros::expander::DEFAULT_MAX_DEPTH,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }
}
