//! Execution configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for statement execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// How many times a conflicting statement is restarted before the
    /// conflict is reported
    pub max_restarts: u32,

    /// Default statement timeout in milliseconds (0 = none)
    pub statement_timeout_ms: u32,

    pub row_cache: RowCacheConfig,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            max_restarts: 10,
            statement_timeout_ms: 0,
            row_cache: RowCacheConfig::default(),
        }
    }
}

impl ExecConfig {
    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn with_statement_timeout(mut self, timeout_ms: u32) -> Self {
        self.statement_timeout_ms = timeout_ms;
        self
    }

    pub fn with_row_cache(mut self, row_cache: RowCacheConfig) -> Self {
        self.row_cache = row_cache;
        self
    }

    /// Small cache so tests exercise the spill path
    pub fn for_testing() -> Self {
        Self {
            max_restarts: 3,
            statement_timeout_ms: 0,
            row_cache: RowCacheConfig {
                memory_limit: 256,
                spill_dir: None,
            },
        }
    }
}

/// Scrollable cursor row cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowCacheConfig {
    /// Bytes kept in memory before rows move to a temporary file
    pub memory_limit: usize,

    /// Directory for the temporary file (system default if unset)
    pub spill_dir: Option<PathBuf>,
}

impl Default for RowCacheConfig {
    fn default() -> Self {
        Self {
            memory_limit: 1024 * 1024,
            spill_dir: None,
        }
    }
}
