//! Runtime Configuration
//!
//! A [`RuntimeConfig`] decides how flushes get scheduled and how failures
//! during a flush are surfaced. It can be built in code or loaded from JSON:
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json(r#"{ "flush_mode": "tokio" }"#)?;
//! let rt = Runtime::with_config(config);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How the scheduler turns a pending flush into an actual flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// The host calls [`Runtime::flush`](crate::reactive::Runtime::flush) at
    /// its own microtask boundary.
    #[default]
    Manual,

    /// Flushes run on a driver task spawned with `tokio::task::spawn_local`
    /// (see [`Runtime::flush_driver`](crate::reactive::Runtime::flush_driver))
    /// as soon as the writing task yields. Without a driver, writes log a
    /// warning and the host flushes manually.
    Tokio,
}

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Scheduling strategy for flushes.
    pub flush_mode: FlushMode,

    /// Upper bound on passes made by `Runtime::settle`.
    pub max_flush_passes: usize,

    /// Whether the default error hook logs failed effect reruns.
    pub report_effect_errors: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Manual,
            max_flush_passes: 100,
            report_effect_errors: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    pub fn with_max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes.max(1);
        self
    }

    pub fn with_error_reporting(mut self, enabled: bool) -> Self {
        self.report_effect_errors = enabled;
        self
    }
}
