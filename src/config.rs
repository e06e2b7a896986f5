//! Runtime configuration shared by every host below a root.

use serde::{Deserialize, Serialize};

/// Default cap on chained re-entrant writes to a single provider.
pub const DEFAULT_MAX_REENTRANT_WRITES: usize = 64;

/// Runtime knobs, attached to a root host and inherited by descendants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Emit `tracing` warnings for programmer errors (mis-typed payloads,
    /// dropped re-entrant writes). On by default in debug builds.
    pub dev_warnings: bool,
    /// How many re-entrant writes one `set` call may chain before further
    /// writes are dropped.
    pub max_reentrant_writes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dev_warnings: cfg!(debug_assertions),
            max_reentrant_writes: DEFAULT_MAX_REENTRANT_WRITES,
        }
    }
}
