//! Engine configuration, loaded once at startup.

use crate::primitives::{DEFAULT_EVENT_CAPACITY, DEFAULT_GRAPH_PREFIX, DEFAULT_REPLAY_DELAY_MS};
use crate::validation::ShapeRules;
use serde::{Deserialize, Serialize};

/// Settings for a [`crate::Directory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryConfig {
    /// Prepended to every id to name its graph partition.
    pub graph_prefix: String,
    /// Buffer size of each event category channel.
    pub event_capacity: usize,
    /// Pause between replayed events on a new subscription. 0 disables it.
    pub replay_delay_ms: u64,
    pub rules: ShapeRules,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            graph_prefix: DEFAULT_GRAPH_PREFIX.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            replay_delay_ms: DEFAULT_REPLAY_DELAY_MS,
            rules: ShapeRules::default(),
        }
    }
}
