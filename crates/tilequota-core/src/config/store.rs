//! Quota store selection.

use serde::{Deserialize, Serialize};

/// Which quota store backs the engine and how its hit queue is sized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store provider: `"memory"` or `"postgres"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Capacity of the bounded hit-statistics queue.
    #[serde(default = "default_hit_queue_capacity")]
    pub hit_queue_capacity: usize,
    /// Maximum number of queued hit batches coalesced into one commit.
    #[serde(default = "default_hit_batch_limit")]
    pub hit_batch_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            hit_queue_capacity: default_hit_queue_capacity(),
            hit_batch_limit: default_hit_batch_limit(),
        }
    }
}

fn default_provider() -> String {
    "memory".to_string()
}

fn default_hit_queue_capacity() -> usize {
    1024
}

fn default_hit_batch_limit() -> usize {
    64
}
