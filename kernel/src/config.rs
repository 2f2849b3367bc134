// Scenario Configuration
//
// Parameters of an end-to-end run. Every field has a compiled-in
// default, so an empty JSON object is a complete configuration.

use serde::{Deserialize, Serialize};

/// Table used when none is configured.
pub const DEFAULT_TABLE: &str = "kv-concurrency-reference-table";
pub const DEFAULT_ITEM_COUNT: usize = 500;
pub const DEFAULT_TEXT_LEN: usize = 10_000;
pub const DEFAULT_WORKER_COUNT: usize = 300;

/// Scenario configuration loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub table: String,
    /// Rows seeded before the writers start.
    pub item_count: usize,
    /// Length of each seeded row's random payload.
    pub text_len: usize,
    pub worker_count: usize,
    /// Makes writer identities, payloads and shuffles reproducible.
    pub seed: Option<u64>,
}

impl ScenarioConfig {
    /// Default built-in configuration (used if no config is provided).
    pub fn default_config() -> Self {
        Self {
            table: DEFAULT_TABLE.into(),
            item_count: DEFAULT_ITEM_COUNT,
            text_len: DEFAULT_TEXT_LEN,
            worker_count: DEFAULT_WORKER_COUNT,
            seed: None,
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::default_config()
    }
}
