use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Repo id to absolute checkout path, as recorded by the agent.
pub type RepoMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReposResponse {
    #[serde(default)]
    pub repos: RepoMap,
}

/// Everything the agent has persisted for one repo. Free-form: the journals
/// are markdown and `state` is whatever JSON the agent last wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    #[serde(default)]
    pub failures: String,
    #[serde(default)]
    pub decisions: String,
    #[serde(default)]
    pub attempts: String,
    #[serde(default = "empty_state")]
    pub state: Value,
    #[serde(default)]
    pub signatures: Vec<String>,
}

impl Default for MemoryRecord {
    fn default() -> Self {
        Self {
            failures: String::new(),
            decisions: String::new(),
            attempts: String::new(),
            state: empty_state(),
            signatures: Vec::new(),
        }
    }
}

impl MemoryRecord {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
            && self.decisions.is_empty()
            && self.attempts.is_empty()
            && self.signatures.is_empty()
            && self.state.as_object().map_or(self.state.is_null(), Map::is_empty)
    }

    /// Journal entries are `### <timestamp>` headed blocks; counts headings.
    pub fn entry_count(journal: &str) -> usize {
        journal
            .lines()
            .filter(|line| line.starts_with("### "))
            .count()
    }
}

fn empty_state() -> Value {
    Value::Object(Map::new())
}
