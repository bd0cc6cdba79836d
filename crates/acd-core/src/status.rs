use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const KEY_RUNNING: &str = "running";
pub const KEY_SCORE: &str = "score";
pub const KEY_TS: &str = "ts";
pub const KEY_REPOS_COUNT: &str = "repos_count";
pub const KEY_DATA_ROOT: &str = "data_root";

/// Fields reported by the external agent through its status file.
///
/// The payload is not contracted, so every key is carried as an opaque JSON
/// value in file order. Only `running` is reserved: liveness is owned by the
/// hub and never read from the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusReport(Map<String, Value>);

impl Default for StatusReport {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl StatusReport {
    /// The record served while no status file exists yet.
    pub fn zeroed() -> Self {
        let mut fields = Map::new();
        fields.insert(KEY_SCORE.to_string(), Value::from(0));
        fields.insert(KEY_TS.to_string(), Value::from(0));
        Self(fields)
    }

    pub fn empty() -> Self {
        Self(Map::new())
    }

    /// Parses status file content. Returns `None` unless the content is a
    /// JSON object.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(raw).ok()? {
            Value::Object(fields) => Some(Self::from_fields(fields)),
            _ => None,
        }
    }

    pub fn from_fields(mut fields: Map<String, Value>) -> Self {
        fields.remove(KEY_RUNNING);
        Self(fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Sets a field, replacing any value the agent wrote under the same key.
    pub fn insert(&mut self, key: &str, value: Value) {
        if key == KEY_RUNNING {
            return;
        }
        self.0.insert(key.to_string(), value);
    }

    pub fn score(&self) -> f64 {
        self.number(KEY_SCORE)
    }

    pub fn ts(&self) -> f64 {
        self.number(KEY_TS)
    }

    pub fn repos_count(&self) -> u64 {
        self.0
            .get(KEY_REPOS_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn data_root(&self) -> Option<&str> {
        self.0.get(KEY_DATA_ROOT).and_then(Value::as_str)
    }

    fn number(&self, key: &str) -> f64 {
        self.0
            .get(key)
            .and_then(Value::as_f64)
            .filter(|value| value.is_finite())
            .unwrap_or(0.0)
    }
}

/// Wire record served by the status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    #[serde(default)]
    pub running: bool,
    #[serde(flatten)]
    pub report: StatusReport,
}

impl AgentStatus {
    pub fn new(running: bool, report: StatusReport) -> Self {
        Self { running, report }
    }

    pub fn score(&self) -> f64 {
        self.report.score()
    }

    pub fn ts(&self) -> f64 {
        self.report.ts()
    }

    pub fn repos_count(&self) -> u64 {
        self.report.repos_count()
    }

    pub fn data_root(&self) -> Option<&str> {
        self.report.data_root()
    }
}
