pub mod data_root;
pub mod memory;
pub mod metrics;
pub mod status;

use serde::{Deserialize, Serialize};

pub use data_root::{DataRoot, InvalidRepoId};
pub use memory::{MemoryRecord, RepoMap, ReposResponse};
pub use metrics::DisplayMetrics;
pub use status::{AgentStatus, StatusReport};

pub const STATUS_STARTED: &str = "started";
pub const STATUS_STOPPED: &str = "stopped";
pub const MSG_ALREADY_RUNNING: &str = "Agent already running";
pub const MSG_NOT_MANAGED: &str = "No active process found managed by server";
pub const MSG_INTERNAL_ERROR: &str = "Internal Error";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartResponse {
    pub status: String,
}

impl StartResponse {
    pub fn started() -> Self {
        Self {
            status: STATUS_STARTED.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StopResponse {
    pub fn stopped() -> Self {
        Self {
            status: STATUS_STOPPED.to_string(),
            message: None,
        }
    }

    pub fn not_managed() -> Self {
        Self {
            status: STATUS_STOPPED.to_string(),
            message: Some(MSG_NOT_MANAGED.to_string()),
        }
    }
}

/// Body of every non-2xx response from the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub status: String,
    pub endpoints: Vec<String>,
}
