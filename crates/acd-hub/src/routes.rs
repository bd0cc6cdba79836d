use crate::{
    memory_store::{MemoryStore, MemoryStoreError},
    status_file::{self, StatusFileError},
    supervisor::{StopOutcome, Supervisor, SupervisorError},
};
use acd_core::{
    status::{KEY_DATA_ROOT, KEY_REPOS_COUNT},
    AgentStatus, DataRoot, ErrorBody, HealthResponse, MemoryRecord, ReposResponse,
    ServiceDescriptor, StartResponse, StopResponse, MSG_ALREADY_RUNNING, MSG_INTERNAL_ERROR,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};

const SERVICE_NAME: &str = "Agent Companion Hub";
const ENDPOINTS: [&str; 9] = [
    "/health",
    "/api/agent/start",
    "/api/agent/stop",
    "/api/agent/status",
    "/api/watcher/start",
    "/api/watcher/stop",
    "/api/status",
    "/api/repos",
    "/api/memory/{repo_id}",
];

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub data_root: DataRoot,
}

impl AppState {
    pub fn new(supervisor: Arc<Supervisor>, data_root: DataRoot) -> Self {
        Self {
            supervisor,
            data_root,
        }
    }

    fn memory_store(&self) -> MemoryStore {
        MemoryStore::new(self.data_root.clone())
    }
}

#[derive(Debug)]
pub enum ApiError {
    AlreadyRunning,
    SpawnFailed(String),
    InvalidRepoId,
    Internal,
    Memory(String),
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::AlreadyRunning { .. } => ApiError::AlreadyRunning,
            SupervisorError::Spawn { .. } => {
                error!(event = "agent_spawn_error", error = %err);
                ApiError::SpawnFailed(err.to_string())
            }
        }
    }
}

impl From<StatusFileError> for ApiError {
    fn from(err: StatusFileError) -> Self {
        error!(event = "status_read_error", error = %err);
        ApiError::Internal
    }
}

impl From<MemoryStoreError> for ApiError {
    fn from(err: MemoryStoreError) -> Self {
        match err {
            MemoryStoreError::InvalidRepoId(_) => ApiError::InvalidRepoId,
            MemoryStoreError::Parse { .. } => {
                warn!(event = "memory_read_error", error = %err);
                ApiError::Memory(err.to_string())
            }
            MemoryStoreError::Io { .. } => {
                error!(event = "memory_read_error", error = %err);
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::AlreadyRunning => (StatusCode::BAD_REQUEST, MSG_ALREADY_RUNNING.to_string()),
            ApiError::SpawnFailed(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to start agent: {detail}"),
            ),
            ApiError::InvalidRepoId => (StatusCode::BAD_REQUEST, "Invalid repo id".to_string()),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                MSG_INTERNAL_ERROR.to_string(),
            ),
            ApiError::Memory(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };
        (status, Json(ErrorBody::new(message))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(describe))
        .route("/health", get(health))
        .route("/api/agent/start", post(start_agent))
        .route("/api/watcher/start", post(start_agent))
        .route("/api/agent/stop", post(stop_agent))
        .route("/api/watcher/stop", post(stop_agent))
        .route("/api/agent/status", get(agent_status))
        .route("/api/status", get(hub_status))
        .route("/api/repos", get(list_repos))
        .route("/api/memory/:repo_id", get(repo_memory))
        .with_state(state)
}

async fn describe() -> Json<ServiceDescriptor> {
    Json(ServiceDescriptor {
        name: SERVICE_NAME.to_string(),
        status: "active".to_string(),
        endpoints: ENDPOINTS
            .iter()
            .map(|path| path.to_string())
            .collect(),
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn start_agent(State(state): State<AppState>) -> Result<Json<StartResponse>, ApiError> {
    state.supervisor.start()?;
    Ok(Json(StartResponse::started()))
}

async fn stop_agent(State(state): State<AppState>) -> Json<StopResponse> {
    match state.supervisor.stop() {
        StopOutcome::Signalled { .. } => Json(StopResponse::stopped()),
        StopOutcome::NotManaged => Json(StopResponse::not_managed()),
    }
}

async fn agent_status(State(state): State<AppState>) -> Result<Json<AgentStatus>, ApiError> {
    Ok(Json(read_agent_status(&state).await?))
}

async fn hub_status(State(state): State<AppState>) -> Result<Json<AgentStatus>, ApiError> {
    let mut status = read_agent_status(&state).await?;
    let repos_count = state.memory_store().repos_count().await?;
    status
        .report
        .insert(KEY_REPOS_COUNT, Value::from(repos_count));
    status.report.insert(
        KEY_DATA_ROOT,
        Value::from(state.data_root.path().display().to_string()),
    );
    Ok(Json(status))
}

async fn list_repos(State(state): State<AppState>) -> Result<Json<ReposResponse>, ApiError> {
    let repos = state.memory_store().read_repos().await?;
    Ok(Json(ReposResponse { repos }))
}

async fn repo_memory(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
) -> Result<Json<MemoryRecord>, ApiError> {
    Ok(Json(state.memory_store().read_memory(&repo_id).await?))
}

/// Liveness comes from the supervisor, everything else from the file. The
/// two may disagree: the file can show a fresh heartbeat from an agent this
/// hub never launched.
async fn read_agent_status(state: &AppState) -> Result<AgentStatus, ApiError> {
    let report = status_file::read_status(&state.data_root.status_file()).await?;
    Ok(AgentStatus::new(state.supervisor.is_running(), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::AgentCommand;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::{fs, path::PathBuf};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        dir: TempDir,
        state: AppState,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_command(AgentCommand {
                program: PathBuf::from("sleep"),
                args: vec!["30".to_string()],
                cwd: None,
            })
        }

        fn with_command(command: AgentCommand) -> Self {
            let dir = TempDir::new().expect("tempdir");
            let state = AppState::new(
                Arc::new(Supervisor::new(command)),
                DataRoot::new(dir.path()),
            );
            Self { dir, state }
        }

        fn write(&self, relative: &str, content: &str) {
            let path = self.dir.path().join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("mkdir");
            }
            fs::write(path, content).expect("write");
        }

        async fn call(&self, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .expect("request");
            let response = router(self.state.clone())
                .oneshot(request)
                .await
                .expect("infallible");
            let status = response.status();
            let bytes = response
                .into_body()
                .collect()
                .await
                .expect("body")
                .to_bytes();
            let value = serde_json::from_slice(&bytes).expect("json body");
            (status, value)
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.state.supervisor.stop();
        }
    }

    #[tokio::test]
    async fn status_without_file_or_agent_is_zeroed() {
        let hub = Harness::new();
        let (status, body) = hub.call("GET", "/api/agent/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"running": false, "score": 0, "ts": 0}));
    }

    #[tokio::test]
    async fn status_passes_file_through_without_agent() {
        let hub = Harness::new();
        hub.write("runtime/status.json", r#"{"score": 0.42, "ts": 1234}"#);
        let (status, body) = hub.call("GET", "/api/agent/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"running": false, "score": 0.42, "ts": 1234}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn status_reports_supervised_agent_without_file() {
        let hub = Harness::new();
        let (status, body) = hub.call("POST", "/api/agent/start").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "started"}));

        let (_, body) = hub.call("GET", "/api/agent/status").await;
        assert_eq!(body, json!({"running": true, "score": 0, "ts": 0}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn second_start_is_rejected_until_stop() {
        let hub = Harness::new();
        let (status, _) = hub.call("POST", "/api/agent/start").await;
        assert_eq!(status, StatusCode::OK);
        let pid = hub.state.supervisor.pid();

        for uri in ["/api/agent/start", "/api/watcher/start"] {
            let (status, body) = hub.call("POST", uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, json!({"message": "Agent already running"}));
        }
        assert_eq!(hub.state.supervisor.pid(), pid);

        let (status, body) = hub.call("POST", "/api/agent/stop").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "stopped"}));

        let (status, _) = hub.call("POST", "/api/watcher/start").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn stop_always_succeeds() {
        let hub = Harness::new();
        for uri in ["/api/agent/stop", "/api/watcher/stop", "/api/agent/stop"] {
            let (status, body) = hub.call("POST", uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(
                body,
                json!({"status": "stopped", "message": "No active process found managed by server"})
            );
        }
    }

    #[tokio::test]
    async fn spawn_failure_is_a_server_error() {
        let hub = Harness::with_command(AgentCommand {
            program: PathBuf::from("/nonexistent/acd-agent"),
            args: Vec::new(),
            cwd: None,
        });
        let (status, body) = hub.call("POST", "/api/agent/start").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = body["message"].as_str().expect("message");
        assert!(message.starts_with("Failed to start agent"));

        let (_, body) = hub.call("GET", "/api/agent/status").await;
        assert_eq!(body["running"], json!(false));
    }

    #[tokio::test]
    async fn unreadable_status_file_is_internal_error() {
        let hub = Harness::new();
        fs::create_dir_all(hub.dir.path().join("runtime/status.json")).expect("mkdir");
        let (status, body) = hub.call("GET", "/api/agent/status").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"message": "Internal Error"}));
    }

    #[tokio::test]
    async fn hub_status_adds_repo_count_and_data_root() {
        let hub = Harness::new();
        hub.write("runtime/status.json", r#"{"score": 0.5, "ts": 99, "repos_count": 42}"#);
        hub.write("repos.json", r#"{"aaaa": "/src/a", "bbbb": "/src/b"}"#);

        let (status, body) = hub.call("GET", "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], json!(false));
        assert_eq!(body["score"], json!(0.5));
        assert_eq!(body["repos_count"], json!(2));
        assert_eq!(
            body["data_root"],
            json!(hub.dir.path().display().to_string())
        );
    }

    #[tokio::test]
    async fn repos_and_memory_are_served() {
        let hub = Harness::new();
        let (_, body) = hub.call("GET", "/api/repos").await;
        assert_eq!(body, json!({"repos": {}}));

        hub.write("repos.json", r#"{"aaaa": "/src/a"}"#);
        hub.write("agent-memory/aaaa/memory/attempts.md", "### ---\nran tests\n\n");
        hub.write("agent-memory/aaaa/failure_signatures.json", r#"["boom"]"#);

        let (_, body) = hub.call("GET", "/api/repos").await;
        assert_eq!(body, json!({"repos": {"aaaa": "/src/a"}}));

        let (status, body) = hub.call("GET", "/api/memory/aaaa").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["attempts"], json!("### ---\nran tests\n\n"));
        assert_eq!(body["signatures"], json!(["boom"]));
        assert_eq!(body["state"], json!({}));
    }

    #[tokio::test]
    async fn memory_rejects_bad_ids_and_reports_corrupt_state() {
        let hub = Harness::new();
        let (status, body) = hub.call("GET", "/api/memory/..").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"message": "Invalid repo id"}));

        hub.write("agent-memory/bbbb/memory/state.json", "{ nope");
        let (status, body) = hub.call("GET", "/api/memory/bbbb").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["message"]
            .as_str()
            .expect("message")
            .contains("state.json"));
    }

    #[tokio::test]
    async fn health_and_descriptor_respond() {
        let hub = Harness::new();
        let (status, body) = hub.call("GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));

        let (_, body) = hub.call("GET", "/").await;
        assert_eq!(body["status"], json!("active"));
        assert!(body["endpoints"]
            .as_array()
            .expect("endpoints")
            .contains(&json!("/api/agent/status")));
    }
}
