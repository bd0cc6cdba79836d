use acd_core::{
    data_root::validate_repo_id, AgentStatus, ErrorBody, InvalidRepoId, MemoryRecord, RepoMap,
    ReposResponse, StartResponse, StopResponse,
};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HUB_URL: &str = "http://127.0.0.1:5050";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },
    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    InvalidRepoId(#[from] InvalidRepoId),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Typed access to the hub's JSON routes.
#[derive(Debug, Clone)]
pub struct HubClient {
    http: reqwest::Client,
    base_url: String,
}

impl HubClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ClientError::Build)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn start(&self) -> Result<StartResponse, ClientError> {
        self.send(self.http.post(self.url("/api/agent/start"))).await
    }

    pub async fn stop(&self) -> Result<StopResponse, ClientError> {
        self.send(self.http.post(self.url("/api/agent/stop"))).await
    }

    /// `running` plus whatever the agent last wrote to its status file.
    pub async fn status(&self) -> Result<AgentStatus, ClientError> {
        self.send(self.http.get(self.url("/api/agent/status")))
            .await
    }

    /// Like [`HubClient::status`], with `repos_count` and `data_root` added.
    pub async fn hub_status(&self) -> Result<AgentStatus, ClientError> {
        self.send(self.http.get(self.url("/api/status"))).await
    }

    pub async fn repos(&self) -> Result<RepoMap, ClientError> {
        let response: ReposResponse = self.send(self.http.get(self.url("/api/repos"))).await?;
        Ok(response.repos)
    }

    pub async fn memory(&self, repo_id: &str) -> Result<MemoryRecord, ClientError> {
        validate_repo_id(repo_id)?;
        self.send(self.http.get(self.url(&format!("/api/memory/{repo_id}"))))
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await.map_err(|source| ClientError::Transport {
            url: source
                .url()
                .map(|url| url.to_string())
                .unwrap_or_else(|| self.base_url.clone()),
            source,
        })?;
        let url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|source| ClientError::Decode { url, source })
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(error) = serde_json::from_str::<ErrorBody>(body) {
        return error.message;
    }
    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}
