use acd_core::{DataRoot, InvalidRepoId, MemoryRecord, RepoMap};
use serde::de::DeserializeOwned;
use std::{io, path::Path};
use thiserror::Error;
use tracing::debug;

const JOURNALS: [&str; 3] = ["failures", "decisions", "attempts"];

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error(transparent)]
    InvalidRepoId(#[from] InvalidRepoId),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Read-only view over the agent's repo map and per-repo memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    root: DataRoot,
}

impl MemoryStore {
    pub fn new(root: DataRoot) -> Self {
        Self { root }
    }

    /// The map is rewritten wholesale by the agent, so a torn or missing
    /// file is reported as "no repos yet" rather than as a failure.
    pub async fn read_repos(&self) -> Result<RepoMap, MemoryStoreError> {
        let path = self.root.repos_file();
        let Some(raw) = read_optional(&path).await? else {
            return Ok(RepoMap::new());
        };
        match serde_json::from_str::<RepoMap>(&raw) {
            Ok(repos) => Ok(repos),
            Err(err) => {
                debug!(event = "repos_file_unparseable", path = %path.display(), error = %err);
                Ok(RepoMap::new())
            }
        }
    }

    pub async fn repos_count(&self) -> Result<usize, MemoryStoreError> {
        Ok(self.read_repos().await?.len())
    }

    pub async fn read_memory(&self, repo_id: &str) -> Result<MemoryRecord, MemoryStoreError> {
        let memory_dir = self.root.memory_dir(repo_id)?;
        let mut record = MemoryRecord::default();

        for journal in JOURNALS {
            let path = memory_dir.join(format!("{journal}.md"));
            let Some(text) = read_optional(&path).await? else {
                continue;
            };
            match journal {
                "failures" => record.failures = text,
                "decisions" => record.decisions = text,
                _ => record.attempts = text,
            }
        }

        if let Some(state) = read_json(&memory_dir.join("state.json")).await? {
            record.state = state;
        }
        record.signatures = self.read_signatures(repo_id).await?;

        Ok(record)
    }

    /// The agent rewrites the signature list in place, so a torn file reads
    /// as no signatures instead of failing the whole record.
    async fn read_signatures(&self, repo_id: &str) -> Result<Vec<String>, MemoryStoreError> {
        let path = self.root.signatures_file(repo_id)?;
        let Some(raw) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(signatures) => Ok(signatures),
            Err(err) => {
                debug!(event = "signatures_file_unparseable", path = %path.display(), error = %err);
                Ok(Vec::new())
            }
        }
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, MemoryStoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(MemoryStoreError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, MemoryStoreError> {
    let Some(raw) = read_optional(path).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| MemoryStoreError::Parse {
            path: path.display().to_string(),
            source,
        })
}
