use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_DATA_DIR: &str = "agent_companion_data";
const RUNTIME_DIR: &str = "runtime";
const STATUS_FILE: &str = "status.json";
const REPOS_FILE: &str = "repos.json";
const MEMORY_DIR: &str = "agent-memory";
const MAX_REPO_ID_LEN: usize = 128;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid repo id: {0:?}")]
pub struct InvalidRepoId(pub String);

/// Directory tree the external agent writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRoot {
    root: PathBuf,
}

impl DataRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<home>/agent_companion_data`, if a home directory can be found.
    pub fn default_location() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(DEFAULT_DATA_DIR)))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn status_file(&self) -> PathBuf {
        self.root.join(RUNTIME_DIR).join(STATUS_FILE)
    }

    pub fn repos_file(&self) -> PathBuf {
        self.root.join(REPOS_FILE)
    }

    pub fn repo_dir(&self, repo_id: &str) -> Result<PathBuf, InvalidRepoId> {
        validate_repo_id(repo_id)?;
        Ok(self.root.join(MEMORY_DIR).join(repo_id))
    }

    pub fn memory_dir(&self, repo_id: &str) -> Result<PathBuf, InvalidRepoId> {
        Ok(self.repo_dir(repo_id)?.join("memory"))
    }

    pub fn signatures_file(&self, repo_id: &str) -> Result<PathBuf, InvalidRepoId> {
        Ok(self.repo_dir(repo_id)?.join("failure_signatures.json"))
    }
}

/// Repo ids are single path segments; anything that could walk out of the
/// memory directory is rejected.
pub fn validate_repo_id(repo_id: &str) -> Result<(), InvalidRepoId> {
    let valid = !repo_id.is_empty()
        && repo_id.len() <= MAX_REPO_ID_LEN
        && repo_id != "."
        && repo_id != ".."
        && repo_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(InvalidRepoId(repo_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_agent_writers() {
        let root = DataRoot::new("/data");
        assert_eq!(
            root.status_file(),
            PathBuf::from("/data/runtime/status.json")
        );
        assert_eq!(root.repos_file(), PathBuf::from("/data/repos.json"));
        assert_eq!(
            root.memory_dir("a1b2c3d4e5").expect("valid id"),
            PathBuf::from("/data/agent-memory/a1b2c3d4e5/memory")
        );
        assert_eq!(
            root.signatures_file("default").expect("valid id"),
            PathBuf::from("/data/agent-memory/default/failure_signatures.json")
        );
    }

    #[test]
    fn rejects_ids_that_escape_the_memory_dir() {
        for id in ["", ".", "..", "../etc", "a/b", "a\\b", "name with space"] {
            assert_eq!(validate_repo_id(id), Err(InvalidRepoId(id.to_string())));
        }
        assert!(validate_repo_id(&"x".repeat(MAX_REPO_ID_LEN + 1)).is_err());
        assert!(validate_repo_id("repo-1_v2.0").is_ok());
    }
}
