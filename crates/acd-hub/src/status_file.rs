use acd_core::StatusReport;
use std::{io, path::Path};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StatusFileError {
    #[error("failed to read status file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Reads the status file the agent rewrites on every scoring pass.
///
/// A missing or unparseable file means the agent has not reported yet and
/// yields the zeroed report. Only other I/O failures are errors.
pub async fn read_status(path: &Path) -> Result<StatusReport, StatusFileError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(event = "status_file_missing", path = %path.display());
            return Ok(StatusReport::zeroed());
        }
        Err(err) if err.kind() == io::ErrorKind::InvalidData => {
            debug!(event = "status_file_unparseable", path = %path.display(), error = %err);
            return Ok(StatusReport::zeroed());
        }
        Err(source) => {
            return Err(StatusFileError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };

    match StatusReport::parse(&raw) {
        Some(report) => Ok(report),
        None => {
            debug!(event = "status_file_unparseable", path = %path.display());
            Ok(StatusReport::zeroed())
        }
    }
}
