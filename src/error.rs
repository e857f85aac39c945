// Surveil Error Types

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("Capability failure: {0}")]
    Capability(String),

    #[error("Incomplete artifact: {0}")]
    IncompleteArtifact(String),

    #[error("Invalid transition for {video}/{stage}: {from} -> {to}")]
    InvalidTransition {
        video: String,
        stage: String,
        from: String,
        to: String,
    },

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification used in run summaries and exit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    SourceUnreadable,
    Capability,
    IncompleteArtifact,
    State,
    Io,
    Other,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration(_) => ErrorKind::Configuration,
            PipelineError::SourceUnreadable(_) => ErrorKind::SourceUnreadable,
            PipelineError::Capability(_) => ErrorKind::Capability,
            PipelineError::IncompleteArtifact(_) => ErrorKind::IncompleteArtifact,
            PipelineError::Database(_)
            | PipelineError::InvalidTransition { .. }
            | PipelineError::UnknownStage(_)
            | PipelineError::VideoNotFound(_) => ErrorKind::State,
            PipelineError::Io(_) | PipelineError::Json(_) => ErrorKind::Io,
            PipelineError::Other(_) => ErrorKind::Other,
        }
    }

    /// Configuration errors abort a run before any stage executes.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
