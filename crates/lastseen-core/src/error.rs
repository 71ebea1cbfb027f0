//! Probe error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable, wire-visible classification of every failure the core can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SessionUnavailable,
    SubjectNotFound,
    StatusUnrecognized,
    UnparsableStatus,
    ProbeNotFound,
    Storage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionUnavailable => "session_unavailable",
            Self::SubjectNotFound => "subject_not_found",
            Self::StatusUnrecognized => "status_unrecognized",
            Self::UnparsableStatus => "unparsable_status",
            Self::ProbeNotFound => "probe_not_found",
            Self::Storage => "storage",
        }
    }

    /// Whether the next poll cycle has a reasonable chance of succeeding
    /// without operator intervention.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::SessionUnavailable | Self::SubjectNotFound | Self::Storage
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("subject {user:?} not found in the source's result list")]
    SubjectNotFound { user: String },

    #[error("unrecognized status text: {status:?}")]
    StatusUnrecognized { status: String },

    #[error("could not parse last-seen phrase: {phrase:?}")]
    UnparsableStatus { phrase: String },
}

impl ProbeError {
    pub fn session(detail: impl fmt::Display) -> Self {
        Self::SessionUnavailable(detail.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionUnavailable(_) => ErrorKind::SessionUnavailable,
            Self::SubjectNotFound { .. } => ErrorKind::SubjectNotFound,
            Self::StatusUnrecognized { .. } => ErrorKind::StatusUnrecognized,
            Self::UnparsableStatus { .. } => ErrorKind::UnparsableStatus,
        }
    }
}
