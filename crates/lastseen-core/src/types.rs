use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Watch-set ───────────────────────────────────────────────────

/// One (user, source) pair under observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchedSubject {
    pub user: String,
    pub source: String,
}

impl WatchedSubject {
    pub fn new(user: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            source: source.into(),
        }
    }

    /// Both fields must carry something other than whitespace.
    pub fn is_valid(&self) -> bool {
        !self.user.trim().is_empty() && !self.source.trim().is_empty()
    }
}

impl fmt::Display for WatchedSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.source)
    }
}

// ─── Snapshots & archive ─────────────────────────────────────────

/// A resolved last-activity instant for one subject, produced once per
/// successful probe call and handed to the archive sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub user: String,
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

impl PresenceSnapshot {
    pub fn new(subject: &WatchedSubject, observed_at: DateTime<Utc>) -> Self {
        Self {
            user: subject.user.clone(),
            source: subject.source.clone(),
            observed_at,
        }
    }
}

/// Append-only archive row as persisted by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub user: String,
}
