//! Presence status classification.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::ProbeError;
use crate::phrase::parse_relative;
use crate::vocabulary::Vocabulary;

/// The three categories any status text falls into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusClass<'a> {
    /// Online or composing a message.
    ActiveNow,
    /// A last-seen phrase, already translated to the canonical vocabulary.
    LastSeen {
        vocabulary: &'static str,
        phrase: String,
        original: &'a str,
    },
    Unrecognized,
}

/// Trim surrounding whitespace and lower-case for comparison.
pub fn normalize_status(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Classify normalized status text.
///
/// Activity keywords are checked across all vocabularies before any
/// last-seen prefix, so an "online" badge always wins.
pub fn classify_status<'a>(
    normalized: &'a str,
    vocabularies: &[&'static Vocabulary],
) -> StatusClass<'a> {
    if normalized.is_empty() {
        return StatusClass::Unrecognized;
    }

    if vocabularies.iter().any(|v| v.is_active(normalized)) {
        return StatusClass::ActiveNow;
    }

    vocabularies
        .iter()
        .find_map(|v| {
            v.last_seen_phrase(normalized).map(|original| StatusClass::LastSeen {
                vocabulary: v.locale,
                phrase: v.translate(original),
                original,
            })
        })
        .unwrap_or(StatusClass::Unrecognized)
}

/// Turn raw status text into an absolute instant relative to `now`.
pub fn resolve_status<Tz: TimeZone>(
    raw: &str,
    vocabularies: &[&'static Vocabulary],
    now: &DateTime<Tz>,
) -> Result<DateTime<Utc>, ProbeError> {
    let normalized = normalize_status(raw);

    match classify_status(&normalized, vocabularies) {
        StatusClass::ActiveNow => Ok(now.with_timezone(&Utc)),
        StatusClass::LastSeen {
            phrase, original, ..
        } => parse_relative(&phrase, now).ok_or_else(|| ProbeError::UnparsableStatus {
            phrase: original.to_string(),
        }),
        StatusClass::Unrecognized => Err(ProbeError::StatusUnrecognized { status: normalized }),
    }
}
