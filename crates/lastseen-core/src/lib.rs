//! lastseen-core: presence domain types and contracts.
//! Probe and storage contracts, status classification, locale vocabularies
//! and the relative-time phrase parser. No IO.

pub mod error;
pub mod phrase;
pub mod probe;
pub mod status;
pub mod storage;
pub mod types;
pub mod vocabulary;

pub use error::{ErrorKind, ProbeError};
pub use probe::Probe;
pub use status::{StatusClass, classify_status, normalize_status, resolve_status};
pub use storage::Storage;
pub use types::{ArchiveRecord, PresenceSnapshot, WatchedSubject};
pub use vocabulary::Vocabulary;
