use crate::types::{ArchiveRecord, PresenceSnapshot, WatchedSubject};

/// Storage collaborator as seen by the polling loop.
///
/// Synchronous, like the backend traits it sits next to; async callers run it
/// on a blocking thread.
pub trait Storage: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current watch-set, in the store's enumeration order.
    fn list_watched(&self) -> Result<Vec<WatchedSubject>, Self::Error>;

    /// Append one snapshot to the archive. Never updates existing rows.
    fn append_archive(&self, snapshot: &PresenceSnapshot) -> Result<ArchiveRecord, Self::Error>;
}

impl<T: Storage + ?Sized> Storage for &T {
    type Error = T::Error;

    fn list_watched(&self) -> Result<Vec<WatchedSubject>, Self::Error> {
        (**self).list_watched()
    }

    fn append_archive(&self, snapshot: &PresenceSnapshot) -> Result<ArchiveRecord, Self::Error> {
        (**self).append_archive(snapshot)
    }
}
