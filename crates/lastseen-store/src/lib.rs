//! SQLite storage collaborator: the watch-set and the append-only archive.

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::Store;
