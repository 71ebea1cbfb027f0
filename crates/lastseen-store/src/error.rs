use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("user and source must be non-empty")]
    InvalidSubject,

    #[error("archive row {id} has unreadable timestamp {value:?}")]
    CorruptTimestamp { id: i64, value: String },
}
