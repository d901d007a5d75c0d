use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt column value: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for cascade_types::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => cascade_types::Error::NotFound(what),
            other => cascade_types::Error::Database(other.to_string()),
        }
    }
}
