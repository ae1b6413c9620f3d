use thiserror::Error;

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An insert hit a uniqueness constraint on an identity column.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// A stored state column held a code outside the known mapping.
    #[error("invalid state code {0} in storage")]
    InvalidStateCode(i32),
}

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, StoreError>;
