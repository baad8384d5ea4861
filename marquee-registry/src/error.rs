//! Error types for the SQLite catalog store.

use marquee_catalog::CatalogError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the SQLite catalog store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite driver error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),

    /// The stored row could not be decoded into catalog types.
    #[error("corrupt catalog row: {0}")]
    Corrupt(String),

    /// Store configuration or schema problem.
    #[error("store configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Create a corrupt-row error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(tokio_rusqlite::Error::Rusqlite(err))
    }
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        // Driver failures are transient from the caller's point of view and
        // must stay distinct from "tenant not found".
        match err {
            StoreError::Sqlite(e) => CatalogError::registry(e.to_string()),
            StoreError::Corrupt(msg) => CatalogError::registry(format!("corrupt row: {msg}")),
            StoreError::Config(msg) => CatalogError::config(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_retriable_registry_errors() {
        let err: CatalogError = StoreError::corrupt("bad protocol").into();
        assert!(matches!(err, CatalogError::RegistryUnavailable(_)));

        let err: CatalogError = StoreError::config("missing path").into();
        assert!(matches!(err, CatalogError::Config(_)));
    }
}
