//! Error types for SQL Server shard operations.

use marquee_catalog::CatalogError;
use thiserror::Error;

/// Result type for MSSQL shard operations.
pub type MssqlResult<T> = Result<T, MssqlError>;

/// Errors that can occur talking to a SQL Server shard.
#[derive(Error, Debug)]
pub enum MssqlError {
    /// Tiberius/SQL Server error.
    #[error("sql server error: {0}")]
    SqlServer(#[from] tiberius::error::Error),

    /// Socket-level error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection establishment timed out.
    #[error("connection to {0} timed out")]
    ConnectTimeout(String),

    /// Shard database exists but is not fully initialized.
    #[error("shard database {0:?} exists but is not initialized")]
    HalfInitialized(String),
}

impl MssqlError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<MssqlError> for CatalogError {
    fn from(err: MssqlError) -> Self {
        match err {
            MssqlError::SqlServer(e) => CatalogError::connection(e.to_string()),
            MssqlError::Io(e) => CatalogError::connection(e.to_string()),
            MssqlError::ConnectTimeout(addr) => {
                CatalogError::connection(format!("connection to {addr} timed out"))
            }
            MssqlError::Config(msg) => CatalogError::config(msg),
            MssqlError::HalfInitialized(db) => CatalogError::shard_unusable(format!(
                "shard database {db:?} exists but is not initialized; operator cleanup required"
            )),
        }
    }
}
