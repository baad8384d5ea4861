//! Error types for catalog operations.

use thiserror::Error;

use crate::keys::TenantKey;
use crate::shard::ShardLocation;

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur in the routing and identity core.
///
/// Retriable kinds (`ShardProvisionFailed`, `ConnectionFailed`,
/// `RegistryUnavailable`) describe transient conditions; everything else is
/// terminal for the request that hit it.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The tenant name is empty or normalizes to nothing.
    #[error("invalid tenant name: {0:?}")]
    InvalidTenantName(String),

    /// The tenant key is already registered to a different shard.
    #[error("tenant key {key} is already registered to {existing}")]
    DuplicateTenant {
        /// The conflicting key.
        key: TenantKey,
        /// The location the key is already mapped to.
        existing: ShardLocation,
    },

    /// Shard provisioning failed; retriable with backoff.
    #[error("shard provisioning failed: {0}")]
    ShardProvisionFailed(String),

    /// A shard database exists but cannot be used as provisioned (for
    /// example left half-initialized by a crashed attempt). Operator
    /// cleanup is required; retrying cannot help.
    #[error("shard unusable: {0}")]
    ShardUnusable(String),

    /// No shard mapping exists for the key.
    #[error("unknown tenant key {0}")]
    UnknownTenant(TenantKey),

    /// Transport or session-binding failure while opening a routed
    /// connection; retriable.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The registry store could not be reached; retriable, and distinct from
    /// `UnknownTenant` so a transient outage is never reported as a missing
    /// tenant.
    #[error("shard registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Tenant directory failure.
    #[error("tenant directory error: {0}")]
    Directory(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CatalogError {
    /// Create an invalid-name error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidTenantName(name.into())
    }

    /// Create a provisioning error.
    pub fn provision(message: impl Into<String>) -> Self {
        Self::ShardProvisionFailed(message.into())
    }

    /// Create a shard-unusable error.
    pub fn shard_unusable(message: impl Into<String>) -> Self {
        Self::ShardUnusable(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a registry-unavailable error.
    pub fn registry(message: impl Into<String>) -> Self {
        Self::RegistryUnavailable(message.into())
    }

    /// Create a directory error.
    pub fn directory(message: impl Into<String>) -> Self {
        Self::Directory(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether retrying the operation may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ShardProvisionFailed(_) | Self::ConnectionFailed(_) | Self::RegistryUnavailable(_)
        )
    }

    /// Whether this is a resolve miss for an unregistered tenant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnknownTenant(_))
    }
}
