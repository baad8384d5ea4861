//! Configuration for the catalog and for shard server access.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};
use crate::shard::{ServicePlan, ShardProtocol};

/// Catalog-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Server hosting the catalog store.
    pub catalog_server: String,
    /// Name of the catalog database.
    pub catalog_database: String,
    /// Plan assigned to tenants that do not choose one.
    pub default_service_plan: ServicePlan,
    /// Total attempts for a shard provisioning call (first try included).
    pub provision_retries: u32,
    /// Base backoff between provisioning attempts; grows linearly per
    /// attempt.
    pub retry_backoff: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_server: "localhost".to_string(),
            catalog_database: "tenantcatalog".to_string(),
            default_service_plan: ServicePlan::standard(),
            provision_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl CatalogConfig {
    /// Create a builder.
    pub fn builder() -> CatalogConfigBuilder {
        CatalogConfigBuilder::default()
    }
}

/// Builder for [`CatalogConfig`].
#[derive(Debug, Default)]
pub struct CatalogConfigBuilder {
    catalog_server: Option<String>,
    catalog_database: Option<String>,
    default_service_plan: Option<ServicePlan>,
    provision_retries: Option<u32>,
    retry_backoff: Option<Duration>,
}

impl CatalogConfigBuilder {
    /// Set the catalog server.
    pub fn catalog_server(mut self, server: impl Into<String>) -> Self {
        self.catalog_server = Some(server.into());
        self
    }

    /// Set the catalog database name.
    pub fn catalog_database(mut self, database: impl Into<String>) -> Self {
        self.catalog_database = Some(database.into());
        self
    }

    /// Set the default service plan.
    pub fn default_service_plan(mut self, plan: ServicePlan) -> Self {
        self.default_service_plan = Some(plan);
        self
    }

    /// Set how many times provisioning is attempted before giving up.
    pub fn provision_retries(mut self, attempts: u32) -> Self {
        self.provision_retries = Some(attempts);
        self
    }

    /// Set the base backoff between provisioning attempts.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> CatalogResult<CatalogConfig> {
        let defaults = CatalogConfig::default();
        let provision_retries = self.provision_retries.unwrap_or(defaults.provision_retries);
        if provision_retries == 0 {
            return Err(CatalogError::config(
                "provision_retries must be at least 1",
            ));
        }
        Ok(CatalogConfig {
            catalog_server: self.catalog_server.unwrap_or(defaults.catalog_server),
            catalog_database: self.catalog_database.unwrap_or(defaults.catalog_database),
            default_service_plan: self
                .default_service_plan
                .unwrap_or(defaults.default_service_plan),
            provision_retries,
            retry_backoff: self.retry_backoff.unwrap_or(defaults.retry_backoff),
        })
    }
}

/// Credentials and transport settings for reaching shard servers.
///
/// Injected into connectors and provisioners; the routing core treats it as
/// an opaque settings bag supplied by the application host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardUserConfig {
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Default shard server port.
    pub port: u16,
    /// Transport protocol.
    pub protocol: ShardProtocol,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Trust the server certificate when encrypting.
    pub trust_cert: bool,
}

impl Default for ShardUserConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            port: 1433,
            protocol: ShardProtocol::Tcp,
            connect_timeout: Duration::from_secs(30),
            trust_cert: false,
        }
    }
}

impl ShardUserConfig {
    /// Create a config with credentials, other settings defaulted.
    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_catalog_config_defaults() {
        let config = CatalogConfig::default();
        assert_eq!(config.catalog_database, "tenantcatalog");
        assert_eq!(config.provision_retries, 3);
        assert_eq!(config.default_service_plan, ServicePlan::standard());
    }

    #[test]
    fn test_builder_overrides() {
        let config = CatalogConfig::builder()
            .catalog_server("catalog.internal")
            .catalog_database("marqueecatalog")
            .provision_retries(5)
            .retry_backoff(Duration::from_millis(50))
            .build()
            .unwrap();
        assert_eq!(config.catalog_server, "catalog.internal");
        assert_eq!(config.provision_retries, 5);
        assert_eq!(config.retry_backoff, Duration::from_millis(50));
    }

    #[test]
    fn test_builder_rejects_zero_retries() {
        let result = CatalogConfig::builder().provision_retries(0).build();
        assert!(matches!(result, Err(CatalogError::Config(_))));
    }

    #[test]
    fn test_shard_user_config_defaults() {
        let config = ShardUserConfig::with_credentials("developer", "hunter2");
        assert_eq!(config.port, 1433);
        assert_eq!(config.protocol, ShardProtocol::Tcp);
        assert!(!config.trust_cert);
    }
}
