//! Shard provisioning: creating physical databases for new tenants.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
use crate::keys::normalize_name;
use crate::shard::{ServicePlan, ShardLocation};

/// Creates physical shard databases and enumerates the ones that exist.
///
/// `create_shard` must be safe to retry: an earlier crashed attempt may have
/// left the database behind, and implementations recover a fully initialized
/// shard idempotently or fail cleanly on a half-initialized one, never
/// silently reusing it. `list_databases` exists so the catalog can compare
/// the registry's mapping set against physical reality and report orphans.
#[async_trait]
pub trait ShardProvisioner: Send + Sync {
    /// Allocate a shard database for a tenant: create it, apply the tenant
    /// schema, and seed reference data. Returns the new location.
    async fn create_shard(
        &self,
        tenant_name: &str,
        server: &str,
        port: u16,
        service_plan: &ServicePlan,
    ) -> CatalogResult<ShardLocation>;

    /// Non-system databases present on a server.
    async fn list_databases(&self, server: &str) -> CatalogResult<Vec<String>>;
}

/// In-memory provisioner double.
///
/// Tracks created databases per server and can be scripted to fail the next
/// N create calls with a retriable provisioning error, which is how facade
/// tests exercise the bounded-retry path.
#[derive(Debug, Default)]
pub struct InMemoryProvisioner {
    databases: Arc<Mutex<HashMap<String, BTreeSet<String>>>>,
    failures: AtomicUsize,
    create_calls: AtomicUsize,
}

impl InMemoryProvisioner {
    /// Create a provisioner with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` `create_shard` calls with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Number of `create_shard` calls observed.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Pre-seed an existing database, as if a prior attempt had provisioned
    /// it and crashed before registration.
    pub fn seed_database(&self, server: &str, database: &str) {
        self.databases
            .lock()
            .entry(server.to_string())
            .or_default()
            .insert(database.to_string());
    }
}

#[async_trait]
impl ShardProvisioner for InMemoryProvisioner {
    async fn create_shard(
        &self,
        tenant_name: &str,
        server: &str,
        port: u16,
        service_plan: &ServicePlan,
    ) -> CatalogResult<ShardLocation> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CatalogError::provision("injected transient failure"));
        }

        let database = normalize_name(tenant_name);
        if database.is_empty() {
            return Err(CatalogError::invalid_name(tenant_name));
        }

        let mut databases = self.databases.lock();
        let server_dbs = databases.entry(server.to_string()).or_default();
        let recovered = !server_dbs.insert(database.clone());
        debug!(
            tenant = %database,
            %server,
            plan = %service_plan,
            recovered,
            "Provisioned shard database"
        );
        Ok(ShardLocation::new(server, database, port))
    }

    async fn list_databases(&self, server: &str) -> CatalogResult<Vec<String>> {
        Ok(self
            .databases
            .lock()
            .get(server)
            .map(|dbs| dbs.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_create_shard_names_database_after_normalized_tenant() {
        let provisioner = InMemoryProvisioner::new();
        let location = provisioner
            .create_shard("Test Tenant 1", "localhost", 1433, &ServicePlan::standard())
            .await
            .unwrap();
        assert_eq!(location.database, "testtenant1");
        assert_eq!(location.addr(), "localhost:1433");
    }

    #[tokio::test]
    async fn test_create_shard_is_idempotent() {
        let provisioner = InMemoryProvisioner::new();
        let plan = ServicePlan::standard();
        let first = provisioner
            .create_shard("venue", "localhost", 1433, &plan)
            .await
            .unwrap();
        let second = provisioner
            .create_shard("venue", "localhost", 1433, &plan)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            provisioner.list_databases("localhost").await.unwrap(),
            vec!["venue"]
        );
    }

    #[tokio::test]
    async fn test_scripted_failures_are_retriable() {
        let provisioner = InMemoryProvisioner::new();
        provisioner.fail_next(2);
        let plan = ServicePlan::standard();

        for _ in 0..2 {
            let err = provisioner
                .create_shard("venue", "localhost", 1433, &plan)
                .await
                .unwrap_err();
            assert!(err.is_retriable());
        }
        assert!(
            provisioner
                .create_shard("venue", "localhost", 1433, &plan)
                .await
                .is_ok()
        );
        assert_eq!(provisioner.create_calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_tenant_name_is_rejected() {
        let provisioner = InMemoryProvisioner::new();
        let err = provisioner
            .create_shard("   ", "localhost", 1433, &ServicePlan::standard())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidTenantName(_)));
    }
}
