//! Tenant directory: catalog metadata for onboarded tenants.
//!
//! The directory is the application-facing list of tenants, kept beside the
//! shard registry. It never participates in routing; the registry alone
//! answers "which shard".

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::CatalogResult;
use crate::keys::{TenantIdentity, TenantKey, normalize_name};
use crate::shard::ServicePlan;

/// Catalog record for one onboarded tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    /// The tenant's durable identity.
    pub identity: TenantIdentity,
    /// Normalized name (lowercased, whitespace stripped).
    pub name: String,
    /// The name as the tenant entered it.
    pub display_name: String,
    /// Subscribed service plan.
    pub service_plan: ServicePlan,
    /// When the tenant was onboarded.
    pub created_at: DateTime<Utc>,
}

impl TenantRecord {
    /// Build a record for a display name, deriving identity and normalized
    /// name from it.
    pub fn new(display_name: impl Into<String>, service_plan: ServicePlan) -> Self {
        let display_name = display_name.into();
        Self {
            identity: TenantIdentity::derive(&display_name),
            name: normalize_name(&display_name),
            display_name,
            service_plan,
            created_at: Utc::now(),
        }
    }

    /// The tenant's integer shard key.
    pub fn key(&self) -> TenantKey {
        self.identity.key()
    }
}

/// Store of tenant metadata (add/get/list), injected into the catalog facade.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Add or replace a tenant record.
    async fn add(&self, record: TenantRecord) -> CatalogResult<()>;

    /// Look up a tenant by shard key.
    async fn get_by_key(&self, key: TenantKey) -> CatalogResult<Option<TenantRecord>>;

    /// Look up a tenant by name (normalized before lookup).
    async fn get_by_name(&self, name: &str) -> CatalogResult<Option<TenantRecord>>;

    /// All tenants, sorted by normalized name.
    async fn list(&self) -> CatalogResult<Vec<TenantRecord>>;

    /// Remove a tenant record. Removing an absent key is a no-op.
    async fn remove(&self, key: TenantKey) -> CatalogResult<()>;
}

/// In-memory tenant directory for tests and single-process embedding.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    tenants: Arc<RwLock<HashMap<i32, TenantRecord>>>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantDirectory for InMemoryDirectory {
    async fn add(&self, record: TenantRecord) -> CatalogResult<()> {
        self.tenants.write().insert(record.key().value(), record);
        Ok(())
    }

    async fn get_by_key(&self, key: TenantKey) -> CatalogResult<Option<TenantRecord>> {
        Ok(self.tenants.read().get(&key.value()).cloned())
    }

    async fn get_by_name(&self, name: &str) -> CatalogResult<Option<TenantRecord>> {
        let normalized = normalize_name(name);
        Ok(self
            .tenants
            .read()
            .values()
            .find(|record| record.name == normalized)
            .cloned())
    }

    async fn list(&self) -> CatalogResult<Vec<TenantRecord>> {
        let mut records: Vec<TenantRecord> = self.tenants.read().values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn remove(&self, key: TenantKey) -> CatalogResult<()> {
        self.tenants.write().remove(&key.value());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_add_and_lookup() {
        let directory = InMemoryDirectory::new();
        let record = TenantRecord::new("Test Tenant 1", ServicePlan::standard());
        let key = record.key();
        directory.add(record.clone()).await.unwrap();

        assert_eq!(directory.get_by_key(key).await.unwrap(), Some(record.clone()));
        // Name lookup normalizes its argument.
        assert_eq!(
            directory.get_by_name("TEST tenant 1").await.unwrap(),
            Some(record)
        );
        assert_eq!(directory.get_by_name("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_sorted_by_name() {
        let directory = InMemoryDirectory::new();
        directory
            .add(TenantRecord::new("Zebra Hall", ServicePlan::free()))
            .await
            .unwrap();
        directory
            .add(TenantRecord::new("Aquarium Stage", ServicePlan::premium()))
            .await
            .unwrap();

        let names: Vec<String> = directory
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["aquariumstage", "zebrahall"]);
    }

    #[tokio::test]
    async fn test_remove() {
        let directory = InMemoryDirectory::new();
        let record = TenantRecord::new("venue", ServicePlan::standard());
        let key = record.key();
        directory.add(record).await.unwrap();

        directory.remove(key).await.unwrap();
        assert_eq!(directory.get_by_key(key).await.unwrap(), None);
        directory.remove(key).await.unwrap();
    }
}
