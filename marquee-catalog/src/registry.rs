//! The shard registry: the single source of truth for key-to-shard routing.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
use crate::keys::{NORMALIZED_KEY_LEN, TenantKey};
use crate::shard::{ShardLocation, ShardMapping};

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    /// A new mapping was created.
    New,
    /// The key was already mapped to the same location; nothing changed.
    AlreadyRegistered,
}

/// Persistent mapping from tenant key to physical shard.
///
/// Registration has compare-and-register semantics per key: re-registering
/// the identical location is an idempotent no-op, while a different location
/// fails with [`CatalogError::DuplicateTenant`]. Readers must never observe
/// two locations for one key, even momentarily. Distinct keys may register
/// concurrently without coordination.
///
/// `resolve` distinguishes a key that was never registered
/// ([`CatalogError::UnknownTenant`]) from a store that cannot be reached
/// ([`CatalogError::RegistryUnavailable`]); callers rely on that distinction
/// to avoid caching a transient outage as "tenant does not exist".
#[async_trait]
pub trait ShardRegistry: Send + Sync {
    /// Register a mapping, or observe that the identical mapping exists.
    async fn register(&self, mapping: ShardMapping) -> CatalogResult<Registered>;

    /// Resolve the shard holding a tenant's data.
    async fn resolve(&self, key: TenantKey) -> CatalogResult<ShardLocation>;

    /// All current mappings.
    async fn list(&self) -> CatalogResult<Vec<ShardMapping>>;

    /// Remove a tenant's mapping (deboarding). Removing an absent key is a
    /// no-op.
    async fn unregister(&self, key: TenantKey) -> CatalogResult<()>;
}

/// In-memory shard registry over an ordered index of normalized keys.
///
/// Mirrors the real store's shape: mappings are ordered by their normalized
/// byte key and point lookups are range scans on the four-byte key prefix.
/// Used as the test double and for single-process embedding; it does not
/// survive a restart.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    index: Arc<RwLock<BTreeMap<[u8; NORMALIZED_KEY_LEN], ShardMapping>>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered mappings.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Whether the registry has no mappings.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inclusive range of normalized keys sharing a tenant key's 4-byte prefix.
fn prefix_range(key: TenantKey) -> ([u8; NORMALIZED_KEY_LEN], [u8; NORMALIZED_KEY_LEN]) {
    let prefix = key.normalized_prefix();
    let mut low = [0u8; NORMALIZED_KEY_LEN];
    let mut high = [0xFFu8; NORMALIZED_KEY_LEN];
    low[..4].copy_from_slice(&prefix);
    high[..4].copy_from_slice(&prefix);
    (low, high)
}

#[async_trait]
impl ShardRegistry for InMemoryRegistry {
    async fn register(&self, mapping: ShardMapping) -> CatalogResult<Registered> {
        let key = mapping.key();
        let (low, high) = prefix_range(key);

        // Single write lock covers the existence check and the insert, so
        // two writers racing on the same key serialize and one of them sees
        // the other's mapping.
        let mut index = self.index.write();
        if let Some((_, existing)) = index.range(low..=high).next() {
            if existing.location == mapping.location {
                debug!(%key, location = %existing.location, "Mapping already registered");
                return Ok(Registered::AlreadyRegistered);
            }
            return Err(CatalogError::DuplicateTenant {
                key,
                existing: existing.location.clone(),
            });
        }

        debug!(%key, location = %mapping.location, "Registered shard mapping");
        index.insert(*mapping.identity.normalized(), mapping);
        Ok(Registered::New)
    }

    async fn resolve(&self, key: TenantKey) -> CatalogResult<ShardLocation> {
        let (low, high) = prefix_range(key);
        self.index
            .read()
            .range(low..=high)
            .next()
            .map(|(_, mapping)| mapping.location.clone())
            .ok_or(CatalogError::UnknownTenant(key))
    }

    async fn list(&self) -> CatalogResult<Vec<ShardMapping>> {
        Ok(self.index.read().values().cloned().collect())
    }

    async fn unregister(&self, key: TenantKey) -> CatalogResult<()> {
        let (low, high) = prefix_range(key);
        let mut index = self.index.write();
        let found: Option<[u8; NORMALIZED_KEY_LEN]> =
            index.range(low..=high).next().map(|(k, _)| *k);
        if let Some(normalized) = found {
            index.remove(&normalized);
            debug!(%key, "Unregistered shard mapping");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::keys::TenantIdentity;
    use crate::shard::ServicePlan;

    fn mapping(name: &str, database: &str) -> ShardMapping {
        ShardMapping::new(
            TenantIdentity::derive(name),
            ShardLocation::new("localhost", database, 1433),
            ServicePlan::standard(),
        )
    }

    #[tokio::test]
    async fn test_read_after_write() {
        let registry = InMemoryRegistry::new();
        let m = mapping("Test Tenant 1", "testtenant1");
        let key = m.key();

        assert_eq!(registry.register(m.clone()).await.unwrap(), Registered::New);
        assert_eq!(registry.resolve(key).await.unwrap(), m.location);
    }

    #[tokio::test]
    async fn test_register_is_idempotent_for_same_location() {
        let registry = InMemoryRegistry::new();
        let m = mapping("Test Tenant 1", "testtenant1");

        registry.register(m.clone()).await.unwrap();
        assert_eq!(
            registry.register(m).await.unwrap(),
            Registered::AlreadyRegistered
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_register_conflicts_on_different_location() {
        let registry = InMemoryRegistry::new();
        registry
            .register(mapping("Test Tenant 1", "testtenant1"))
            .await
            .unwrap();

        let err = registry
            .register(mapping("Test Tenant 1", "elsewhere"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateTenant { .. }));
        // The original answer is still the only answer.
        let key = TenantIdentity::derive("Test Tenant 1").key();
        assert_eq!(registry.resolve(key).await.unwrap().database, "testtenant1");
    }

    #[tokio::test]
    async fn test_resolve_miss_is_unknown_tenant() {
        let registry = InMemoryRegistry::new();
        let err = registry.resolve(TenantKey::new(12345)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unregister_then_resolve_misses() {
        let registry = InMemoryRegistry::new();
        let m = mapping("venue", "venue");
        let key = m.key();
        registry.register(m).await.unwrap();

        registry.unregister(key).await.unwrap();
        assert!(registry.resolve(key).await.unwrap_err().is_not_found());
        // Absent key unregister is a no-op.
        registry.unregister(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_returns_all_mappings() {
        let registry = InMemoryRegistry::new();
        registry.register(mapping("a venue", "avenue")).await.unwrap();
        registry.register(mapping("b venue", "bvenue")).await.unwrap();

        let mappings = registry.list().await.unwrap();
        assert_eq!(mappings.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_registration_of_distinct_keys() {
        let registry = Arc::new(InMemoryRegistry::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let name = format!("venue {i}");
                let db = format!("venue{i}");
                registry.register(mapping(&name, &db)).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Registered::New);
        }
        assert_eq!(registry.len(), 32);
    }

    #[tokio::test]
    async fn test_concurrent_registration_of_same_key_yields_one_mapping() {
        let registry = Arc::new(InMemoryRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.register(mapping("contested", "contested")).await
            }));
        }
        let mut new = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == Registered::New {
                new += 1;
            }
        }
        assert_eq!(new, 1);
        assert_eq!(registry.len(), 1);
    }
}
