//! The catalog facade: tenant onboarding and routed connection access.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::broker::{ConnectionBroker, RoutedConnection, ShardConnector};
use crate::config::CatalogConfig;
use crate::directory::{TenantDirectory, TenantRecord};
use crate::error::{CatalogError, CatalogResult};
use crate::keys::{TenantIdentity, TenantKey, normalize_name};
use crate::provision::ShardProvisioner;
use crate::registry::{Registered, ShardRegistry};
use crate::shard::{OrphanShard, ServicePlan, ShardMapping};

/// Databases every shard server carries that are never tenant shards.
const SYSTEM_DATABASES: &[&str] = &["master", "tempdb", "model", "msdb"];

/// Orchestration entry point used by application code.
///
/// All collaborators are injected capabilities with their own lifecycles;
/// the facade holds handles, not globals. Application code only ever calls
/// [`Catalog::onboard_tenant`] and [`Catalog::connection_for_tenant`] (plus
/// the operator surface for orphan reconciliation and offboarding).
pub struct Catalog {
    config: CatalogConfig,
    registry: Arc<dyn ShardRegistry>,
    directory: Arc<dyn TenantDirectory>,
    provisioner: Arc<dyn ShardProvisioner>,
    broker: ConnectionBroker,
}

impl Catalog {
    /// Create a catalog over injected collaborators.
    pub fn new(
        config: CatalogConfig,
        registry: Arc<dyn ShardRegistry>,
        directory: Arc<dyn TenantDirectory>,
        provisioner: Arc<dyn ShardProvisioner>,
        connector: Arc<dyn ShardConnector>,
    ) -> Self {
        let broker = ConnectionBroker::new(Arc::clone(&registry), connector);
        Self {
            config,
            registry,
            directory,
            provisioner,
            broker,
        }
    }

    /// The catalog configuration.
    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Onboard a tenant: derive its identity, provision a shard, register
    /// the mapping, and record the tenant in the directory.
    ///
    /// Provisioning is retried with linear backoff up to the configured
    /// attempt count for retriable failures. If registration fails after
    /// provisioning succeeded, the shard is left behind as a detectable
    /// orphan and the error propagates; onboarding never reports success
    /// while the mapping is absent. Re-running a failed onboarding is safe:
    /// provisioning recovers the existing shard and registration is
    /// idempotent.
    pub async fn onboard_tenant(
        &self,
        tenant_name: &str,
        server: &str,
        port: u16,
        service_plan: ServicePlan,
    ) -> CatalogResult<TenantIdentity> {
        if normalize_name(tenant_name).is_empty() {
            return Err(CatalogError::invalid_name(tenant_name));
        }
        let identity = TenantIdentity::derive(tenant_name);
        let key = identity.key();

        let location = self
            .provision_with_retry(tenant_name, server, port, &service_plan)
            .await?;

        match self
            .registry
            .register(ShardMapping::new(
                identity,
                location.clone(),
                service_plan.clone(),
            ))
            .await
        {
            Ok(Registered::New) => {
                debug!(%key, %location, "Shard mapping registered");
            }
            Ok(Registered::AlreadyRegistered) => {
                debug!(%key, %location, "Shard mapping already present, recovering");
            }
            Err(err) => {
                warn!(
                    %key,
                    %location,
                    error = %err,
                    "Registration failed after provisioning; shard left as orphan"
                );
                return Err(err);
            }
        }

        self.directory
            .add(TenantRecord::new(tenant_name, service_plan))
            .await?;

        info!(%key, tenant = %normalize_name(tenant_name), "Tenant onboarded");
        Ok(identity)
    }

    /// Open a routed, tenant-scoped connection for a tenant name.
    pub async fn connection_for_tenant(&self, tenant_name: &str) -> CatalogResult<RoutedConnection> {
        let key = TenantIdentity::derive(tenant_name).key();
        self.connection_for_key(key).await
    }

    /// Open a routed, tenant-scoped connection for a tenant key.
    pub async fn connection_for_key(&self, key: TenantKey) -> CatalogResult<RoutedConnection> {
        self.broker.open(key).await
    }

    /// Remove a tenant's mapping and directory record.
    ///
    /// The shard database itself is left on the server for operator cleanup;
    /// after deboarding it shows up in [`Catalog::detect_orphan_shards`].
    pub async fn offboard_tenant(&self, tenant_name: &str) -> CatalogResult<()> {
        let key = TenantIdentity::derive(tenant_name).key();
        self.registry.unregister(key).await?;
        self.directory.remove(key).await?;
        info!(%key, tenant = %normalize_name(tenant_name), "Tenant offboarded");
        Ok(())
    }

    /// Databases on `server` that exist physically but have no registry
    /// mapping. Reported for operator reconciliation; never auto-deleted.
    pub async fn detect_orphan_shards(&self, server: &str) -> CatalogResult<Vec<OrphanShard>> {
        let physical = self.provisioner.list_databases(server).await?;
        let mappings = self.registry.list().await?;

        let registered: HashSet<&str> = mappings
            .iter()
            .filter(|m| m.location.server == server)
            .map(|m| m.location.database.as_str())
            .collect();

        let orphans: Vec<OrphanShard> = physical
            .into_iter()
            .filter(|db| {
                !registered.contains(db.as_str())
                    && !SYSTEM_DATABASES.contains(&db.as_str())
                    && *db != self.config.catalog_database
            })
            .map(|database| OrphanShard {
                server: server.to_string(),
                database,
            })
            .collect();

        if !orphans.is_empty() {
            warn!(%server, count = orphans.len(), "Orphan shards detected");
        }
        Ok(orphans)
    }

    /// All onboarded tenants, sorted by normalized name.
    pub async fn tenants(&self) -> CatalogResult<Vec<TenantRecord>> {
        self.directory.list().await
    }

    async fn provision_with_retry(
        &self,
        tenant_name: &str,
        server: &str,
        port: u16,
        service_plan: &ServicePlan,
    ) -> CatalogResult<crate::shard::ShardLocation> {
        let mut attempt: u32 = 1;
        loop {
            match self
                .provisioner
                .create_shard(tenant_name, server, port, service_plan)
                .await
            {
                Ok(location) => return Ok(location),
                Err(err) if err.is_retriable() && attempt < self.config.provision_retries => {
                    let backoff = self.config.retry_backoff * attempt;
                    warn!(
                        tenant = %normalize_name(tenant_name),
                        %attempt,
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "Shard provisioning failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("config", &self.config)
            .finish()
    }
}
