//! The connection broker: data-dependent routing with a tenant-scoped
//! session.
//!
//! Opening a routed connection is atomic from the caller's side: resolve the
//! key, open a transport connection to the owning shard, and bind the tenant
//! key into the connection's session state before handing it back. Every
//! query on the returned connection is then implicitly filtered to the bound
//! tenant's rows by the shard's row-level-security policy.
//!
//! Routed connections are never pooled across tenants. Returning one to a
//! shared pool without clearing the session binding would leak one tenant's
//! data scope into another tenant's queries, so a connection lives exactly as
//! long as the logical request that opened it and the caller releases it on
//! every exit path.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
use crate::keys::TenantKey;
use crate::registry::ShardRegistry;
use crate::shard::ShardLocation;

/// Session-context key the tenant key is bound under on every routed
/// connection. The shard schema's security predicate reads the same key.
pub const TENANT_SESSION_KEY: &str = "TenantId";

/// A live, tenant-scoped shard connection.
///
/// Owned exclusively by the caller that opened it; dropped or closed on every
/// exit path. The session tenant binding holds for the connection's lifetime.
#[async_trait]
pub trait TenantConnection: Send + std::fmt::Debug {
    /// The tenant key bound into this connection's session.
    fn tenant_key(&self) -> TenantKey;

    /// The shard this connection is routed to.
    fn location(&self) -> &ShardLocation;

    /// Execute a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str) -> CatalogResult<u64>;

    /// Execute a query, returning rows as JSON objects keyed by column name.
    async fn query(&mut self, sql: &str) -> CatalogResult<Vec<serde_json::Value>>;

    /// Read the tenant key back out of the shard session state, for
    /// verification.
    async fn session_tenant(&mut self) -> CatalogResult<Option<i32>>;

    /// Release the connection.
    async fn close(self: Box<Self>) -> CatalogResult<()>;
}

/// A boxed tenant-scoped connection, as handed out by the broker.
pub type RoutedConnection = Box<dyn TenantConnection>;

/// Opens transport connections to shard servers.
///
/// Implementations must bind the tenant session context before returning: a
/// connection that fails binding is closed, never handed out, and the error
/// surfaces as [`CatalogError::ConnectionFailed`].
#[async_trait]
pub trait ShardConnector: Send + Sync {
    /// Open a connection to `location` scoped to `key`.
    async fn connect(
        &self,
        location: &ShardLocation,
        key: TenantKey,
    ) -> CatalogResult<RoutedConnection>;
}

/// Resolves tenant keys through the registry and opens scoped connections.
#[derive(Clone)]
pub struct ConnectionBroker {
    registry: Arc<dyn ShardRegistry>,
    connector: Arc<dyn ShardConnector>,
}

impl ConnectionBroker {
    /// Create a broker over a registry and a connector.
    pub fn new(registry: Arc<dyn ShardRegistry>, connector: Arc<dyn ShardConnector>) -> Self {
        Self {
            registry,
            connector,
        }
    }

    /// Open a routed connection for a tenant key.
    ///
    /// Fails with [`CatalogError::UnknownTenant`] when no mapping exists and
    /// [`CatalogError::ConnectionFailed`] on transport or binding errors.
    pub async fn open(&self, key: TenantKey) -> CatalogResult<RoutedConnection> {
        let location = self.registry.resolve(key).await?;
        debug!(%key, %location, "Opening routed connection");
        self.connector.connect(&location, key).await
    }
}

impl std::fmt::Debug for ConnectionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionBroker").finish()
    }
}

/// In-memory connector double.
///
/// Simulates transport and session binding, tracks how many connections are
/// currently open, and can be scripted to fail binding or mark a database
/// unreachable. Tests use `open_connections` to prove nothing leaks on
/// failure paths.
#[derive(Debug, Default)]
pub struct InMemoryConnector {
    unreachable: Mutex<HashSet<String>>,
    bind_failures: AtomicUsize,
    open: Arc<AtomicUsize>,
}

impl InMemoryConnector {
    /// Create a connector where every location is reachable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a database as unreachable at the transport level.
    pub fn set_unreachable(&self, database: &str) {
        self.unreachable.lock().insert(database.to_string());
    }

    /// Fail session binding on the next `n` connects.
    pub fn fail_next_bind(&self, n: usize) {
        self.bind_failures.store(n, Ordering::SeqCst);
    }

    /// Number of connections currently open (not yet closed or dropped).
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShardConnector for InMemoryConnector {
    async fn connect(
        &self,
        location: &ShardLocation,
        key: TenantKey,
    ) -> CatalogResult<RoutedConnection> {
        if self.unreachable.lock().contains(&location.database) {
            return Err(CatalogError::connection(format!(
                "cannot reach {location}"
            )));
        }

        // Transport is open from here on; binding failure must release it.
        self.open.fetch_add(1, Ordering::SeqCst);
        if self
            .bind_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.open.fetch_sub(1, Ordering::SeqCst);
            return Err(CatalogError::connection(format!(
                "session binding failed for {location}"
            )));
        }

        Ok(Box::new(InMemoryConnection {
            key,
            location: location.clone(),
            session: Some(key.value()),
            statements: Vec::new(),
            open: Arc::clone(&self.open),
            released: false,
        }))
    }
}

/// Connection handed out by [`InMemoryConnector`].
#[derive(Debug)]
pub struct InMemoryConnection {
    key: TenantKey,
    location: ShardLocation,
    session: Option<i32>,
    statements: Vec<String>,
    open: Arc<AtomicUsize>,
    released: bool,
}

impl InMemoryConnection {
    /// Statements executed on this connection, in order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

#[async_trait]
impl TenantConnection for InMemoryConnection {
    fn tenant_key(&self) -> TenantKey {
        self.key
    }

    fn location(&self) -> &ShardLocation {
        &self.location
    }

    async fn execute(&mut self, sql: &str) -> CatalogResult<u64> {
        self.statements.push(sql.to_string());
        Ok(0)
    }

    async fn query(&mut self, sql: &str) -> CatalogResult<Vec<serde_json::Value>> {
        self.statements.push(sql.to_string());
        Ok(Vec::new())
    }

    async fn session_tenant(&mut self) -> CatalogResult<Option<i32>> {
        Ok(self.session)
    }

    async fn close(mut self: Box<Self>) -> CatalogResult<()> {
        self.release();
        Ok(())
    }
}

impl InMemoryConnection {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for InMemoryConnection {
    // Dropping without close still releases; the scoped-ownership discipline
    // means no connection survives the operation that opened it.
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::keys::TenantIdentity;
    use crate::registry::{InMemoryRegistry, ShardRegistry};
    use crate::shard::{ServicePlan, ShardMapping};

    async fn broker_with_tenant(name: &str) -> (ConnectionBroker, Arc<InMemoryConnector>, TenantKey)
    {
        let registry = Arc::new(InMemoryRegistry::new());
        let identity = TenantIdentity::derive(name);
        registry
            .register(ShardMapping::new(
                identity,
                ShardLocation::new("localhost", crate::keys::normalize_name(name), 1433),
                ServicePlan::standard(),
            ))
            .await
            .unwrap();
        let connector = Arc::new(InMemoryConnector::new());
        let connector_dyn: Arc<dyn ShardConnector> = connector.clone();
        let broker = ConnectionBroker::new(registry, connector_dyn);
        (broker, connector, identity.key())
    }

    #[tokio::test]
    async fn test_open_binds_session_to_tenant_key() {
        let (broker, connector, key) = broker_with_tenant("Test Tenant 1").await;

        let mut conn = broker.open(key).await.unwrap();
        assert_eq!(conn.tenant_key(), key);
        assert_eq!(conn.session_tenant().await.unwrap(), Some(key.value()));
        assert_eq!(connector.open_connections(), 1);

        conn.close().await.unwrap();
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tenant_opens_nothing() {
        let (broker, connector, _) = broker_with_tenant("Test Tenant 1").await;

        let err = broker.open(TenantKey::new(-1)).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_binding_failure_closes_connection() {
        let (broker, connector, key) = broker_with_tenant("Test Tenant 1").await;
        connector.fail_next_bind(1);

        let err = broker.open(key).await.unwrap_err();
        assert!(matches!(err, CatalogError::ConnectionFailed(_)));
        assert_eq!(connector.open_connections(), 0);

        // Transient failure, not a missing tenant: the next open succeeds.
        let conn = broker.open(key).await.unwrap();
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_failure_is_connection_failed() {
        let (broker, connector, key) = broker_with_tenant("Test Tenant 1").await;
        connector.set_unreachable("testtenant1");

        let err = broker.open(key).await.unwrap_err();
        assert!(matches!(err, CatalogError::ConnectionFailed(_)));
        assert!(err.is_retriable());
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_dropping_connection_releases_it() {
        let (broker, connector, key) = broker_with_tenant("Test Tenant 1").await;
        {
            let _conn = broker.open(key).await.unwrap();
            assert_eq!(connector.open_connections(), 1);
        }
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_opens_for_distinct_tenants() {
        let registry = Arc::new(InMemoryRegistry::new());
        let connector = Arc::new(InMemoryConnector::new());
        let registry_dyn: Arc<dyn ShardRegistry> = registry.clone();
        let connector_dyn: Arc<dyn ShardConnector> = connector.clone();
        let broker = ConnectionBroker::new(registry_dyn, connector_dyn);

        let mut keys = Vec::new();
        for i in 0..8 {
            let identity = TenantIdentity::derive(&format!("venue {i}"));
            registry
                .register(ShardMapping::new(
                    identity,
                    ShardLocation::new("localhost", format!("venue{i}"), 1433),
                    ServicePlan::standard(),
                ))
                .await
                .unwrap();
            keys.push(identity.key());
        }

        let mut handles = Vec::new();
        for key in keys {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                let mut conn = broker.open(key).await.unwrap();
                let bound = conn.session_tenant().await.unwrap();
                conn.close().await.unwrap();
                (key, bound)
            }));
        }
        for handle in handles {
            let (key, bound) = handle.await.unwrap();
            // Each concurrent request saw its own tenant scope.
            assert_eq!(bound, Some(key.value()));
        }
        assert_eq!(connector.open_connections(), 0);
    }
}
