//! End-to-end onboarding and routing scenarios against the in-memory
//! backends.

use std::sync::Arc;
use std::time::Duration;

use marquee_catalog::{
    Catalog, CatalogConfig, CatalogError, InMemoryConnector, InMemoryDirectory,
    InMemoryProvisioner, InMemoryRegistry, ServicePlan, ShardConnector, ShardProvisioner,
    ShardRegistry, TenantIdentity, project_key,
};

fn catalog() -> (Catalog, Arc<InMemoryConnector>) {
    let connector = Arc::new(InMemoryConnector::new());
    let catalog = Catalog::new(
        CatalogConfig::builder()
            .retry_backoff(Duration::from_millis(1))
            .build()
            .unwrap(),
        Arc::new(InMemoryRegistry::new()) as Arc<dyn ShardRegistry>,
        Arc::new(InMemoryDirectory::new()),
        Arc::new(InMemoryProvisioner::new()) as Arc<dyn ShardProvisioner>,
        Arc::clone(&connector) as Arc<dyn ShardConnector>,
    );
    (catalog, connector)
}

#[tokio::test]
async fn onboard_standard_tenant_and_route_a_connection() {
    let (catalog, connector) = catalog();

    let identity = catalog
        .onboard_tenant("Test Tenant 1", "localhost", 1433, ServicePlan::standard())
        .await
        .expect("onboarding succeeds");

    // The integer projection is stable and reproducible from the stored
    // normalized key.
    let key = identity.key();
    assert_eq!(project_key(identity.normalized()), key.value());
    assert_eq!(TenantIdentity::derive("Test Tenant 1").key(), key);

    // A routed connection carries the tenant key in its session state.
    let mut conn = catalog
        .connection_for_tenant("Test Tenant 1")
        .await
        .expect("routed connection opens");
    assert_eq!(conn.tenant_key(), key);
    assert_eq!(conn.session_tenant().await.unwrap(), Some(key.value()));

    conn.close().await.unwrap();
    assert_eq!(connector.open_connections(), 0);
}

#[tokio::test]
async fn unknown_tenant_yields_no_connection() {
    let (catalog, connector) = catalog();

    let err = catalog
        .connection_for_tenant("nonexistent")
        .await
        .expect_err("no mapping exists");
    assert!(matches!(err, CatalogError::UnknownTenant(_)));
    // No partial connection is left open.
    assert_eq!(connector.open_connections(), 0);
}

#[tokio::test]
async fn lookup_by_key_matches_lookup_by_name() {
    let (catalog, _connector) = catalog();

    let identity = catalog
        .onboard_tenant("Contoso Concert Hall", "localhost", 1433, ServicePlan::premium())
        .await
        .unwrap();

    let by_key = catalog.connection_for_key(identity.key()).await.unwrap();
    let by_name = catalog
        .connection_for_tenant("contoso concert hall")
        .await
        .unwrap();
    assert_eq!(by_key.location(), by_name.location());

    by_key.close().await.unwrap();
    by_name.close().await.unwrap();
}
