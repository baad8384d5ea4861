//! Marquee: tenant-to-shard routing and identity for a multi-tenant
//! ticketing platform.
//!
//! Each venue (tenant) owns an isolated database on one of several shard
//! servers. This facade re-exports the workspace crates:
//!
//! - [`catalog`]: tenant identity, the shard registry and broker traits,
//!   and the [`Catalog`](catalog::Catalog) facade with in-memory doubles
//! - [`registry`]: the durable SQLite-backed registry and directory
//! - [`mssql`]: the SQL Server connector and shard provisioner
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use marquee::catalog::{
//!     Catalog, CatalogConfig, InMemoryConnector, InMemoryDirectory, InMemoryProvisioner,
//!     InMemoryRegistry, ServicePlan,
//! };
//!
//! # async fn demo() -> marquee::catalog::CatalogResult<()> {
//! let catalog = Catalog::new(
//!     CatalogConfig::default(),
//!     Arc::new(InMemoryRegistry::new()),
//!     Arc::new(InMemoryDirectory::new()),
//!     Arc::new(InMemoryProvisioner::new()),
//!     Arc::new(InMemoryConnector::new()),
//! );
//!
//! catalog
//!     .onboard_tenant("Contoso Concert Hall", "localhost", 1433, ServicePlan::standard())
//!     .await?;
//! let mut conn = catalog.connection_for_tenant("Contoso Concert Hall").await?;
//! let venues = conn.query("SELECT venue_name FROM dbo.venues").await?;
//! conn.close().await?;
//! # let _ = venues;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use marquee_catalog as catalog;
pub use marquee_mssql as mssql;
pub use marquee_registry as registry;

/// Commonly used types, for glob import.
pub mod prelude {
    pub use marquee_catalog::{
        Catalog, CatalogConfig, CatalogError, CatalogResult, ConnectionBroker, RoutedConnection,
        ServicePlan, ShardConnector, ShardLocation, ShardMapping, ShardProvisioner, ShardRegistry,
        ShardUserConfig, TenantConnection, TenantDirectory, TenantIdentity, TenantKey,
        TenantRecord,
    };
    pub use marquee_mssql::{MssqlConnector, MssqlProvisioner, MssqlShardConfig};
    pub use marquee_registry::SqliteCatalogStore;
}
