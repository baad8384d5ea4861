//! Tenant-to-shard routing and identity core for the Marquee ticketing
//! platform.
//!
//! Every venue (tenant) owns an isolated logical database, physically
//! co-located on one of several shard servers. This crate answers the two
//! questions application code is allowed to ask:
//!
//! - "register tenant X with display name Y": [`Catalog::onboard_tenant`]
//! - "get a routed connection for tenant X":
//!   [`Catalog::connection_for_tenant`]
//!
//! A tenant's identity is a deterministic, fixed-width key derived from its
//! name ([`TenantIdentity`]); the shard registry maps that key to the
//! physical database holding the tenant's rows; the connection broker opens
//! a connection to that shard with the tenant key bound into its session so
//! the shard's row-level-security policy scopes every query.
//!
//! Storage backends plug in through the capability traits here:
//! [`ShardRegistry`], [`TenantDirectory`], [`ShardProvisioner`], and
//! [`ShardConnector`]. The `marquee-registry` crate provides the durable
//! SQLite-backed registry and directory, `marquee-mssql` the SQL Server
//! connector and provisioner, and the in-memory implementations in this
//! crate serve tests and single-process embedding.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod broker;
pub mod catalog;
pub mod config;
pub mod directory;
pub mod error;
pub mod keys;
pub mod provision;
pub mod registry;
pub mod shard;

pub use broker::{
    ConnectionBroker, InMemoryConnector, RoutedConnection, ShardConnector, TENANT_SESSION_KEY,
    TenantConnection,
};
pub use catalog::Catalog;
pub use config::{CatalogConfig, CatalogConfigBuilder, ShardUserConfig};
pub use directory::{InMemoryDirectory, TenantDirectory, TenantRecord};
pub use error::{CatalogError, CatalogResult};
pub use keys::{
    NORMALIZED_KEY_LEN, TenantIdentity, TenantKey, normalize_key, normalize_name, project_key,
};
pub use provision::{InMemoryProvisioner, ShardProvisioner};
pub use registry::{InMemoryRegistry, Registered, ShardRegistry};
pub use shard::{OrphanShard, ServicePlan, ShardLocation, ShardMapping, ShardProtocol};
