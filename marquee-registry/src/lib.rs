//! Durable catalog store for Marquee: the SQLite-backed shard registry and
//! tenant directory.
//!
//! [`SqliteCatalogStore`] implements both `ShardRegistry` and
//! `TenantDirectory` from `marquee-catalog` over one database file, so the
//! shard map and the tenant list share a single durable source of truth that
//! outlives any single process.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod error;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::SqliteCatalogStore;
