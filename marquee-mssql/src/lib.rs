//! SQL Server shard driver for the Marquee catalog.
//!
//! Implements the `marquee-catalog` capability traits against SQL Server
//! over Tiberius: [`MssqlConnector`] opens routed connections with the
//! tenant key bound read-only into `SESSION_CONTEXT`, and
//! [`MssqlProvisioner`] creates shard databases with the ticketing schema
//! and a row-level security policy keyed on that session value.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod provision;
pub mod rls;
pub mod row;

pub use config::{EncryptionMode, MssqlShardConfig, MssqlShardConfigBuilder};
pub use connection::MssqlRoutedConnection;
pub use connector::MssqlConnector;
pub use error::{MssqlError, MssqlResult};
pub use provision::MssqlProvisioner;
pub use rls::TenantRlsPolicy;
pub use row::row_to_json;
