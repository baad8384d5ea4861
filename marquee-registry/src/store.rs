//! SQLite-backed catalog store: shard registry plus tenant directory.
//!
//! One database file holds both the shard map and the tenant directory, so a
//! single durable store is the source of truth for routing. All access goes
//! through one `tokio_rusqlite::Connection`, which serializes writers by
//! construction while readers and writers from other handles remain safe
//! under WAL.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use marquee_catalog::{
    CatalogError, CatalogResult, NORMALIZED_KEY_LEN, Registered, ServicePlan, ShardLocation,
    ShardMapping, ShardProtocol, ShardRegistry, TenantDirectory, TenantIdentity, TenantKey,
    TenantRecord, normalize_name,
};

use crate::error::{StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS shard_mappings (
    normalized_key  BLOB PRIMARY KEY,
    tenant_key      INTEGER NOT NULL UNIQUE,
    server          TEXT NOT NULL,
    database_name   TEXT NOT NULL,
    protocol        TEXT NOT NULL,
    port            INTEGER NOT NULL,
    service_plan    TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tenants (
    tenant_key      INTEGER PRIMARY KEY,
    normalized_key  BLOB NOT NULL,
    name            TEXT NOT NULL,
    display_name    TEXT NOT NULL,
    service_plan    TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tenants_name ON tenants (name);
"#;

/// Durable catalog store over a SQLite database file.
///
/// Opened once at process start and closed at shutdown; handed to the
/// catalog facade as both the [`ShardRegistry`] and the [`TenantDirectory`].
pub struct SqliteCatalogStore {
    conn: Connection,
}

enum RegisterOutcome {
    New,
    Already,
    Conflict(ShardLocation),
}

impl SqliteCatalogStore {
    /// Open (and initialize if needed) a catalog store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).await?;
        let store = Self { conn };
        store.init().await?;
        info!(path = %path.display(), "Catalog store opened");
        Ok(store)
    }

    /// Open an in-memory store. For tests; nothing survives the handle.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    /// Close the store, flushing SQLite state.
    pub async fn close(self) -> StoreResult<()> {
        self.conn.close().await?;
        Ok(())
    }

    async fn init(&self) -> StoreResult<()> {
        self.conn
            .call(|conn| {
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "foreign_keys", "ON")?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn register_inner(&self, mapping: ShardMapping) -> StoreResult<RegisterOutcome> {
        let key = mapping.key().value();
        let normalized = mapping.identity.normalized().to_vec();
        let location = mapping.location.clone();
        let plan = mapping.service_plan.as_str().to_string();
        let created_at = Utc::now().to_rfc3339();

        let outcome = self
            .conn
            .call(move |conn| {
                // Existence check and insert in one transaction: concurrent
                // registrations for the same key serialize here and the
                // loser sees the winner's row.
                let tx = conn.transaction()?;
                let existing: Option<(String, String, String, u16)> = tx
                    .query_row(
                        "SELECT server, database_name, protocol, port
                         FROM shard_mappings WHERE tenant_key = ?1",
                        params![key],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )
                    .optional()?;

                let outcome = match existing {
                    Some((server, database, protocol, port)) => {
                        let stored = ShardLocation {
                            server,
                            database,
                            protocol: ShardProtocol::from_str(&protocol)
                                .unwrap_or(ShardProtocol::Tcp),
                            port,
                        };
                        if stored == location {
                            RegisterOutcome::Already
                        } else {
                            RegisterOutcome::Conflict(stored)
                        }
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO shard_mappings
                             (normalized_key, tenant_key, server, database_name,
                              protocol, port, service_plan, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                            params![
                                normalized,
                                key,
                                location.server,
                                location.database,
                                location.protocol.as_str(),
                                location.port,
                                plan,
                                created_at,
                            ],
                        )?;
                        RegisterOutcome::New
                    }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;
        Ok(outcome)
    }
}

fn mapping_from_row(
    normalized: Vec<u8>,
    server: String,
    database: String,
    protocol: String,
    port: u16,
    plan: String,
) -> StoreResult<ShardMapping> {
    let normalized: [u8; NORMALIZED_KEY_LEN] = normalized
        .try_into()
        .map_err(|_| StoreError::corrupt("normalized key has wrong width"))?;
    let protocol = ShardProtocol::from_str(&protocol)
        .ok_or_else(|| StoreError::corrupt(format!("unknown protocol {protocol:?}")))?;
    Ok(ShardMapping::new(
        TenantIdentity::from_normalized(normalized),
        ShardLocation {
            server,
            database,
            protocol,
            port,
        },
        ServicePlan::new(plan.as_str()),
    ))
}

fn record_from_row(
    normalized: Vec<u8>,
    name: String,
    display_name: String,
    plan: String,
    created_at: String,
) -> StoreResult<TenantRecord> {
    let normalized: [u8; NORMALIZED_KEY_LEN] = normalized
        .try_into()
        .map_err(|_| StoreError::corrupt("normalized key has wrong width"))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::corrupt(format!("bad created_at: {e}")))?
        .with_timezone(&Utc);
    Ok(TenantRecord {
        identity: TenantIdentity::from_normalized(normalized),
        name,
        display_name,
        service_plan: ServicePlan::new(plan.as_str()),
        created_at,
    })
}

#[async_trait]
impl ShardRegistry for SqliteCatalogStore {
    async fn register(&self, mapping: ShardMapping) -> CatalogResult<Registered> {
        let key = mapping.key();
        match self.register_inner(mapping).await? {
            RegisterOutcome::New => {
                debug!(%key, "Registered shard mapping");
                Ok(Registered::New)
            }
            RegisterOutcome::Already => Ok(Registered::AlreadyRegistered),
            RegisterOutcome::Conflict(existing) => {
                Err(CatalogError::DuplicateTenant { key, existing })
            }
        }
    }

    async fn resolve(&self, key: TenantKey) -> CatalogResult<ShardLocation> {
        let key_value = key.value();
        let row: Option<(String, String, String, u16)> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT server, database_name, protocol, port
                         FROM shard_mappings WHERE tenant_key = ?1",
                        params![key_value],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )
                    .optional()?)
            })
            .await
            .map_err(StoreError::from)?;

        match row {
            Some((server, database, protocol, port)) => Ok(ShardLocation {
                server,
                database,
                protocol: ShardProtocol::from_str(&protocol).ok_or_else(|| {
                    CatalogError::from(StoreError::corrupt(format!(
                        "unknown protocol {protocol:?}"
                    )))
                })?,
                port,
            }),
            None => Err(CatalogError::UnknownTenant(key)),
        }
    }

    async fn list(&self) -> CatalogResult<Vec<ShardMapping>> {
        let rows: Vec<(Vec<u8>, String, String, String, u16, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT normalized_key, server, database_name, protocol, port, service_plan
                     FROM shard_mappings ORDER BY normalized_key",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?;
                let collected: Result<Vec<_>, _> = rows.collect();
                Ok(collected?)
            })
            .await
            .map_err(StoreError::from)?;

        rows.into_iter()
            .map(|(normalized, server, database, protocol, port, plan)| {
                mapping_from_row(normalized, server, database, protocol, port, plan)
                    .map_err(CatalogError::from)
            })
            .collect()
    }

    async fn unregister(&self, key: TenantKey) -> CatalogResult<()> {
        let key_value = key.value();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM shard_mappings WHERE tenant_key = ?1",
                    params![key_value],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)?;
        debug!(%key, "Unregistered shard mapping");
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for SqliteCatalogStore {
    async fn add(&self, record: TenantRecord) -> CatalogResult<()> {
        let key = record.key().value();
        let normalized = record.identity.normalized().to_vec();
        let name = record.name.clone();
        let display_name = record.display_name.clone();
        let plan = record.service_plan.as_str().to_string();
        let created_at = record.created_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO tenants
                     (tenant_key, normalized_key, name, display_name, service_plan, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![key, normalized, name, display_name, plan, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| CatalogError::directory(e.to_string()))?;
        Ok(())
    }

    async fn get_by_key(&self, key: TenantKey) -> CatalogResult<Option<TenantRecord>> {
        let key_value = key.value();
        let row: Option<(Vec<u8>, String, String, String, String)> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT normalized_key, name, display_name, service_plan, created_at
                         FROM tenants WHERE tenant_key = ?1",
                        params![key_value],
                        |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                            ))
                        },
                    )
                    .optional()?)
            })
            .await
            .map_err(|e| CatalogError::directory(e.to_string()))?;

        row.map(|(normalized, name, display_name, plan, created_at)| {
            record_from_row(normalized, name, display_name, plan, created_at)
                .map_err(CatalogError::from)
        })
        .transpose()
    }

    async fn get_by_name(&self, name: &str) -> CatalogResult<Option<TenantRecord>> {
        let normalized_name = normalize_name(name);
        let row: Option<(Vec<u8>, String, String, String, String)> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT normalized_key, name, display_name, service_plan, created_at
                         FROM tenants WHERE name = ?1",
                        params![normalized_name],
                        |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                            ))
                        },
                    )
                    .optional()?)
            })
            .await
            .map_err(|e| CatalogError::directory(e.to_string()))?;

        row.map(|(normalized, name, display_name, plan, created_at)| {
            record_from_row(normalized, name, display_name, plan, created_at)
                .map_err(CatalogError::from)
        })
        .transpose()
    }

    async fn list(&self) -> CatalogResult<Vec<TenantRecord>> {
        let rows: Vec<(Vec<u8>, String, String, String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT normalized_key, name, display_name, service_plan, created_at
                     FROM tenants ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                })?;
                let collected: Result<Vec<_>, _> = rows.collect();
                Ok(collected?)
            })
            .await
            .map_err(|e| CatalogError::directory(e.to_string()))?;

        rows.into_iter()
            .map(|(normalized, name, display_name, plan, created_at)| {
                record_from_row(normalized, name, display_name, plan, created_at)
                    .map_err(CatalogError::from)
            })
            .collect()
    }

    async fn remove(&self, key: TenantKey) -> CatalogResult<()> {
        let key_value = key.value();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM tenants WHERE tenant_key = ?1", params![key_value])?;
                Ok(())
            })
            .await
            .map_err(|e| CatalogError::directory(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn mapping(name: &str, database: &str) -> ShardMapping {
        ShardMapping::new(
            TenantIdentity::derive(name),
            ShardLocation::new("localhost", database, 1433),
            ServicePlan::standard(),
        )
    }

    #[tokio::test]
    async fn test_read_after_write() {
        let store = SqliteCatalogStore::open_in_memory().await.unwrap();
        let m = mapping("Test Tenant 1", "testtenant1");
        let key = m.key();

        assert_eq!(store.register(m.clone()).await.unwrap(), Registered::New);
        assert_eq!(store.resolve(key).await.unwrap(), m.location);
    }

    #[tokio::test]
    async fn test_register_is_idempotent_and_conflicts_on_new_location() {
        let store = SqliteCatalogStore::open_in_memory().await.unwrap();
        let m = mapping("Test Tenant 1", "testtenant1");
        store.register(m.clone()).await.unwrap();

        assert_eq!(
            store.register(m).await.unwrap(),
            Registered::AlreadyRegistered
        );

        let err = store
            .register(mapping("Test Tenant 1", "elsewhere"))
            .await
            .unwrap_err();
        match err {
            CatalogError::DuplicateTenant { existing, .. } => {
                assert_eq!(existing.database, "testtenant1");
            }
            other => panic!("expected DuplicateTenant, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_miss_is_unknown_tenant() {
        let store = SqliteCatalogStore::open_in_memory().await.unwrap();
        let err = store.resolve(TenantKey::new(404)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_mappings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let m = mapping("Durable Venue", "durablevenue");
        let key = m.key();

        let store = SqliteCatalogStore::open(&path).await.unwrap();
        store.register(m.clone()).await.unwrap();
        store.close().await.unwrap();

        let store = SqliteCatalogStore::open(&path).await.unwrap();
        assert_eq!(store.resolve(key).await.unwrap(), m.location);
        let mappings = ShardRegistry::list(&store).await.unwrap();
        assert_eq!(mappings, vec![m]);
    }

    #[tokio::test]
    async fn test_unregister() {
        let store = SqliteCatalogStore::open_in_memory().await.unwrap();
        let m = mapping("venue", "venue");
        let key = m.key();
        store.register(m).await.unwrap();

        store.unregister(key).await.unwrap();
        assert!(store.resolve(key).await.unwrap_err().is_not_found());
        store.unregister(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_orders_by_normalized_key() {
        let store = SqliteCatalogStore::open_in_memory().await.unwrap();
        for name in ["gamma", "alpha", "beta"] {
            store.register(mapping(name, name)).await.unwrap();
        }
        let mappings = ShardRegistry::list(&store).await.unwrap();
        assert_eq!(mappings.len(), 3);
        let mut keys: Vec<Vec<u8>> = mappings
            .iter()
            .map(|m| m.identity.normalized().to_vec())
            .collect();
        let sorted = {
            let mut s = keys.clone();
            s.sort();
            s
        };
        assert_eq!(keys, sorted);
        keys.dedup();
        assert_eq!(keys.len(), 3);
    }

    #[tokio::test]
    async fn test_directory_round_trip() {
        let store = SqliteCatalogStore::open_in_memory().await.unwrap();
        let record = TenantRecord::new("Test Tenant 1", ServicePlan::premium());
        let key = record.key();
        store.add(record.clone()).await.unwrap();

        let by_key = store.get_by_key(key).await.unwrap().unwrap();
        assert_eq!(by_key.display_name, "Test Tenant 1");
        assert_eq!(by_key.service_plan, ServicePlan::premium());
        assert_eq!(by_key.identity, record.identity);

        let by_name = store.get_by_name("  test TENANT 1 ").await.unwrap();
        assert!(by_name.is_some());
        assert_eq!(store.get_by_name("missing").await.unwrap(), None);

        store.remove(key).await.unwrap();
        assert_eq!(store.get_by_key(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_directory_list_sorted_by_name() {
        let store = SqliteCatalogStore::open_in_memory().await.unwrap();
        store
            .add(TenantRecord::new("Zebra Hall", ServicePlan::standard()))
            .await
            .unwrap();
        store
            .add(TenantRecord::new("Aquarium Stage", ServicePlan::standard()))
            .await
            .unwrap();

        let names: Vec<String> = TenantDirectory::list(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["aquariumstage", "zebrahall"]);
    }

    #[tokio::test]
    async fn test_concurrent_registration_of_distinct_keys() {
        let store = std::sync::Arc::new(SqliteCatalogStore::open_in_memory().await.unwrap());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .register(mapping(&format!("venue {i}"), &format!("venue{i}")))
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Registered::New);
        }
        assert_eq!(ShardRegistry::list(store.as_ref()).await.unwrap().len(), 16);
    }
}
