//! Tenant-scoped SQL Server connection.

use async_trait::async_trait;
use tiberius::Client;
use tokio::net::TcpStream;
use tokio_util::compat::Compat;
use tracing::debug;

use marquee_catalog::{
    CatalogResult, ShardLocation, TENANT_SESSION_KEY, TenantConnection, TenantKey,
};

use crate::error::MssqlError;
use crate::row::row_to_json;

/// A live SQL Server connection routed to one tenant's shard.
///
/// The tenant key is bound read-only into `SESSION_CONTEXT` before the
/// connection is handed out, so the shard's security policy scopes every
/// statement to the bound tenant. The connection is owned by one logical
/// request and closed when that request finishes.
pub struct MssqlRoutedConnection {
    pub(crate) client: Client<Compat<TcpStream>>,
    pub(crate) key: TenantKey,
    pub(crate) location: ShardLocation,
}

#[async_trait]
impl TenantConnection for MssqlRoutedConnection {
    fn tenant_key(&self) -> TenantKey {
        self.key
    }

    fn location(&self) -> &ShardLocation {
        &self.location
    }

    async fn execute(&mut self, sql: &str) -> CatalogResult<u64> {
        debug!(key = %self.key, sql = %sql, "Executing statement");
        let result = self
            .client
            .execute(sql, &[])
            .await
            .map_err(MssqlError::from)?;
        Ok(result.total())
    }

    async fn query(&mut self, sql: &str) -> CatalogResult<Vec<serde_json::Value>> {
        debug!(key = %self.key, sql = %sql, "Executing query");
        let rows = self
            .client
            .query(sql, &[])
            .await
            .map_err(MssqlError::from)?
            .into_first_result()
            .await
            .map_err(MssqlError::from)?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn session_tenant(&mut self) -> CatalogResult<Option<i32>> {
        let sql = format!("SELECT CAST(SESSION_CONTEXT(N'{TENANT_SESSION_KEY}') AS INT)");
        let row = self
            .client
            .query(sql.as_str(), &[])
            .await
            .map_err(MssqlError::from)?
            .into_row()
            .await
            .map_err(MssqlError::from)?;
        match row {
            Some(row) => Ok(row.try_get::<i32, _>(0).map_err(MssqlError::from)?),
            None => Ok(None),
        }
    }

    async fn close(self: Box<Self>) -> CatalogResult<()> {
        debug!(key = %self.key, location = %self.location, "Closing routed connection");
        self.client.close().await.map_err(MssqlError::from)?;
        Ok(())
    }
}

impl std::fmt::Debug for MssqlRoutedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlRoutedConnection")
            .field("key", &self.key)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}
