//! Shard connector: opens transport connections and binds the tenant
//! session.

use async_trait::async_trait;
use tiberius::Client;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

use marquee_catalog::{
    CatalogResult, RoutedConnection, ShardConnector, ShardLocation, ShardUserConfig,
    TENANT_SESSION_KEY, TenantKey,
};

use crate::config::MssqlShardConfig;
use crate::connection::MssqlRoutedConnection;
use crate::error::{MssqlError, MssqlResult};

/// Open a SQL Server connection for the given configuration.
///
/// Dials TCP with the configured timeout, disables Nagle, and runs the TDS
/// handshake over the compat adapter.
pub(crate) async fn connect_client(
    config: &MssqlShardConfig,
) -> MssqlResult<Client<Compat<TcpStream>>> {
    let addr = config.addr();
    let tiberius_config = config.to_tiberius_config()?;

    let tcp = timeout(config.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| MssqlError::ConnectTimeout(addr.clone()))??;
    tcp.set_nodelay(true)?;

    debug!(addr = %addr, database = %config.database, "Connected to SQL Server");
    Ok(Client::connect(tiberius_config, tcp.compat_write()).await?)
}

/// Connector that opens tenant-scoped connections to SQL Server shards.
///
/// Shared credentials and transport settings come from the injected user
/// config; host, port, and database come from the resolved shard location.
#[derive(Debug, Clone)]
pub struct MssqlConnector {
    user: ShardUserConfig,
}

impl MssqlConnector {
    /// Create a connector with the given shard credentials.
    pub fn new(user: ShardUserConfig) -> Self {
        Self { user }
    }

    async fn bind_session(
        client: &mut Client<Compat<TcpStream>>,
        key: TenantKey,
    ) -> MssqlResult<()> {
        // Read-only binding: nothing on this connection can rebind the
        // session to another tenant afterwards.
        let sql = format!(
            "EXEC sp_set_session_context @key = N'{TENANT_SESSION_KEY}', \
             @value = @P1, @read_only = 1"
        );
        client.execute(sql.as_str(), &[&key.value()]).await?;
        Ok(())
    }
}

#[async_trait]
impl ShardConnector for MssqlConnector {
    async fn connect(
        &self,
        location: &ShardLocation,
        key: TenantKey,
    ) -> CatalogResult<RoutedConnection> {
        let config = MssqlShardConfig::for_location(location, &self.user)?;
        let mut client = connect_client(&config).await?;

        // The transport is live but unscoped. A connection that cannot be
        // scoped to the tenant must never be handed out, so a binding
        // failure closes it before the error surfaces.
        if let Err(err) = Self::bind_session(&mut client, key).await {
            warn!(key = %key, location = %location, error = %err,
                "Session binding failed, closing connection");
            if let Err(close_err) = client.close().await {
                warn!(location = %location, error = %close_err,
                    "Failed to close unbound connection");
            }
            return Err(err.into());
        }

        debug!(key = %key, location = %location, "Routed connection ready");
        Ok(Box::new(MssqlRoutedConnection {
            client,
            key,
            location: location.clone(),
        }))
    }
}
