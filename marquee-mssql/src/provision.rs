//! SQL Server shard provisioner: creates and initializes tenant databases.

use async_trait::async_trait;
use tiberius::Client;
use tokio::net::TcpStream;
use tokio_util::compat::Compat;
use tracing::{debug, info, warn};

use marquee_catalog::{
    CatalogError, CatalogResult, ServicePlan, ShardLocation, ShardProvisioner, ShardUserConfig,
    normalize_name,
};

use crate::config::MssqlShardConfig;
use crate::connector::connect_client;
use crate::error::{MssqlError, MssqlResult};
use crate::rls::TenantRlsPolicy;

/// Ticketing schema applied to every new shard. Every tenant-owned table
/// carries a `venue_id` column for the security predicate; `venue_types` and
/// `countries` are shared reference data and stay unfiltered.
const TENANT_SCHEMA: &[&str] = &[
    "CREATE TABLE dbo.venue_types (
        venue_type NVARCHAR(30) NOT NULL PRIMARY KEY,
        venue_type_name NVARCHAR(30) NOT NULL,
        event_type_name NVARCHAR(30) NOT NULL,
        event_type_short_name NVARCHAR(20) NOT NULL,
        event_type_short_name_plural NVARCHAR(20) NOT NULL,
        language NVARCHAR(10) NOT NULL
    )",
    "CREATE TABLE dbo.countries (
        country_code CHAR(3) NOT NULL PRIMARY KEY,
        country_name NVARCHAR(50) NOT NULL,
        language NVARCHAR(10) NOT NULL
    )",
    "CREATE TABLE dbo.venues (
        venue_id INT NOT NULL PRIMARY KEY,
        venue_name NVARCHAR(128) NOT NULL,
        venue_type NVARCHAR(30) NOT NULL REFERENCES dbo.venue_types (venue_type),
        admin_email NVARCHAR(128) NOT NULL,
        postal_code NVARCHAR(20) NULL,
        country_code CHAR(3) NOT NULL REFERENCES dbo.countries (country_code)
    )",
    "CREATE TABLE dbo.customers (
        customer_id INT IDENTITY(1,1) NOT NULL,
        venue_id INT NOT NULL,
        first_name NVARCHAR(50) NOT NULL,
        last_name NVARCHAR(50) NOT NULL,
        email NVARCHAR(128) NOT NULL,
        postal_code NVARCHAR(20) NULL,
        country_code CHAR(3) NOT NULL REFERENCES dbo.countries (country_code),
        PRIMARY KEY (venue_id, customer_id)
    )",
    "CREATE TABLE dbo.sections (
        section_id INT NOT NULL,
        venue_id INT NOT NULL,
        section_name NVARCHAR(30) NOT NULL,
        seat_rows INT NOT NULL,
        seats_per_row INT NOT NULL,
        standard_price MONEY NOT NULL,
        PRIMARY KEY (venue_id, section_id)
    )",
    "CREATE TABLE dbo.events (
        event_id INT NOT NULL,
        venue_id INT NOT NULL,
        event_name NVARCHAR(50) NOT NULL,
        subtitle NVARCHAR(50) NULL,
        date DATETIME2 NOT NULL,
        PRIMARY KEY (venue_id, event_id)
    )",
    "CREATE TABLE dbo.event_sections (
        venue_id INT NOT NULL,
        event_id INT NOT NULL,
        section_id INT NOT NULL,
        price MONEY NOT NULL,
        PRIMARY KEY (venue_id, event_id, section_id),
        FOREIGN KEY (venue_id, event_id) REFERENCES dbo.events (venue_id, event_id),
        FOREIGN KEY (venue_id, section_id) REFERENCES dbo.sections (venue_id, section_id)
    )",
    "CREATE TABLE dbo.tickets (
        ticket_id INT IDENTITY(1,1) NOT NULL,
        venue_id INT NOT NULL,
        event_id INT NOT NULL,
        section_id INT NOT NULL,
        customer_id INT NOT NULL,
        row_number INT NOT NULL,
        seat_number INT NOT NULL,
        purchase_date DATETIME2 NOT NULL DEFAULT GETUTCDATE(),
        PRIMARY KEY (venue_id, ticket_id),
        FOREIGN KEY (venue_id, event_id, section_id)
            REFERENCES dbo.event_sections (venue_id, event_id, section_id),
        FOREIGN KEY (venue_id, customer_id)
            REFERENCES dbo.customers (venue_id, customer_id)
    )",
];

/// Reference rows every shard starts with.
const REFERENCE_DATA: &[&str] = &[
    "INSERT INTO dbo.venue_types
        (venue_type, venue_type_name, event_type_name,
         event_type_short_name, event_type_short_name_plural, language)
     VALUES
        (N'multipurposevenue', N'Multi-Purpose Venue', N'Event', N'Event', N'Events', N'en-us'),
        (N'classicalmusicvenue', N'Classical Music Venue', N'Classical Concert', N'Concert', N'Concerts', N'en-us'),
        (N'jazzvenue', N'Jazz Venue', N'Jazz Session', N'Session', N'Sessions', N'en-us'),
        (N'judovenue', N'Judo Venue', N'Judo Tournament', N'Tournament', N'Tournaments', N'en-us'),
        (N'soccervenue', N'Soccer Venue', N'Soccer Match', N'Match', N'Matches', N'en-us'),
        (N'motorracingvenue', N'Motor Racing Venue', N'Car Race', N'Race', N'Races', N'en-us'),
        (N'dancestudio', N'Dance Studio', N'Performance', N'Performance', N'Performances', N'en-us'),
        (N'bluesvenue', N'Blues Venue', N'Blues Session', N'Session', N'Sessions', N'en-us'),
        (N'rockmusicvenue', N'Rock Music Venue', N'Rock Concert', N'Concert', N'Concerts', N'en-us'),
        (N'opera', N'Opera', N'Opera', N'Opera', N'Operas', N'en-us')",
    "INSERT INTO dbo.countries (country_code, country_name, language)
     VALUES
        (N'USA', N'United States', N'en-us'),
        (N'CAN', N'Canada', N'en-us'),
        (N'GBR', N'United Kingdom', N'en-gb'),
        (N'AUS', N'Australia', N'en-au'),
        (N'DEU', N'Germany', N'de-de'),
        (N'FRA', N'France', N'fr-fr')",
];

/// Provisions tenant shard databases on SQL Server.
///
/// `create_shard` is retry-safe: a database left behind by a crashed earlier
/// attempt is recovered if its schema finished initializing, and rejected if
/// it did not. The presence of `dbo.venues` marks a finished initialization
/// because schema setup runs before the location is ever returned.
#[derive(Debug, Clone)]
pub struct MssqlProvisioner {
    user: ShardUserConfig,
    rls: TenantRlsPolicy,
}

impl MssqlProvisioner {
    /// Create a provisioner with the given server credentials.
    pub fn new(user: ShardUserConfig) -> Self {
        Self {
            user,
            rls: TenantRlsPolicy::default(),
        }
    }

    async fn connect_master(
        &self,
        server: &str,
        port: u16,
    ) -> MssqlResult<Client<Compat<TcpStream>>> {
        let config = MssqlShardConfig::for_server_database(server, port, "master", &self.user)?;
        connect_client(&config).await
    }

    async fn database_exists(
        client: &mut Client<Compat<TcpStream>>,
        database: &str,
    ) -> MssqlResult<bool> {
        let row = client
            .query("SELECT name FROM sys.databases WHERE name = @P1", &[
                &database,
            ])
            .await?
            .into_row()
            .await?;
        Ok(row.is_some())
    }

    async fn schema_initialized(client: &mut Client<Compat<TcpStream>>) -> MssqlResult<bool> {
        let row = client
            .query("SELECT OBJECT_ID(N'dbo.venues')", &[])
            .await?
            .into_row()
            .await?;
        Ok(matches!(row, Some(row) if row.try_get::<i32, _>(0)?.is_some()))
    }

    async fn initialize_shard(&self, client: &mut Client<Compat<TcpStream>>) -> MssqlResult<()> {
        for statement in TENANT_SCHEMA {
            client.simple_query(*statement).await?.into_results().await?;
        }
        for statement in self.rls.statements() {
            client
                .simple_query(statement.as_str())
                .await?
                .into_results()
                .await?;
        }
        for statement in REFERENCE_DATA {
            client.simple_query(*statement).await?.into_results().await?;
        }
        Ok(())
    }

    async fn create_shard_inner(
        &self,
        database: &str,
        server: &str,
        port: u16,
    ) -> MssqlResult<ShardLocation> {
        let location = ShardLocation::new(server, database, port);
        let mut master = self.connect_master(server, port).await?;

        if Self::database_exists(&mut master, database).await? {
            // Left behind by an earlier attempt. Recover it only if its
            // initialization finished; a half-built shard needs an operator.
            master.close().await?;
            let config =
                MssqlShardConfig::for_server_database(server, port, database, &self.user)?;
            let mut shard = connect_client(&config).await?;
            let initialized = Self::schema_initialized(&mut shard).await?;
            shard.close().await?;
            if initialized {
                info!(%location, "Recovered existing shard database");
                return Ok(location);
            }
            return Err(MssqlError::HalfInitialized(database.to_string()));
        }

        // Identifiers cannot be parameterized; the name is normalized to
        // lowercase alphanumerics upstream but bracket-quote it anyway.
        let create = format!("CREATE DATABASE [{}]", database.replace(']', "]]"));
        master.simple_query(create.as_str()).await?.into_results().await?;
        master.close().await?;
        debug!(%location, "Created shard database");

        let config = MssqlShardConfig::for_server_database(server, port, database, &self.user)?;
        let mut shard = connect_client(&config).await?;
        let init = self.initialize_shard(&mut shard).await;
        shard.close().await?;
        init?;

        info!(%location, "Initialized shard schema and security policy");
        Ok(location)
    }
}

#[async_trait]
impl ShardProvisioner for MssqlProvisioner {
    async fn create_shard(
        &self,
        tenant_name: &str,
        server: &str,
        port: u16,
        service_plan: &ServicePlan,
    ) -> CatalogResult<ShardLocation> {
        let database = normalize_name(tenant_name);
        if database.is_empty() {
            return Err(CatalogError::invalid_name(tenant_name));
        }
        debug!(tenant = %database, %server, plan = %service_plan, "Provisioning shard");

        self.create_shard_inner(&database, server, port)
            .await
            .map_err(|err| match err {
                MssqlError::Config(_) | MssqlError::HalfInitialized(_) => err.into(),
                other => {
                    warn!(tenant = %database, %server, error = %other, "Shard provisioning failed");
                    CatalogError::provision(other.to_string())
                }
            })
    }

    async fn list_databases(&self, server: &str) -> CatalogResult<Vec<String>> {
        let mut master = self
            .connect_master(server, self.user.port)
            .await
            .map_err(CatalogError::from)?;
        let rows = master
            .query(
                "SELECT name FROM sys.databases WHERE database_id > 4 ORDER BY name",
                &[],
            )
            .await
            .map_err(MssqlError::from)?
            .into_first_result()
            .await
            .map_err(MssqlError::from)?;
        master.close().await.map_err(MssqlError::from)?;

        let mut names = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(name) = row.try_get::<&str, _>(0).map_err(MssqlError::from)? {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}
