//! Shard map data model: locations, service plans, and mappings.

use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::keys::{TenantIdentity, TenantKey};

/// Transport protocol used to reach a shard server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShardProtocol {
    /// TCP/IP (the default for networked shard servers).
    #[default]
    Tcp,
    /// Named pipes.
    NamedPipes,
    /// Shared memory (local server only).
    SharedMemory,
}

impl ShardProtocol {
    /// Stable string form, used by the registry store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::NamedPipes => "np",
            Self::SharedMemory => "sm",
        }
    }

    /// Parse a protocol from its stored string form.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Some(Self::Tcp),
            "np" | "namedpipes" => Some(Self::NamedPipes),
            "sm" | "sharedmemory" => Some(Self::SharedMemory),
            _ => None,
        }
    }
}

impl fmt::Display for ShardProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The service plan a tenant is subscribed to.
///
/// Plans are open-ended strings in the catalog; the well-known plans get
/// constructors but nothing in the routing core interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServicePlan(SmolStr);

impl ServicePlan {
    /// Create a service plan from its name.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self(name.into())
    }

    /// The free plan.
    pub fn free() -> Self {
        Self(SmolStr::new_static("free"))
    }

    /// The standard plan.
    pub fn standard() -> Self {
        Self(SmolStr::new_static("standard"))
    }

    /// The premium plan.
    pub fn premium() -> Self {
        Self(SmolStr::new_static("premium"))
    }

    /// The plan name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ServicePlan {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Display for ServicePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServicePlan {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifies one physical shard database.
///
/// Many tenants may be co-located on one `ShardLocation`, but a given tenant
/// key maps to exactly one location at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardLocation {
    /// Shard server host name.
    pub server: String,
    /// Database name on that server.
    pub database: String,
    /// Transport protocol.
    pub protocol: ShardProtocol,
    /// Server port.
    pub port: u16,
}

impl ShardLocation {
    /// Create a TCP location.
    pub fn new(server: impl Into<String>, database: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
            protocol: ShardProtocol::Tcp,
            port,
        }
    }

    /// Set the transport protocol.
    pub fn with_protocol(mut self, protocol: ShardProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// The `host:port` address of the owning server.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

impl fmt::Display for ShardLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            self.protocol, self.server, self.port, self.database
        )
    }
}

/// One entry in the shard registry: a tenant, the shard holding its rows, and
/// its service plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMapping {
    /// The tenant's durable identity.
    pub identity: TenantIdentity,
    /// The physical shard holding the tenant's data.
    pub location: ShardLocation,
    /// The tenant's service plan.
    pub service_plan: ServicePlan,
}

impl ShardMapping {
    /// Create a mapping.
    pub fn new(identity: TenantIdentity, location: ShardLocation, service_plan: ServicePlan) -> Self {
        Self {
            identity,
            location,
            service_plan,
        }
    }

    /// The tenant's integer shard key.
    pub fn key(&self) -> TenantKey {
        self.identity.key()
    }
}

/// A shard database that exists on a server but has no registry mapping.
///
/// Orphans come from onboarding attempts that provisioned a shard and then
/// failed to register it. They are reported for operator reconciliation and
/// never deleted automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanShard {
    /// Server the orphan lives on.
    pub server: String,
    /// The unregistered database name.
    pub database: String,
}

impl fmt::Display for OrphanShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.database)
    }
}
