//! Data structures used throughout the discovery daemon.
//!
//! Container metadata coming from the runtime is converted into the
//! owned [`Container`] type at the boundary, so the resolution logic
//! never depends on the wire models of a particular runtime client.
//! [`ContainerRecord`] is what the registry keeps for each published
//! container, and [`Update`] is what flows to the external store.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Metadata of a single container, as returned by an inspect call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    /// Runtime assigned container ID.
    pub id: String,
    /// Container name as reported by the runtime, usually with a leading `/`.
    pub name: String,
    pub hostname: String,
    pub labels: HashMap<String, String>,
    /// Configured network mode, e.g. `bridge`, `my-net` or `container:<id>`.
    pub network_mode: String,
    /// Address of the primary interface (legacy single network setups).
    pub ip_address: String,
    /// Attached networks keyed by network name.
    pub networks: HashMap<String, Network>,
}

impl Container {
    /// The container name without the leading slashes.
    pub fn normalized_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }

    /// Abbreviated ID for log lines.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// Per-network settings of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Network {
    pub ip_address: String,
    pub aliases: Vec<String>,
}

/// Abbreviates a container ID to its first 12 characters.
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// A lifecycle event emitted by the container runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEvent {
    /// Object type the event refers to (`container`, `network`, ...).
    pub kind: String,
    /// What happened (`start`, `die`, `connect`, ...).
    pub action: String,
    /// ID of the object the event refers to.
    pub actor_id: String,
    pub attributes: HashMap<String, String>,
}

/// A discovered container that answers for at least one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    /// Normalized container name, used as the external store key.
    pub name: String,
    pub address: Ipv4Addr,
    /// Domains without the trailing dot. Never empty.
    pub domains: Vec<String>,
}

/// A change in the container mapping, mirrored into the external store.
///
/// Each message either publishes a newly discovered container or
/// withdraws one that went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// A container has been discovered. `name` is the normalized
    /// container name and `ip` its resolved address.
    Add { name: String, ip: Ipv4Addr },
    /// A container has stopped or lost its address or domains.
    Remove { name: String },
}
