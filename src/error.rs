//! Error types for the discovery daemon.
//!
//! Everything except [`DiscoveryError`] is scoped to a single container
//! or a single store operation: it gets logged and the daemon moves on.

use std::time::Duration;

use thiserror::Error;

/// Address or domain derivation failed for a container.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The container is not attached to the network it is expected on.
    /// Happens transiently while a network is being disconnected.
    #[error("unable to find network settings for the network {0}")]
    NetworkNotFound(String),

    /// The `container:<id>` chain did not reach a terminal network mode.
    #[error("network namespace chain of container {id} exceeds {max} hops")]
    ChainTooDeep { id: String, max: usize },

    /// A `container:<id>` reference points to a container that cannot be inspected.
    #[error("container {id} shares the network of {target}, which could not be inspected: {source}")]
    DanglingReference {
        id: String,
        target: String,
        #[source]
        source: InspectionError,
    },

    /// The runtime reported an address that is not an IPv4 literal.
    #[error("invalid IPv4 address {address:?} for container {id}")]
    InvalidAddress { id: String, address: String },

    /// A domain strategy could not derive names for the container.
    #[error("{strategy} resolver failed for container {id}: {reason}")]
    Domain {
        strategy: &'static str,
        id: String,
        reason: String,
    },
}

/// The runtime client failed to fetch container metadata.
#[derive(Debug, Error)]
pub enum InspectionError {
    #[error("failed to inspect container {id}: {reason}")]
    Inspect { id: String, reason: String },

    #[error("failed to list containers: {0}")]
    List(String),
}

/// A write to the external record store failed.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to put {key}: {reason}")]
    Put { key: String, reason: String },

    #[error("failed to delete {key}: {reason}")]
    Delete { key: String, reason: String },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("record store did not answer within {0:?}")]
    Timeout(Duration),
}

/// Fatal errors of the discovery subsystem.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The runtime event stream ended; no further updates can be observed.
    #[error("container runtime event stream closed")]
    EventStreamClosed,

    #[error(transparent)]
    Inspection(#[from] InspectionError),
}
