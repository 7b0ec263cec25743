//! Container address resolution.
//!
//! A container either owns its network namespace or shares the one of
//! another container (`--network container:<id>`). In the latter case the
//! address lives on the container that owns the namespace, so the
//! resolver follows the chain until it reaches a terminal network mode.

use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, info};

use crate::error::ResolutionError;
use crate::runtime::ContainerRuntime;
use crate::types::Container;

/// Label selecting which attached network provides the address.
pub const DEFAULT_NETWORK_LABEL: &str = "coredns.dockerdiscovery.network";

/// Upper bound on `container:<id>` indirections.
pub const MAX_NETWORK_HOPS: usize = 10;

const CONTAINER_MODE_PREFIX: &str = "container:";

pub struct AddressResolver {
    runtime: Arc<dyn ContainerRuntime>,
    network_label: String,
}

impl AddressResolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, network_label: impl Into<String>) -> Self {
        Self {
            runtime,
            network_label: network_label.into(),
        }
    }

    /// Determine the routable IPv4 address of `container`.
    ///
    /// Returns `Ok(None)` when the runtime has not assigned an address yet.
    pub async fn resolve(&self, container: &Container) -> Result<Option<Ipv4Addr>, ResolutionError> {
        // The label of the queried container applies along the whole chain.
        let net_name = container.labels.get(&self.network_label).cloned();

        let mut current = container.clone();
        let mut hops = 0;
        loop {
            if net_name.is_none() && !current.ip_address.is_empty() {
                return parse_address(&current.id, &current.ip_address);
            }

            let Some(target) = current.network_mode.strip_prefix(CONTAINER_MODE_PREFIX) else {
                break;
            };
            if hops == MAX_NETWORK_HOPS {
                return Err(ResolutionError::ChainTooDeep {
                    id: container.id.clone(),
                    max: MAX_NETWORK_HOPS,
                });
            }
            hops += 1;

            info!(
                "Container {} is in another container's network namespace ({})",
                current.short_id(),
                target
            );
            current = self
                .runtime
                .inspect_container(target)
                .await
                .map_err(|source| ResolutionError::DanglingReference {
                    id: container.id.clone(),
                    target: target.to_string(),
                    source,
                })?;
        }

        let lookup = match &net_name {
            Some(name) => {
                debug!("Network name {} specified ({})", name, current.short_id());
                name
            }
            None => &current.network_mode,
        };
        let network = current
            .networks
            .get(lookup)
            .ok_or_else(|| ResolutionError::NetworkNotFound(lookup.clone()))?;

        parse_address(&current.id, &network.ip_address)
    }
}

fn parse_address(id: &str, address: &str) -> Result<Option<Ipv4Addr>, ResolutionError> {
    if address.is_empty() {
        return Ok(None);
    }
    address
        .parse()
        .map(Some)
        .map_err(|_| ResolutionError::InvalidAddress {
            id: id.to_string(),
            address: address.to_string(),
        })
}
