use super::{ContainerRuntime, EventStream};
use crate::error::InspectionError;
use crate::types::{Container, Network, RuntimeEvent};
use anyhow::Result;
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::{ContainerInspectResponse, EventMessage};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use log::info;
use std::collections::HashMap;

/// Seconds before a request to the Docker daemon times out.
const DOCKER_TIMEOUT: u64 = 120;

/// Event types and actions the reactor cares about.
const EVENT_TYPES: [&str; 2] = ["container", "network"];
const EVENT_ACTIONS: [&str; 4] = ["start", "die", "connect", "disconnect"];

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker daemon.
    ///
    /// `endpoint` accepts `unix://` socket paths and `tcp://`/`http://`
    /// addresses. Without an endpoint the local defaults apply, which
    /// honour `DOCKER_HOST`.
    pub fn connect(endpoint: Option<&str>) -> Result<Self> {
        let docker = match endpoint {
            None => Docker::connect_with_local_defaults()?,
            Some(ep) if ep.starts_with("unix://") => {
                Docker::connect_with_unix(ep, DOCKER_TIMEOUT, API_DEFAULT_VERSION)?
            }
            Some(ep) => Docker::connect_with_http(ep, DOCKER_TIMEOUT, API_DEFAULT_VERSION)?,
        };
        info!(
            "Using Docker endpoint {}",
            endpoint.unwrap_or("<local defaults>")
        );
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<String>, InspectionError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(|e| InspectionError::List(e.to_string()))?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<Container, InspectionError> {
        self.docker
            .inspect_container(id, None)
            .await
            .map(Container::from)
            .map_err(|e| InspectionError::Inspect {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    fn events(&self) -> EventStream {
        let filters: HashMap<String, Vec<String>> = [
            ("type", EVENT_TYPES.as_slice()),
            ("event", EVENT_ACTIONS.as_slice()),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect();
        let opts = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        self.docker
            .events(Some(opts))
            .map(|msg| msg.map(RuntimeEvent::from).map_err(|e| e.to_string()))
            .boxed()
    }
}

impl From<ContainerInspectResponse> for Container {
    fn from(detail: ContainerInspectResponse) -> Self {
        let (hostname, labels) = detail
            .config
            .map(|c| (c.hostname.unwrap_or_default(), c.labels.unwrap_or_default()))
            .unwrap_or_default();
        let network_mode = detail
            .host_config
            .and_then(|h| h.network_mode)
            .unwrap_or_default();
        let (ip_address, networks) = detail
            .network_settings
            .map(|s| {
                let networks = s
                    .networks
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(name, endpoint)| {
                        let network = Network {
                            ip_address: endpoint.ip_address.unwrap_or_default(),
                            aliases: endpoint.aliases.unwrap_or_default(),
                        };
                        (name, network)
                    })
                    .collect();
                (s.ip_address.unwrap_or_default(), networks)
            })
            .unwrap_or_default();

        Container {
            id: detail.id.unwrap_or_default(),
            name: detail.name.unwrap_or_default(),
            hostname,
            labels,
            network_mode,
            ip_address,
            networks,
        }
    }
}

impl From<EventMessage> for RuntimeEvent {
    fn from(event: EventMessage) -> Self {
        let (actor_id, attributes) = event
            .actor
            .map(|a| (a.id.unwrap_or_default(), a.attributes.unwrap_or_default()))
            .unwrap_or_default();

        RuntimeEvent {
            kind: event.typ.map(|t| t.to_string()).unwrap_or_default(),
            action: event.action.unwrap_or_default(),
            actor_id,
            attributes,
        }
    }
}
