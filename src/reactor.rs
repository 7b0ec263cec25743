//! Drives the registry from the runtime's lifecycle events.

use std::convert::Infallible;
use std::sync::Arc;

use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};

use crate::error::DiscoveryError;
use crate::registry::ContainerRegistry;
use crate::runtime::ContainerRuntime;
use crate::types::{short_id, Container, RuntimeEvent};

/// What an event asks the reactor to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Start(String),
    Die(String),
    NetworkConnect { container: String, network: String },
    NetworkDisconnect { container: String, network: String },
    Ignored,
}

impl From<&RuntimeEvent> for EventAction {
    fn from(event: &RuntimeEvent) -> Self {
        match (event.kind.as_str(), event.action.as_str()) {
            ("container", "start") => EventAction::Start(event.actor_id.clone()),
            ("container", "die") => EventAction::Die(event.actor_id.clone()),
            ("network", action @ ("connect" | "disconnect")) => {
                let Some(container) = event.attributes.get("container").cloned() else {
                    warn!("Network {} event without container attribute", action);
                    return EventAction::Ignored;
                };
                let network = event.attributes.get("name").cloned().unwrap_or_default();
                if action == "connect" {
                    EventAction::NetworkConnect { container, network }
                } else {
                    EventAction::NetworkDisconnect { container, network }
                }
            }
            _ => EventAction::Ignored,
        }
    }
}

#[derive(Clone)]
pub struct EventReactor {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<ContainerRegistry>,
}

impl EventReactor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<ContainerRegistry>) -> Self {
        Self { runtime, registry }
    }

    /// Populate the registry, then follow the event stream.
    ///
    /// Only returns when discovery can no longer continue.
    pub async fn run(self) -> Result<Infallible, DiscoveryError> {
        // Subscribe first so nothing between the scan and the stream is lost.
        let mut events = self.runtime.events();
        self.sync().await?;

        info!("Listening for Docker events...");
        while let Some(msg) = events.next().await {
            match msg {
                Ok(event) => {
                    let reactor = self.clone();
                    tokio::spawn(async move { reactor.handle_event(event).await });
                }
                Err(e) => error!("Error in Docker event stream: {}", e),
            }
        }

        error!("Docker event stream ended");
        Err(DiscoveryError::EventStreamClosed)
    }

    /// Update the registry for every running container.
    pub async fn sync(&self) -> Result<(), DiscoveryError> {
        let ids = self.runtime.list_containers().await?;
        for id in ids {
            match self.runtime.inspect_container(&id).await {
                Ok(container) => self.apply(&container).await,
                Err(e) => warn!("Skipping container {} in initial scan: {}", short_id(&id), e),
            }
        }
        info!("Initial scan found {} containers", self.registry.len().await);
        Ok(())
    }

    pub async fn handle_event(&self, event: RuntimeEvent) {
        match EventAction::from(&event) {
            EventAction::Start(id) => {
                info!("New container {} spawned, adding its records", short_id(&id));
                self.refresh(&id).await;
            }
            EventAction::Die(id) => {
                info!("Container {} stopped, removing its records", short_id(&id));
                self.registry.remove(&id).await;
            }
            EventAction::NetworkConnect { container, network } => {
                info!(
                    "Container {} being connected to network {}",
                    short_id(&container),
                    network
                );
                self.refresh(&container).await;
            }
            EventAction::NetworkDisconnect { container, network } => {
                info!(
                    "Container {} being disconnected from network {}",
                    short_id(&container),
                    network
                );
                self.refresh(&container).await;
            }
            EventAction::Ignored => {
                debug!("Ignoring event {}:{}", event.kind, event.action);
            }
        }
    }

    async fn refresh(&self, id: &str) {
        match self.runtime.inspect_container(id).await {
            Ok(container) => self.apply(&container).await,
            Err(e) => warn!("Dropping event for {}: {}", short_id(id), e),
        }
    }

    async fn apply(&self, container: &Container) {
        if let Err(e) = self.registry.update(container).await {
            warn!(
                "Error updating records for container {}: {}",
                container.short_id(),
                e
            );
        }
    }
}
