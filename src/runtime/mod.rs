use crate::error::InspectionError;
use crate::types::{Container, RuntimeEvent};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub mod docker;
pub use docker::DockerRuntime;

/// Stream of lifecycle events. Item errors are transient; the end of the
/// stream means the connection to the runtime is gone.
pub type EventStream = BoxStream<'static, Result<RuntimeEvent, String>>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// IDs of the currently running containers.
    async fn list_containers(&self) -> Result<Vec<String>, InspectionError>;

    /// Full metadata of a single container.
    async fn inspect_container(&self, id: &str) -> Result<Container, InspectionError>;

    /// Subscribe to container and network lifecycle events.
    fn events(&self) -> EventStream;
}
