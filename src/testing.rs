//! In-memory stand-ins for the runtime and the record store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::error::{InspectionError, PublishError};
use crate::publish::RecordStore;
use crate::runtime::{ContainerRuntime, EventStream};
use crate::types::{Container, RuntimeEvent};

pub fn container(id: &str, name: &str) -> Container {
    Container {
        id: id.into(),
        name: name.into(),
        ..Default::default()
    }
}

#[derive(Clone, Default)]
pub struct MockRuntime {
    containers: Arc<Mutex<HashMap<String, Container>>>,
    events: Arc<Mutex<Option<mpsc::UnboundedReceiver<RuntimeEvent>>>>,
}

impl MockRuntime {
    pub fn with_container(self, container: Container) -> Self {
        self.insert(container);
        self
    }

    pub fn insert(&self, container: Container) {
        self.containers
            .lock()
            .unwrap()
            .insert(container.id.clone(), container);
    }

    /// Feed events into the stream returned by [`ContainerRuntime::events`].
    /// Without a sender the stream ends immediately.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<RuntimeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(rx);
        tx
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<String>, InspectionError> {
        Ok(self.containers.lock().unwrap().keys().cloned().collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<Container, InspectionError> {
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| InspectionError::Inspect {
                id: id.to_string(),
                reason: "no such container".into(),
            })
    }

    fn events(&self) -> EventStream {
        match self.events.lock().unwrap().take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (Ok::<_, String>(event), rx))
            })
            .boxed(),
            None => stream::empty::<Result<RuntimeEvent, String>>().boxed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put(String, String),
    Delete(String),
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    ops: Arc<Mutex<Vec<StoreOp>>>,
    attempts: Arc<Mutex<usize>>,
    fail: bool,
    stall_on: Option<String>,
}

impl MemoryStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Requests for `key` never complete.
    pub fn stalling_on(key: &str) -> Self {
        Self {
            stall_on: Some(key.to_string()),
            ..Default::default()
        }
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    async fn record(&self, op: StoreOp) -> Result<(), PublishError> {
        *self.attempts.lock().unwrap() += 1;
        let key = match &op {
            StoreOp::Put(key, _) | StoreOp::Delete(key) => key,
        };
        if self.stall_on.as_ref() == Some(key) {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(match op {
                StoreOp::Put(key, _) => PublishError::Put {
                    key,
                    reason: "store unavailable".into(),
                },
                StoreOp::Delete(key) => PublishError::Delete {
                    key,
                    reason: "store unavailable".into(),
                },
            });
        }
        self.ops.lock().unwrap().push(op);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn put(&mut self, key: &str, value: String) -> Result<(), PublishError> {
        self.record(StoreOp::Put(key.to_string(), value)).await
    }

    async fn delete(&mut self, key: &str) -> Result<(), PublishError> {
        self.record(StoreOp::Delete(key.to_string())).await
    }
}
