//! Mirrors registry changes into an external record store (etcd).
//!
//! The registry never talks to the store directly. It pushes [`Update`]s
//! into an unbounded channel and a background task drains them in order,
//! so a slow or unreachable store never holds up container updates.

use async_trait::async_trait;
use etcd_client::{Certificate, Client, ConnectOptions, Identity, TlsOptions};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::EtcdConfig;
use crate::error::PublishError;
use crate::types::Update;

/// Prefix of every key written to the store.
pub const KEY_PREFIX: &str = "/docker/docker/";

/// TTL advertised in the stored record, in seconds.
pub const RECORD_TTL: u32 = 15;

/// Upper bound on a single store request, so one stuck write cannot
/// hold back every later update.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct StoreRecord {
    host: String,
    ttl: u32,
}

/// Store key for a normalized container name.
pub fn record_key(name: &str) -> String {
    format!("{}{}", KEY_PREFIX, name)
}

/// Handle used by the registry to queue store updates.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: Option<mpsc::UnboundedSender<Update>>,
}

impl Publisher {
    /// A publisher paired with the receiving end for [`run_publisher`].
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Update>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A publisher that discards every update.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn publish(&self, update: Update) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.send(update) {
            warn!("Record store publisher is gone, dropping {:?}", e.0);
        }
    }
}

#[async_trait]
pub trait RecordStore: Send {
    async fn put(&mut self, key: &str, value: String) -> Result<(), PublishError>;
    async fn delete(&mut self, key: &str) -> Result<(), PublishError>;
}

/// Drain `update_rx` into `store` until every [`Publisher`] is dropped.
pub async fn run_publisher<S: RecordStore>(mut store: S, mut update_rx: mpsc::UnboundedReceiver<Update>) {
    while let Some(update) = update_rx.recv().await {
        let result = match timeout(STORE_TIMEOUT, apply(&mut store, &update)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(STORE_TIMEOUT)),
        };
        if let Err(e) = result {
            error!("Failed to publish {:?}: {}", update, e);
        }
    }
    info!("Publisher channel closed, shutting down");
}

async fn apply<S: RecordStore>(store: &mut S, update: &Update) -> Result<(), PublishError> {
    match update {
        Update::Add { name, ip } => {
            let key = record_key(name);
            let value = serde_json::to_string(&StoreRecord {
                host: ip.to_string(),
                ttl: RECORD_TTL,
            })?;
            debug!("Publishing {} = {}", key, value);
            store.put(&key, value).await
        }
        Update::Remove { name } => {
            let key = record_key(name);
            debug!("Withdrawing {}", key);
            store.delete(&key).await
        }
    }
}

pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(cfg: &EtcdConfig) -> anyhow::Result<Self> {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(STORE_TIMEOUT)
            .with_timeout(STORE_TIMEOUT);
        if let (Some(user), Some(password)) = (&cfg.username, &cfg.password) {
            if !user.is_empty() && !password.is_empty() {
                options = options.with_user(user.clone(), password.clone());
            }
        }
        if let Some(tls) = tls_options(cfg).await? {
            options = options.with_tls(tls);
        }

        let client = Client::connect(&cfg.endpoints, Some(options)).await?;
        info!("Connected to etcd at {:?}", cfg.endpoints);
        Ok(Self { client })
    }
}

async fn tls_options(cfg: &EtcdConfig) -> anyhow::Result<Option<TlsOptions>> {
    let mut tls = None;
    if let Some(path) = &cfg.ca_cert {
        let pem = tokio::fs::read(path).await?;
        tls = Some(TlsOptions::new().ca_certificate(Certificate::from_pem(pem)));
    }
    if let (Some(cert), Some(key)) = (&cfg.cert, &cfg.key) {
        let cert = tokio::fs::read(cert).await?;
        let key = tokio::fs::read(key).await?;
        tls = Some(tls.unwrap_or_else(TlsOptions::new).identity(Identity::from_pem(cert, key)));
    }
    Ok(tls)
}

#[async_trait]
impl RecordStore for EtcdStore {
    async fn put(&mut self, key: &str, value: String) -> Result<(), PublishError> {
        self.client
            .put(key, value, None)
            .await
            .map(|_| ())
            .map_err(|e| PublishError::Put {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn delete(&mut self, key: &str) -> Result<(), PublishError> {
        self.client
            .delete(key, None)
            .await
            .map(|_| ())
            .map_err(|e| PublishError::Delete {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}
