//! The authoritative table of discovered containers.
//!
//! Event tasks write to the registry and the DNS handler reads from it
//! concurrently, so every access goes through one `RwLock`. Address
//! resolution may inspect other containers over the network; it runs
//! before the write lock is taken, never while holding it.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use log::{debug, info, warn};
use tokio::sync::RwLock;

use crate::address::AddressResolver;
use crate::error::ResolutionError;
use crate::publish::Publisher;
use crate::resolvers::{resolve_domains, DomainResolver};
use crate::types::{short_id, Container, ContainerRecord, Update};

/// What [`ContainerRegistry::update`] did with the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First discovery; published to the record store.
    Inserted,
    /// An existing entry was overwritten with fresh data.
    Replaced,
    /// The container lost its address or domains and was dropped.
    Removed,
    /// Nothing to publish and nothing was tracked.
    Skipped,
}

pub struct ContainerRegistry {
    records: RwLock<HashMap<String, ContainerRecord>>,
    addresses: AddressResolver,
    resolvers: Vec<Box<dyn DomainResolver>>,
    publisher: Publisher,
    publish_address_changes: bool,
}

impl ContainerRegistry {
    pub fn new(
        addresses: AddressResolver,
        resolvers: Vec<Box<dyn DomainResolver>>,
        publisher: Publisher,
    ) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            addresses,
            resolvers,
            publisher,
            publish_address_changes: false,
        }
    }

    /// Also re-publish a tracked container when its address changes.
    ///
    /// Off by default: the store then only learns about first discovery
    /// and removal.
    pub fn with_address_change_publishing(mut self, enabled: bool) -> Self {
        self.publish_address_changes = enabled;
        self
    }

    /// Re-resolve `container` and bring its entry up to date.
    pub async fn update(&self, container: &Container) -> Result<UpdateOutcome, ResolutionError> {
        let address = match self.addresses.resolve(container).await {
            Ok(Some(address)) => address,
            Ok(None) => {
                debug!("Container {} has no address yet", container.short_id());
                return Ok(self.withdraw(container).await);
            }
            Err(e) => {
                self.withdraw(container).await;
                return Err(e);
            }
        };

        let domains = resolve_domains(&self.resolvers, container);
        if domains.is_empty() {
            return Ok(self.withdraw(container).await);
        }

        let record = ContainerRecord {
            id: container.id.clone(),
            name: container.normalized_name().to_string(),
            address,
            domains,
        };

        let mut records = self.records.write().await;
        warn_on_conflicts(&records, &record);
        let name = record.name.clone();
        match records.insert(container.id.clone(), record) {
            None => {
                info!(
                    "Add entry of container {} ({}). IP: {}",
                    name,
                    container.short_id(),
                    address
                );
                self.publisher.publish(Update::Add { name, ip: address });
                Ok(UpdateOutcome::Inserted)
            }
            Some(previous) => {
                if previous.address != address {
                    info!(
                        "Container {} ({}) moved from {} to {}",
                        name,
                        container.short_id(),
                        previous.address,
                        address
                    );
                    if self.publish_address_changes {
                        self.publisher.publish(Update::Add { name, ip: address });
                    }
                }
                Ok(UpdateOutcome::Replaced)
            }
        }
    }

    /// Drop the entry for `id`. Returns whether anything was tracked.
    pub async fn remove(&self, id: &str) -> bool {
        let mut records = self.records.write().await;
        match records.remove(id) {
            Some(record) => {
                info!("Deleting entry {} ({})", record.name, short_id(id));
                self.publisher.publish(Update::Remove { name: record.name });
                true
            }
            None => {
                debug!("No entry associated with the container {}", short_id(id));
                false
            }
        }
    }

    async fn withdraw(&self, container: &Container) -> UpdateOutcome {
        if self.remove(&container.id).await {
            UpdateOutcome::Removed
        } else {
            UpdateOutcome::Skipped
        }
    }

    /// Address of a container answering for the fully qualified `qname`.
    ///
    /// If several containers claim the same domain, which one answers is
    /// unspecified.
    pub async fn lookup(&self, qname: &str) -> Option<Ipv4Addr> {
        let records = self.records.read().await;
        records
            .values()
            .find(|r| r.domains.iter().any(|d| is_qualified_match(d, qname)))
            .map(|r| r.address)
    }

    #[cfg(test)]
    pub async fn get(&self, id: &str) -> Option<ContainerRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

fn is_qualified_match(domain: &str, qname: &str) -> bool {
    qname
        .strip_suffix('.')
        .is_some_and(|q| q.eq_ignore_ascii_case(domain))
}

fn warn_on_conflicts(records: &HashMap<String, ContainerRecord>, record: &ContainerRecord) {
    for other in records.values().filter(|r| r.id != record.id) {
        for domain in record.domains.iter().filter(|d| other.domains.contains(d)) {
            warn!(
                "Domain {} is claimed by both {} and {}, answers are ambiguous",
                domain, record.name, other.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::DEFAULT_NETWORK_LABEL;
    use crate::resolvers::{ContainerNameResolver, LabelResolver, DEFAULT_HOST_LABEL};
    use crate::testing::{container, MockRuntime};
    use crate::types::Network;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn registry(runtime: MockRuntime) -> (ContainerRegistry, UnboundedReceiver<Update>) {
        let (publisher, rx) = Publisher::channel();
        let resolvers: Vec<Box<dyn DomainResolver>> = vec![
            Box::new(ContainerNameResolver {
                domain: "docker.local".into(),
            }),
            Box::new(LabelResolver {
                label: DEFAULT_HOST_LABEL.into(),
            }),
        ];
        let addresses = AddressResolver::new(Arc::new(runtime), DEFAULT_NETWORK_LABEL);
        (ContainerRegistry::new(addresses, resolvers, publisher), rx)
    }

    fn web(ip: &str) -> Container {
        let mut c = container("abc123", "/web");
        c.ip_address = ip.into();
        c.labels.insert(DEFAULT_HOST_LABEL.into(), "app.local".into());
        c
    }

    #[tokio::test]
    async fn inserts_and_publishes_once() {
        let (registry, mut rx) = registry(MockRuntime::default());

        let outcome = registry.update(&web("10.0.0.5")).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Inserted);

        let record = registry.get("abc123").await.unwrap();
        assert_eq!(record.address, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(record.domains, vec!["web.docker.local", "app.local"]);
        assert_eq!(
            rx.try_recv().unwrap(),
            Update::Add {
                name: "web".into(),
                ip: Ipv4Addr::new(10, 0, 0, 5)
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn update_is_idempotent() {
        let (registry, mut rx) = registry(MockRuntime::default());

        registry.update(&web("10.0.0.5")).await.unwrap();
        let outcome = registry.update(&web("10.0.0.5")).await.unwrap();

        assert_eq!(outcome, UpdateOutcome::Replaced);
        assert_eq!(registry.len().await, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn address_change_is_not_republished_by_default() {
        let (registry, mut rx) = registry(MockRuntime::default());

        registry.update(&web("10.0.0.5")).await.unwrap();
        registry.update(&web("10.0.0.6")).await.unwrap();

        assert_eq!(registry.lookup("app.local.").await, Some(Ipv4Addr::new(10, 0, 0, 6)));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn address_change_is_republished_when_enabled() {
        let (registry, mut rx) = registry(MockRuntime::default());
        let registry = registry.with_address_change_publishing(true);

        registry.update(&web("10.0.0.5")).await.unwrap();
        registry.update(&web("10.0.0.5")).await.unwrap();
        registry.update(&web("10.0.0.6")).await.unwrap();

        rx.try_recv().unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            Update::Add {
                name: "web".into(),
                ip: Ipv4Addr::new(10, 0, 0, 6)
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn container_without_domains_is_not_tracked() {
        let (publisher, mut rx) = Publisher::channel();
        let addresses = AddressResolver::new(Arc::new(MockRuntime::default()), DEFAULT_NETWORK_LABEL);
        let resolvers: Vec<Box<dyn DomainResolver>> = vec![Box::new(LabelResolver {
            label: DEFAULT_HOST_LABEL.into(),
        })];
        let registry = ContainerRegistry::new(addresses, resolvers, publisher);

        let mut c = web("10.0.0.5");
        let outcome = registry.update(&c).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Inserted);
        rx.try_recv().unwrap();

        c.labels.clear();
        let outcome = registry.update(&c).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Removed);
        assert_eq!(rx.try_recv().unwrap(), Update::Remove { name: "web".into() });

        let outcome = registry.update(&c).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Skipped);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn lost_address_removes_entry() {
        let (registry, mut rx) = registry(MockRuntime::default());
        registry.update(&web("10.0.0.5")).await.unwrap();
        rx.try_recv().unwrap();

        let mut c = web("");
        c.network_mode = "appnet".into();
        c.networks.insert("appnet".into(), Network::default());
        let outcome = registry.update(&c).await.unwrap();

        assert_eq!(outcome, UpdateOutcome::Removed);
        assert_eq!(rx.try_recv().unwrap(), Update::Remove { name: "web".into() });
        assert_eq!(registry.lookup("web.docker.local.").await, None);
    }

    #[tokio::test]
    async fn resolution_error_removes_entry_and_is_returned() {
        let (registry, mut rx) = registry(MockRuntime::default());
        registry.update(&web("10.0.0.5")).await.unwrap();
        rx.try_recv().unwrap();

        let mut c = web("");
        c.network_mode = "appnet".into();
        let err = registry.update(&c).await.unwrap_err();

        assert!(matches!(err, ResolutionError::NetworkNotFound(_)));
        assert_eq!(registry.len().await, 0);
        assert_eq!(rx.try_recv().unwrap(), Update::Remove { name: "web".into() });
    }

    #[tokio::test]
    async fn remove_makes_domains_miss() {
        let (registry, mut rx) = registry(MockRuntime::default());
        registry.update(&web("10.0.0.5")).await.unwrap();
        rx.try_recv().unwrap();

        assert!(registry.remove("abc123").await);
        assert_eq!(registry.lookup("app.local.").await, None);
        assert_eq!(registry.lookup("web.docker.local.").await, None);
        assert_eq!(rx.try_recv().unwrap(), Update::Remove { name: "web".into() });

        assert!(!registry.remove("abc123").await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn lookup_requires_qualified_name() {
        let (registry, _rx) = registry(MockRuntime::default());
        registry.update(&web("10.0.0.5")).await.unwrap();

        assert_eq!(registry.lookup("app.local.").await, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(registry.lookup("APP.Local.").await, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(registry.lookup("app.local").await, None);
        assert_eq!(registry.lookup("other.local.").await, None);
    }
}
