//! Docker discovery daemon entry point.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::signal;
use tokio::task::JoinHandle;

mod address;
mod config;
mod dns_server;
mod error;
mod publish;
mod reactor;
mod registry;
mod resolvers;
mod runtime;
#[cfg(test)]
mod testing;
mod types;

use address::AddressResolver;
use config::Config;
use dns_server::{run_dns_server, DockerDiscovery, Forwarder};
use error::DiscoveryError;
use publish::{run_publisher, EtcdStore, Publisher};
use reactor::EventReactor;
use registry::ContainerRegistry;
use runtime::{ContainerRuntime, DockerRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!(
        "Starting Docker discovery: dns_bind={}, docker_endpoint={:?}, etcd_endpoints={:?}",
        cfg.dns_bind, cfg.docker_endpoint, cfg.etcd.endpoints
    );

    // Container Runtime (Docker)
    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::connect(cfg.docker_endpoint.as_deref())?);

    // External record store
    let publisher = if cfg.etcd.endpoints.is_empty() {
        info!("No etcd endpoints configured, records will not be published");
        Publisher::disabled()
    } else {
        match EtcdStore::connect(&cfg.etcd).await {
            Ok(store) => {
                let (publisher, update_rx) = Publisher::channel();
                tokio::spawn(run_publisher(store, update_rx));
                publisher
            }
            Err(e) => {
                warn!("Failed to connect to etcd: {}. Records will not be published", e);
                Publisher::disabled()
            }
        }
    };

    // Shared state
    let registry = Arc::new(
        ContainerRegistry::new(
            AddressResolver::new(Arc::clone(&runtime), cfg.network_label.clone()),
            cfg.domain_resolvers(),
            publisher,
        )
        .with_address_change_publishing(cfg.publish_address_changes),
    );

    // Discovery
    let reactor = EventReactor::new(runtime, Arc::clone(&registry));
    let discovery_handle = tokio::spawn(reactor.run());

    // DNS Server
    let next = if cfg.forward {
        Forwarder::system()
    } else {
        Forwarder::disabled()
    };
    let handler = DockerDiscovery::new(Arc::clone(&registry), next);
    info!("Serving as {}", DockerDiscovery::<Forwarder>::NAME);
    let dns_bind = cfg.dns_bind;
    let dns_handle = tokio::spawn(run_dns_server(dns_bind, handler));

    let result = supervise(signal::ctrl_c(), discovery_handle, dns_handle).await;
    info!("Shutdown complete.");
    result
}

/// Run until shutdown is requested or one of the subsystems stops.
///
/// Either subsystem stopping is an error: without discovery the answers go
/// stale, without the DNS server nothing is answered.
async fn supervise(
    shutdown: impl Future<Output = io::Result<()>>,
    mut discovery_handle: JoinHandle<Result<Infallible, DiscoveryError>>,
    mut dns_handle: JoinHandle<anyhow::Result<()>>,
) -> anyhow::Result<()> {
    let result: anyhow::Result<()> = tokio::select! {
        res = shutdown => {
            match res {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            }
            Ok(())
        }
        res = &mut discovery_handle => {
            match res {
                Ok(Err(e)) => {
                    error!("Docker discovery stopped: {}", e);
                    Err(e.into())
                }
                Ok(Ok(never)) => match never {},
                Err(e) => {
                    error!("Docker discovery task failed: {}", e);
                    Err(e.into())
                }
            }
        }
        res = &mut dns_handle => {
            match res {
                Ok(Err(e)) => {
                    error!("DNS server failed: {}", e);
                    Err(e)
                }
                Ok(Ok(())) => {
                    error!("DNS server stopped");
                    Err(anyhow::anyhow!("DNS server stopped"))
                }
                Err(e) => {
                    error!("DNS server task failed: {}", e);
                    Err(e.into())
                }
            }
        }
    };

    // Abort tasks
    discovery_handle.abort();
    dns_handle.abort();
    result
}
