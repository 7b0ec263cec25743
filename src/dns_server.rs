//! DNS server subsystem.
//!
//! This module implements the query side on top of the
//! [hickory-dns](https://crates.io/crates/hickory-server) server library.
//! Queries are processed as follows:
//!
//! * **A queries** for a domain that some discovered container answers
//!   for get an authoritative answer with the container's address.
//! * **Everything else** falls through to the next handler in the chain,
//!   by default a [`Forwarder`] to the upstream resolvers.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use hickory_server::authority::{MessageResponse, MessageResponseBuilder};
use hickory_server::proto::op::{Header, ResponseCode};
use hickory_server::proto::rr::rdata::A;
use hickory_server::proto::rr::{Name, RData, Record, RecordType};
use hickory_server::server::{
    Request, RequestHandler, ResponseHandler, ResponseInfo, ServerFuture,
};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::Duration;

use crate::registry::ContainerRegistry;

/// Timeout for idle TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(10);

/// TTL of answers synthesized from the registry.
pub const ANSWER_TTL: u32 = 3600;

/// Start the DNS server.
pub async fn run_dns_server<N: RequestHandler>(
    bind_addr: SocketAddr,
    handler: DockerDiscovery<N>,
) -> anyhow::Result<()> {
    info!("DNS server starting on {}", bind_addr);
    let mut server = ServerFuture::new(handler);

    // Register UDP listener.
    let udp = UdpSocket::bind(bind_addr).await?;
    server.register_socket(udp);

    // Register TCP listener.
    let tcp = TcpListener::bind(bind_addr).await?;
    server.register_listener(tcp, TCP_TIMEOUT);

    // Run the server until future resolves.
    server.block_until_done().await?;
    Ok(())
}

/// Answers A queries from the container registry, chaining to `next` on a miss.
pub struct DockerDiscovery<N> {
    registry: Arc<ContainerRegistry>,
    next: N,
}

impl<N: RequestHandler> DockerDiscovery<N> {
    /// Handler identity, also the log target of per-query messages.
    pub const NAME: &'static str = "docker";

    pub fn new(registry: Arc<ContainerRegistry>, next: N) -> Self {
        Self { registry, next }
    }
}

#[async_trait]
impl<N: RequestHandler> RequestHandler for DockerDiscovery<N> {
    async fn handle_request<R>(&self, request: &Request, mut response_handle: R) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        let query = request.query();
        if query.query_type() == RecordType::A {
            let qname = query.name().to_string();
            if let Some(ip) = self.registry.lookup(&qname).await {
                debug!(target: Self::NAME, "Found ip {} for host {}", ip, qname);

                let mut header = Header::response_from_request(request.header());
                header.set_authoritative(true);
                header.set_recursion_available(true);

                // Owner keeps the case the client asked with.
                let record = Record::from_rdata(
                    query.original().name().clone(),
                    ANSWER_TTL,
                    RData::A(A(ip)),
                );
                let builder = MessageResponseBuilder::from_message_request(request);
                let records = [record];
                let response = builder.build(
                    header,
                    records.iter(),
                    std::iter::empty(),
                    std::iter::empty(),
                    std::iter::empty(),
                );
                return send_or_fail(&mut response_handle, response).await;
            }
        }

        self.next.handle_request(request, response_handle).await
    }
}

/// Last handler in the chain: forwards to upstream resolvers, or fails
/// the query when forwarding is disabled.
pub struct Forwarder {
    resolver: Option<TokioAsyncResolver>,
}

impl Forwarder {
    /// Forward using the system resolver configuration.
    pub fn system() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            error!(
                "Failed to load system resolv.conf: {}. Falling back to Google DNS.",
                e
            );
            TokioAsyncResolver::tokio(ResolverConfig::google(), ResolverOpts::default())
        });
        Self {
            resolver: Some(resolver),
        }
    }

    /// Answer SERVFAIL for everything.
    pub fn disabled() -> Self {
        Self { resolver: None }
    }
}

#[async_trait]
impl RequestHandler for Forwarder {
    async fn handle_request<R>(&self, request: &Request, mut response_handle: R) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        let query = request.query();
        let mut header = Header::response_from_request(request.header());
        header.set_recursion_available(self.resolver.is_some());
        let builder = MessageResponseBuilder::from_message_request(request);

        let Some(resolver) = &self.resolver else {
            header.set_response_code(ResponseCode::ServFail);
            let response = builder.build_no_records(header);
            return send_or_fail(&mut response_handle, response).await;
        };

        let name = Name::from(query.name().clone());
        match resolver.lookup(name, query.query_type()).await {
            Ok(lookup) => {
                header.set_response_code(ResponseCode::NoError);
                let response = builder.build(
                    header,
                    lookup.records().iter(),
                    std::iter::empty(),
                    std::iter::empty(),
                    std::iter::empty(),
                );
                send_or_fail(&mut response_handle, response).await
            }
            Err(e) => {
                let code = match e.kind() {
                    ResolveErrorKind::NoRecordsFound { response_code, .. } => *response_code,
                    _ => {
                        warn!("Resolver lookup failed for {}: {}", query.name(), e);
                        ResponseCode::ServFail
                    }
                };
                header.set_response_code(code);
                let response = builder.build_no_records(header);
                send_or_fail(&mut response_handle, response).await
            }
        }
    }
}

async fn send_or_fail<'a, R>(
    response_handle: &mut R,
    response: MessageResponse<
        '_,
        'a,
        impl Iterator<Item = &'a Record> + Send + 'a,
        impl Iterator<Item = &'a Record> + Send + 'a,
        impl Iterator<Item = &'a Record> + Send + 'a,
        impl Iterator<Item = &'a Record> + Send + 'a,
    >,
) -> ResponseInfo
where
    R: ResponseHandler + Send,
{
    match response_handle.send_response(response).await {
        Ok(info) => info,
        Err(e) => {
            error!("Error sending response: {}", e);
            serve_failed()
        }
    }
}

fn serve_failed() -> ResponseInfo {
    let mut header = Header::new();
    header.set_response_code(ResponseCode::ServFail);
    header.into()
}
