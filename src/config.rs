use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::address::DEFAULT_NETWORK_LABEL;
use crate::resolvers::{
    ComposeResolver, ContainerNameResolver, DomainResolver, HostnameResolver, LabelResolver,
    NetworkAliasesResolver, DEFAULT_DOMAIN, DEFAULT_HOST_LABEL,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Docker daemon address; local defaults when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_ip: Option<String>,
    pub dns_bind: SocketAddr,
    /// Forward unanswered queries upstream instead of failing them.
    pub forward: bool,
    pub network_label: String,
    /// Domain appended to container names. Empty disables the strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname_domain: Option<String>,
    /// Label whose value is used verbatim as a domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose_domain: Option<String>,
    pub network_aliases: bool,
    /// Restrict alias resolution to one network.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_aliases_network: Option<String>,
    pub publish_address_changes: bool,
    pub etcd: EtcdConfig,
}

/// External record store settings. No endpoints, no publishing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_endpoint: None,
            bind_ip: None,
            dns_bind: SocketAddr::from(([0, 0, 0, 0], 53)),
            forward: true,
            network_label: DEFAULT_NETWORK_LABEL.into(),
            domain: Some(DEFAULT_DOMAIN.into()),
            hostname_domain: None,
            label: Some(DEFAULT_HOST_LABEL.into()),
            compose_domain: None,
            network_aliases: false,
            network_aliases_network: None,
            publish_address_changes: false,
            etcd: EtcdConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("dockerdiscovery.toml"))
            .merge(Json::file("dockerdiscovery.json"))
            .merge(Env::prefixed("DOCKERDISCOVERY_").split("__"))
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(secret_file) = std::env::var("DOCKERDISCOVERY_ETCD_PASSWORD_FILE") {
            config.etcd.password = Some(std::fs::read_to_string(secret_file)?.trim().to_string());
        }

        // If bind_ip is set, override the IP part of dns_bind
        if let Some(ref ip) = config.bind_ip {
            let port = config.dns_bind.port();
            config.dns_bind = format!("{}:{}", ip, port)
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid bind_ip: {}", e))?;
        }

        Ok(config)
    }

    /// Domain strategies in the order their results are concatenated.
    pub fn domain_resolvers(&self) -> Vec<Box<dyn DomainResolver>> {
        let mut resolvers: Vec<Box<dyn DomainResolver>> = Vec::new();
        if let Some(domain) = non_empty(&self.domain) {
            resolvers.push(Box::new(ContainerNameResolver { domain }));
        }
        if let Some(domain) = non_empty(&self.hostname_domain) {
            resolvers.push(Box::new(HostnameResolver { domain }));
        }
        if let Some(label) = non_empty(&self.label) {
            resolvers.push(Box::new(LabelResolver { label }));
        }
        if let Some(domain) = non_empty(&self.compose_domain) {
            resolvers.push(Box::new(ComposeResolver { domain }));
        }
        if self.network_aliases {
            resolvers.push(Box::new(NetworkAliasesResolver {
                network: non_empty(&self.network_aliases_network),
            }));
        }
        resolvers
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}
