//! Domain resolution strategies.
//!
//! Each strategy derives zero or more domains from the container metadata
//! alone. The registry runs all configured strategies and concatenates
//! their results in registration order.

use log::warn;

use crate::error::ResolutionError;
use crate::types::Container;

/// Default domain appended to container names.
pub const DEFAULT_DOMAIN: &str = "docker.local";

/// Default label carrying an explicit host name.
pub const DEFAULT_HOST_LABEL: &str = "coredns.dockerdiscovery.host";

const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

pub trait DomainResolver: Send + Sync {
    /// Short name of the strategy, used in logs and errors.
    fn name(&self) -> &'static str;

    /// Domains the container should answer for, without trailing dots.
    fn resolve(&self, container: &Container) -> Result<Vec<String>, ResolutionError>;
}

/// Run every strategy against `container` and concatenate the results.
///
/// A failing strategy contributes no domains; the others still run.
pub fn resolve_domains(resolvers: &[Box<dyn DomainResolver>], container: &Container) -> Vec<String> {
    let mut domains = Vec::new();
    for resolver in resolvers {
        match resolver.resolve(container) {
            Ok(found) => domains.extend(
                found
                    .into_iter()
                    .map(|d| d.trim_end_matches('.').to_string())
                    .filter(|d| !d.is_empty()),
            ),
            Err(e) => warn!("Error resolving container domains: {}", e),
        }
    }
    domains
}

/// `<container name>.<domain>`
pub struct ContainerNameResolver {
    pub domain: String,
}

impl DomainResolver for ContainerNameResolver {
    fn name(&self) -> &'static str {
        "container name"
    }

    fn resolve(&self, container: &Container) -> Result<Vec<String>, ResolutionError> {
        let name = container.normalized_name();
        if name.is_empty() {
            return Err(ResolutionError::Domain {
                strategy: self.name(),
                id: container.id.clone(),
                reason: "container has no name".into(),
            });
        }
        Ok(vec![format!("{}.{}", name, self.domain)])
    }
}

/// `<hostname>.<domain>`
pub struct HostnameResolver {
    pub domain: String,
}

impl DomainResolver for HostnameResolver {
    fn name(&self) -> &'static str {
        "hostname"
    }

    fn resolve(&self, container: &Container) -> Result<Vec<String>, ResolutionError> {
        if container.hostname.is_empty() {
            return Err(ResolutionError::Domain {
                strategy: self.name(),
                id: container.id.clone(),
                reason: "container has no hostname".into(),
            });
        }
        Ok(vec![format!("{}.{}", container.hostname, self.domain)])
    }
}

/// The value of a label, taken verbatim as the domain.
pub struct LabelResolver {
    pub label: String,
}

impl DomainResolver for LabelResolver {
    fn name(&self) -> &'static str {
        "label"
    }

    fn resolve(&self, container: &Container) -> Result<Vec<String>, ResolutionError> {
        Ok(container
            .labels
            .get(&self.label)
            .filter(|v| !v.is_empty())
            .map(|v| vec![v.clone()])
            .unwrap_or_default())
    }
}

/// `<service>.<project>.<domain>` for containers started by docker compose.
pub struct ComposeResolver {
    pub domain: String,
}

impl DomainResolver for ComposeResolver {
    fn name(&self) -> &'static str {
        "compose"
    }

    fn resolve(&self, container: &Container) -> Result<Vec<String>, ResolutionError> {
        let project = container.labels.get(COMPOSE_PROJECT_LABEL);
        let service = container.labels.get(COMPOSE_SERVICE_LABEL);
        match (project, service) {
            (Some(project), Some(service)) => {
                Ok(vec![format!("{}.{}.{}", service, project, self.domain)])
            }
            _ => Ok(Vec::new()),
        }
    }
}

/// Network aliases, either of one network or of every attached network.
pub struct NetworkAliasesResolver {
    pub network: Option<String>,
}

impl DomainResolver for NetworkAliasesResolver {
    fn name(&self) -> &'static str {
        "network aliases"
    }

    fn resolve(&self, container: &Container) -> Result<Vec<String>, ResolutionError> {
        match &self.network {
            Some(name) => Ok(container
                .networks
                .get(name)
                .map(|n| n.aliases.clone())
                .unwrap_or_default()),
            None => {
                // Sorted so the output does not depend on map order.
                let mut names: Vec<&String> = container.networks.keys().collect();
                names.sort();
                Ok(names
                    .into_iter()
                    .flat_map(|n| container.networks[n].aliases.iter().cloned())
                    .collect())
            }
        }
    }
}
