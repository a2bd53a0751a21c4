use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RegistryError;
use crate::gateway::types::ContainerInspect;

/// Compose project label, checked first when grouping containers into stacks
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
/// Swarm stack label, used when no compose project label is present
pub const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";

const DOCKER_HUB_HOSTS: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];
const SHORT_ID_LEN: usize = 12;

/// The three names a container answers to: stable name, runtime ID and short ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerIdentity {
    pub name: String,
    pub id: String,
    pub short_id: String,
}

impl ContainerIdentity {
    pub fn new(name: &str, id: &str) -> Self {
        let name = name.trim_start_matches('/').to_string();
        let short_id = id.chars().take(SHORT_ID_LEN).collect();
        Self {
            name,
            id: id.to_string(),
            short_id,
        }
    }

    /// Lookup keys in name, full ID, short ID order
    pub fn keys(&self) -> [&str; 3] {
        [&self.name, &self.id, &self.short_id]
    }
}

impl fmt::Display for ContainerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.short_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerState {
    pub fn parse(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    /// States from which the container will not come back on its own
    pub fn is_terminated(&self) -> bool {
        matches!(self, ContainerState::Exited | ContainerState::Dead)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            ContainerState::Created | ContainerState::Exited | ContainerState::Dead
        )
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn parse(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "starting" => HealthStatus::Starting,
            "healthy" => HealthStatus::Healthy,
            "unhealthy" => HealthStatus::Unhealthy,
            _ => HealthStatus::None,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::None => "none",
            HealthStatus::Starting => "starting",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Network mode as recorded in a container's host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkMode {
    Default,
    None,
    Host,
    Bridge,
    /// `service:<ref>`: shares the namespace of a compose service peer
    Service(String),
    /// `container:<ref>`: shares the namespace of another container
    Container(String),
    /// A user-defined network
    Named(String),
}

impl NetworkMode {
    pub fn parse(mode: &str) -> Self {
        let mode = mode.trim();
        if let Some(reference) = mode.strip_prefix("service:") {
            return NetworkMode::Service(reference.to_string());
        }
        if let Some(reference) = mode.strip_prefix("container:") {
            return NetworkMode::Container(reference.to_string());
        }
        match mode {
            "" | "default" => NetworkMode::Default,
            "none" => NetworkMode::None,
            "host" => NetworkMode::Host,
            "bridge" => NetworkMode::Bridge,
            other => NetworkMode::Named(other.to_string()),
        }
    }

    /// The referenced peer when this mode shares another container's namespace
    pub fn shared_namespace_ref(&self) -> Option<&str> {
        match self {
            NetworkMode::Service(reference) | NetworkMode::Container(reference) => {
                Some(reference.as_str())
            }
            _ => None,
        }
    }

    pub fn is_shared_namespace(&self) -> bool {
        self.shared_namespace_ref().is_some()
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Default => f.write_str("default"),
            NetworkMode::None => f.write_str("none"),
            NetworkMode::Host => f.write_str("host"),
            NetworkMode::Bridge => f.write_str("bridge"),
            NetworkMode::Service(reference) => write!(f, "service:{}", reference),
            NetworkMode::Container(reference) => write!(f, "container:{}", reference),
            NetworkMode::Named(name) => f.write_str(name),
        }
    }
}

/// A parsed image reference: `[registry/]repository[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self, RegistryError> {
        let invalid = || RegistryError::InvalidReference {
            reference: reference.to_string(),
        };
        let reference_trimmed = reference.trim();
        if reference_trimmed.is_empty() || reference_trimmed.contains(char::is_whitespace) {
            return Err(invalid());
        }

        let (name_part, digest) = match reference_trimmed.split_once('@') {
            Some((name, digest)) if !digest.is_empty() => (name, Some(digest.to_string())),
            Some(_) => return Err(invalid()),
            None => (reference_trimmed, None),
        };

        let last_slash = name_part.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match name_part[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &name_part[split + 1..];
                if tag.is_empty() {
                    return Err(invalid());
                }
                (&name_part[..split], Some(tag.to_string()))
            }
            None => (name_part, None),
        };

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_ascii_lowercase()), rest.to_string())
            }
            _ => (None, path.to_string()),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid());
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Registry host, `docker.io` when none is given
    pub fn registry_host(&self) -> &str {
        self.registry.as_deref().unwrap_or("docker.io")
    }

    pub fn is_docker_hub(&self) -> bool {
        DOCKER_HUB_HOSTS.contains(&self.registry_host())
    }

    /// Repository path as the registry API expects it (`library/` added for official hub images)
    pub fn api_repository(&self) -> String {
        if self.is_docker_hub() && !self.repository.contains('/') {
            format!("library/{}", self.repository)
        } else {
            self.repository.clone()
        }
    }

    /// Repository including the registry host when one was given
    pub fn full_repository(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }

    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    /// Same image, pinned to `tag` and without a digest
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }

    /// Repository identity ignoring tag and digest, with Docker Hub aliases folded together
    pub fn same_repository(&self, other: &ImageRef) -> bool {
        let host = |r: &ImageRef| {
            if r.is_docker_hub() {
                "docker.io".to_string()
            } else {
                r.registry_host().to_string()
            }
        };
        host(self) == host(other) && self.api_repository() == other.api_repository()
    }

    /// Cache key for "latest digest" lookups
    pub fn cache_key(&self) -> (String, String) {
        let host = if self.is_docker_hub() {
            "docker.io"
        } else {
            self.registry_host()
        };
        (
            format!("{}/{}", host, self.api_repository()),
            self.tag_or_latest().to_string(),
        )
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_repository())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ImageRef {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageRef::parse(s)
    }
}

/// A container as observed by one inspect call.
///
/// Snapshots are never cached across orchestration steps: each step that needs the
/// current truth inspects again.
#[derive(Debug, Clone)]
pub struct ContainerSnapshot {
    pub identity: ContainerIdentity,
    /// Configured image reference; `None` when the container was created from a bare image ID
    pub image: Option<ImageRef>,
    pub image_id: String,
    pub state: ContainerState,
    pub health: HealthStatus,
    pub has_healthcheck: bool,
    pub network_mode: NetworkMode,
    pub group: Option<String>,
    pub exit_code: i64,
    pub inspect: ContainerInspect,
}

impl ContainerSnapshot {
    pub fn from_inspect(inspect: ContainerInspect) -> Self {
        let identity = ContainerIdentity::new(&inspect.name, &inspect.id);
        let image = inspect
            .config_str("Image")
            .and_then(|reference| ImageRef::parse(reference).ok())
            .filter(|image| !image.repository.starts_with("sha256"));
        let state = ContainerState::parse(&inspect.state.status);
        let health = inspect
            .state
            .health
            .as_ref()
            .map(|h| HealthStatus::parse(&h.status))
            .unwrap_or(HealthStatus::None);
        let has_healthcheck =
            inspect.state.health.is_some() || inspect.has_configured_healthcheck();
        let network_mode = NetworkMode::parse(
            inspect
                .host_config
                .get("NetworkMode")
                .and_then(|v| v.as_str())
                .unwrap_or_default(),
        );
        let group = inspect
            .label(COMPOSE_PROJECT_LABEL)
            .or_else(|| inspect.label(STACK_NAMESPACE_LABEL))
            .map(str::to_string);

        Self {
            identity,
            image,
            image_id: inspect.image.clone(),
            state,
            health,
            has_healthcheck,
            network_mode,
            group,
            exit_code: inspect.state.exit_code,
            inspect,
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Whether this container shares the network namespace of another container
    pub fn uses_network_mode(&self) -> bool {
        self.network_mode.is_shared_namespace()
    }
}
