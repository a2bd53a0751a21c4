use serde_json::Value;
use std::collections::HashMap;

use crate::gateway::{CreateContainerRequest, EndpointConfig, EndpointSettings, NetworkingConfig};
use crate::types::{ContainerIdentity, ContainerSnapshot, NetworkMode};

/// Host config fields assigned by the runtime or invalid on create
const RUNTIME_HOST_FIELDS: &[&str] = &["ContainerIDFile", "AutoRemove"];

/// Fields the runtime rejects when the network namespace belongs to another container
const SHARED_NAMESPACE_HOST_FIELDS: &[&str] = &["PortBindings", "PublishAllPorts"];
const SHARED_NAMESPACE_CONFIG_FIELDS: &[&str] =
    &["ExposedPorts", "Hostname", "Domainname", "MacAddress"];

/// Derive the create request for a replacement of `snapshot` running `image`.
///
/// `network_mode` overrides the snapshot's own mode (used when a dependent's `container:`
/// reference has to follow its provider to a new ID).
pub fn build_create_request(
    snapshot: &ContainerSnapshot,
    image: &str,
    network_mode: Option<&str>,
) -> CreateContainerRequest {
    let mut config = snapshot.inspect.config.clone();
    let mut host_config = snapshot.inspect.host_config.clone();

    config.insert("Image".to_string(), Value::String(image.to_string()));
    for field in RUNTIME_HOST_FIELDS {
        host_config.remove(*field);
    }
    if let Some(mode) = network_mode {
        host_config.insert("NetworkMode".to_string(), Value::String(mode.to_string()));
    }

    let mode = network_mode
        .map(NetworkMode::parse)
        .unwrap_or_else(|| snapshot.network_mode.clone());

    let networking_config = if mode.is_shared_namespace() {
        for field in SHARED_NAMESPACE_HOST_FIELDS {
            host_config.remove(*field);
        }
        for field in SHARED_NAMESPACE_CONFIG_FIELDS {
            config.remove(*field);
        }
        None
    } else {
        // The runtime's default hostname is the short ID; let the replacement get its own.
        let short_id = snapshot.identity.short_id.as_str();
        if config.get("Hostname").and_then(Value::as_str) == Some(short_id) {
            config.remove("Hostname");
        }
        endpoints_config(&snapshot.identity, &snapshot.inspect.network_settings.networks)
    };

    CreateContainerRequest {
        config,
        host_config,
        networking_config,
    }
}

/// Per-network endpoint settings worth carrying over; `None` when nothing survives
fn endpoints_config(
    identity: &ContainerIdentity,
    networks: &HashMap<String, EndpointSettings>,
) -> Option<NetworkingConfig> {
    let endpoints_config: HashMap<String, EndpointConfig> = networks
        .iter()
        .map(|(network, settings)| (network.clone(), endpoint_config(identity, settings)))
        .filter(|(_, endpoint)| !endpoint.is_empty())
        .collect();

    if endpoints_config.is_empty() {
        None
    } else {
        Some(NetworkingConfig { endpoints_config })
    }
}

fn endpoint_config(identity: &ContainerIdentity, settings: &EndpointSettings) -> EndpointConfig {
    let ipam_config = settings
        .ipam_config
        .clone()
        .filter(|ipam| !ipam.is_empty());
    let links = settings.links.clone().filter(|links| !links.is_empty());
    // The runtime adds the short ID itself; carrying it over would pin the old ID.
    let aliases = settings
        .aliases
        .as_ref()
        .map(|aliases| {
            aliases
                .iter()
                .filter(|alias| **alias != identity.short_id && **alias != identity.id)
                .cloned()
                .collect::<Vec<_>>()
        })
        .filter(|aliases| !aliases.is_empty());

    EndpointConfig {
        ipam_config,
        links,
        aliases,
    }
}

/// New network mode for a dependent whose `container:` reference points at `old` by ID.
///
/// Name references (`service:api`, `container:api`) survive a recreate unchanged.
pub fn rewrite_network_mode(
    mode: &NetworkMode,
    old: &ContainerIdentity,
    new_id: &str,
) -> Option<String> {
    let NetworkMode::Container(reference) = mode else {
        return None;
    };
    let by_id = *reference == old.id
        || *reference == old.short_id
        || (reference.len() > old.short_id.len() && old.id.starts_with(reference.as_str()));
    by_id.then(|| format!("container:{}", new_id))
}
