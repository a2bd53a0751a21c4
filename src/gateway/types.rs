use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Docker Engine `GET /containers/{id}/json` response, trimmed to what upgrades need.
///
/// `Config` and `HostConfig` are kept as raw JSON maps so that a recreated container
/// carries every field the old one had, including ones this crate does not model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Image ID the container runs
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub state: ContainerStateInfo,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub host_config: Map<String, Value>,
    #[serde(default)]
    pub network_settings: NetworkSettings,
    #[serde(default)]
    pub restart_count: i64,
}

impl ContainerInspect {
    /// Minimal running container, for gateways that synthesize inspect data (fakes, replays)
    pub fn new(name: &str, id: &str, image: &str) -> Self {
        let mut inspect = Self {
            id: id.to_string(),
            name: format!("/{}", name.trim_start_matches('/')),
            image: format!("sha256:{}", id),
            ..Self::default()
        };
        inspect
            .config
            .insert("Image".to_string(), Value::String(image.to_string()));
        inspect
            .host_config
            .insert("NetworkMode".to_string(), Value::String("bridge".to_string()));
        inspect.set_state("running");
        inspect
    }

    pub fn with_network_mode(mut self, mode: &str) -> Self {
        self.host_config
            .insert("NetworkMode".to_string(), Value::String(mode.to_string()));
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        let labels = self
            .config
            .entry("Labels".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(labels) = labels {
            labels.insert(key.to_string(), Value::String(value.to_string()));
        }
        self
    }

    pub fn with_healthcheck(mut self, test: &[&str]) -> Self {
        self.config.insert(
            "Healthcheck".to_string(),
            serde_json::json!({ "Test": test }),
        );
        self
    }

    pub fn with_network(mut self, network: &str, endpoint: EndpointSettings) -> Self {
        self.network_settings
            .networks
            .insert(network.to_string(), endpoint);
        self
    }

    pub fn set_state(&mut self, status: &str) {
        self.state.status = status.to_string();
        self.state.running = status == "running";
    }

    pub fn set_health(&mut self, status: Option<&str>) {
        self.state.health = status.map(|s| HealthInfo {
            status: s.to_string(),
            failing_streak: 0,
        });
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.config
            .get("Labels")
            .and_then(Value::as_object)
            .and_then(|labels| labels.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// A health check is configured unless absent or explicitly disabled with `NONE`
    pub fn has_configured_healthcheck(&self) -> bool {
        let Some(test) = self
            .config
            .get("Healthcheck")
            .and_then(|h| h.get("Test"))
            .and_then(Value::as_array)
        else {
            return false;
        };
        match test.first().and_then(Value::as_str) {
            None | Some("NONE") => false,
            Some(_) => true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerStateInfo {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub exit_code: i64,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub health: Option<HealthInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthInfo {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub failing_streak: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    #[serde(default)]
    pub networks: HashMap<String, EndpointSettings>,
}

/// Per-network attachment as reported by inspect
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointSettings {
    #[serde(rename = "IPAMConfig", default)]
    pub ipam_config: Option<IpamConfig>,
    #[serde(rename = "Links", default)]
    pub links: Option<Vec<String>>,
    #[serde(rename = "Aliases", default)]
    pub aliases: Option<Vec<String>>,
    #[serde(rename = "NetworkID", default)]
    pub network_id: String,
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
    #[serde(rename = "MacAddress", default)]
    pub mac_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamConfig {
    #[serde(rename = "IPv4Address", default, skip_serializing_if = "Option::is_none")]
    pub ipv4_address: Option<String>,
    #[serde(rename = "IPv6Address", default, skip_serializing_if = "Option::is_none")]
    pub ipv6_address: Option<String>,
    #[serde(rename = "LinkLocalIPs", default, skip_serializing_if = "Option::is_none")]
    pub link_local_ips: Option<Vec<String>>,
}

impl IpamConfig {
    pub fn is_empty(&self) -> bool {
        self.ipv4_address.as_deref().is_none_or(str::is_empty)
            && self.ipv6_address.as_deref().is_none_or(str::is_empty)
            && self.link_local_ips.as_ref().is_none_or(Vec::is_empty)
    }
}

/// One row of `GET /containers/json?all=1`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

impl ContainerSummary {
    pub fn primary_name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.trim_start_matches('/'))
            .unwrap_or(&self.id)
    }
}

/// `GET /images/{id}/json`, only the fields update detection needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageInspect {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Vec<String>,
    #[serde(default)]
    pub repo_digests: Vec<String>,
    #[serde(default)]
    pub created: Option<String>,
}

/// Body of `POST /containers/create`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateContainerRequest {
    #[serde(flatten)]
    pub config: Map<String, Value>,
    #[serde(rename = "HostConfig")]
    pub host_config: Map<String, Value>,
    #[serde(rename = "NetworkingConfig", skip_serializing_if = "Option::is_none")]
    pub networking_config: Option<NetworkingConfig>,
}

impl CreateContainerRequest {
    pub fn image(&self) -> Option<&str> {
        self.config.get("Image").and_then(Value::as_str)
    }

    pub fn network_mode(&self) -> Option<&str> {
        self.host_config.get("NetworkMode").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkingConfig {
    #[serde(rename = "EndpointsConfig")]
    pub endpoints_config: HashMap<String, EndpointConfig>,
}

/// Endpoint settings accepted on create
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(rename = "IPAMConfig", skip_serializing_if = "Option::is_none")]
    pub ipam_config: Option<IpamConfig>,
    #[serde(rename = "Links", skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[serde(rename = "Aliases", skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
}

impl EndpointConfig {
    pub fn is_empty(&self) -> bool {
        self.ipam_config.is_none() && self.links.is_none() && self.aliases.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateContainerResponse {
    pub id: String,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_parses_docker_json() {
        let raw = serde_json::json!({
            "Id": "4f9c0a7b2d1e4f9c0a7b2d1e",
            "Name": "/app",
            "Image": "sha256:1111",
            "RestartCount": 2,
            "State": {
                "Status": "running",
                "Running": true,
                "ExitCode": 0,
                "Health": { "Status": "healthy", "FailingStreak": 0 }
            },
            "Config": {
                "Image": "ghcr.io/acme/app:1.2",
                "Labels": { "com.docker.compose.project": "acme" },
                "Healthcheck": { "Test": ["CMD", "true"] }
            },
            "HostConfig": { "NetworkMode": "container:0a1b2c3d4e5f" },
            "NetworkSettings": {
                "Networks": {
                    "acme_default": {
                        "IPAMConfig": null,
                        "Links": null,
                        "Aliases": ["app", "4f9c0a7b2d1e"],
                        "NetworkID": "n1",
                        "IPAddress": "172.18.0.3"
                    }
                }
            }
        });

        let inspect: ContainerInspect = serde_json::from_value(raw).unwrap();
        assert_eq!(inspect.name, "/app");
        assert_eq!(inspect.restart_count, 2);
        assert_eq!(inspect.label("com.docker.compose.project"), Some("acme"));
        assert!(inspect.has_configured_healthcheck());
        let net = &inspect.network_settings.networks["acme_default"];
        assert_eq!(net.aliases.as_ref().map(Vec::len), Some(2));
        assert!(net.ipam_config.is_none());
    }

    #[test]
    fn test_disabled_healthcheck_is_not_configured() {
        let mut inspect = ContainerInspect::default();
        inspect.config.insert(
            "Healthcheck".to_string(),
            serde_json::json!({ "Test": ["NONE"] }),
        );
        assert!(!inspect.has_configured_healthcheck());
    }

    #[test]
    fn test_create_request_flattens_config() {
        let mut request = CreateContainerRequest::default();
        request
            .config
            .insert("Image".to_string(), Value::String("nginx:1.25".to_string()));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["Image"], "nginx:1.25");
        assert!(json.get("NetworkingConfig").is_none());
        assert!(json["HostConfig"].is_object());
    }
}
