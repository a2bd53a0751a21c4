use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::logs::decode_log_stream;
use super::*;
use crate::config::GatewayConfig;
use crate::error::{ConfigError, GatewayError};

const USER_AGENT: &str = concat!("drydock/", env!("CARGO_PKG_VERSION"));

/// Docker Engine API reached through a management gateway's per-endpoint proxy
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    endpoint: u64,
}

impl HttpGateway {
    pub fn new(client: Client, base_url: &str, api_key: Option<String>, endpoint: u64) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            endpoint,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/api/endpoints/{}/docker{}",
            self.base_url, self.endpoint, path
        )
    }

    async fn send(&self, request: RequestBuilder) -> GatewayResult<Response> {
        let request = match &self.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        };
        request.send().await.map_err(transport_error)
    }

    /// Run a state-changing container action (`stop`, `start`, `restart`)
    async fn container_action(&self, id: &str, action: &str) -> GatewayResult<()> {
        debug!("🔧 {} {}", action, id);
        let response = self
            .send(
                self.client
                    .post(self.url(&format!("/containers/{}/{}", id, action))),
            )
            .await?;
        expect_success(response, id).await.map(|_| ())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, resource: &str) -> GatewayResult<T> {
        let response = self.send(self.client.get(self.url(path))).await?;
        let response = expect_success(response, resource).await?;
        response.json().await.map_err(transport_error)
    }
}

#[async_trait]
impl ContainerGateway for HttpGateway {
    async fn inspect(&self, id: &str) -> GatewayResult<ContainerInspect> {
        self.get_json(&format!("/containers/{}/json", id), id).await
    }

    async fn inspect_image(&self, id: &str) -> GatewayResult<ImageInspect> {
        self.get_json(&format!("/images/{}/json", id), id).await
    }

    async fn stop(&self, id: &str) -> GatewayResult<()> {
        self.container_action(id, "stop").await
    }

    async fn start(&self, id: &str) -> GatewayResult<()> {
        self.container_action(id, "start").await
    }

    async fn restart(&self, id: &str) -> GatewayResult<()> {
        self.container_action(id, "restart").await
    }

    async fn remove(&self, id: &str) -> GatewayResult<()> {
        let request = self
            .client
            .delete(self.url(&format!("/containers/{}", id)))
            .query(&[("force", "true"), ("v", "false")]);
        let response = self.send(request).await?;
        expect_success(response, id).await.map(|_| ())
    }

    async fn pull(&self, repository: &str, tag: &str) -> GatewayResult<()> {
        let request = self
            .client
            .post(self.url("/images/create"))
            .query(&[("fromImage", repository), ("tag", tag)]);
        let response = self.send(request).await?;
        let resource = format!("{}:{}", repository, tag);
        let response = expect_success(response, &resource).await?;

        // Progress is streamed as JSON lines; failures arrive as an `error` line with 200 OK.
        let body = response.text().await.map_err(transport_error)?;
        if let Some(message) = pull_stream_error(&body) {
            return Err(GatewayError::Api {
                status: 500,
                message,
            });
        }
        Ok(())
    }

    async fn create(&self, config: &CreateContainerRequest, name: &str) -> GatewayResult<String> {
        let request = self
            .client
            .post(self.url("/containers/create"))
            .query(&[("name", name)])
            .json(config);
        let response = self.send(request).await?;
        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let message = error_message(response).await;
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let response = expect_success(response, name).await?;
        let created: CreateContainerResponse = response.json().await.map_err(transport_error)?;
        if let Some(warnings) = created.warnings.filter(|w| !w.is_empty()) {
            warn!("Gateway warnings while creating {}: {}", name, warnings.join("; "));
        }
        Ok(created.id)
    }

    async fn logs(&self, id: &str, tail_lines: usize) -> GatewayResult<String> {
        let tail = tail_lines.to_string();
        let request = self
            .client
            .get(self.url(&format!("/containers/{}/logs", id)))
            .query(&[("stdout", "1"), ("stderr", "1"), ("tail", tail.as_str())]);
        let response = self.send(request).await?;
        let response = expect_success(response, id).await?;
        let body = response.bytes().await.map_err(transport_error)?;
        Ok(decode_log_stream(&body))
    }

    async fn list_all(&self) -> GatewayResult<Vec<ContainerSummary>> {
        self.get_json("/containers/json?all=1", "containers").await
    }
}

/// Builds [`HttpGateway`]s for the gateways named in the configuration
pub struct HttpGatewayDirectory {
    gateways: HashMap<String, (Client, String, Option<String>)>,
}

impl HttpGatewayDirectory {
    pub fn from_config(configs: &HashMap<String, GatewayConfig>) -> Result<Self, ConfigError> {
        let mut gateways = HashMap::new();
        for (name, config) in configs {
            let client = Client::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_secs(config.timeout_seconds))
                .danger_accept_invalid_certs(config.insecure)
                .build()
                .map_err(|e| ConfigError::InvalidFormat {
                    reason: format!("gateway {}: {}", name, e),
                })?;
            gateways.insert(
                name.clone(),
                (client, config.url.clone(), config.resolve_api_key()),
            );
        }
        Ok(Self { gateways })
    }
}

impl GatewayDirectory for HttpGatewayDirectory {
    fn resolve(&self, endpoint: &EndpointRef) -> GatewayResult<Arc<dyn ContainerGateway>> {
        let (client, url, api_key) =
            self.gateways
                .get(&endpoint.gateway)
                .ok_or_else(|| GatewayError::UnknownEndpoint {
                    reference: endpoint.to_string(),
                })?;
        Ok(Arc::new(HttpGateway::new(
            client.clone(),
            url,
            api_key.clone(),
            endpoint.endpoint,
        )))
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Transport {
        message: err.to_string(),
    }
}

async fn expect_success(response: Response, resource: &str) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = error_message(response).await;
    Err(classify_status(status.as_u16(), message, resource))
}

/// Map a non-success status to the gateway error taxonomy
pub(crate) fn classify_status(status: u16, message: String, resource: &str) -> GatewayError {
    match status {
        304 => GatewayError::NotModified,
        404 => GatewayError::NotFound {
            resource: resource.to_string(),
        },
        409 => GatewayError::Conflict { message },
        // Some gateways wrap "is already started/stopped" in a generic server error.
        500..=599 if message.to_ascii_lowercase().contains("already") => {
            GatewayError::Conflict { message }
        }
        _ => GatewayError::Api { status, message },
    }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    extract_message(&text).unwrap_or_else(|| {
        if text.trim().is_empty() {
            status.to_string()
        } else {
            text.trim().to_string()
        }
    })
}

fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "details", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn pull_stream_error(body: &str) -> Option<String> {
    body.lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find_map(|event| {
            event
                .get("error")
                .and_then(|e| e.as_str())
                .map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(304, "" => GatewayError::NotModified ; "not modified")]
    #[test_case(404, "no such container" => GatewayError::NotFound { resource: "web".into() } ; "not found")]
    #[test_case(409, "is already in progress" => GatewayError::Conflict { message: "is already in progress".into() } ; "conflict")]
    #[test_case(500, "container already stopped" => GatewayError::Conflict { message: "container already stopped".into() } ; "wrapped already")]
    #[test_case(500, "boom" => GatewayError::Api { status: 500, message: "boom".into() } ; "server error")]
    fn test_classify_status(status: u16, message: &str) -> GatewayError {
        classify_status(status, message.to_string(), "web")
    }

    #[test]
    fn test_extract_message_prefers_message_field() {
        let body = r#"{"message":"Conflict. The container name is already in use","details":"x"}"#;
        assert_eq!(
            extract_message(body).as_deref(),
            Some("Conflict. The container name is already in use")
        );
        assert_eq!(extract_message("not json"), None);
    }

    #[test]
    fn test_pull_stream_error_detected() {
        let body = concat!(
            "{\"status\":\"Pulling from library/nginx\"}\n",
            "{\"errorDetail\":{\"message\":\"manifest unknown\"},\"error\":\"manifest unknown\"}\n"
        );
        assert_eq!(pull_stream_error(body).as_deref(), Some("manifest unknown"));
        assert_eq!(pull_stream_error("{\"status\":\"Done\"}"), None);
    }

    #[test]
    fn test_endpoint_url() {
        let gateway = HttpGateway::new(Client::new(), "https://gw.local:9443/", None, 3);
        assert_eq!(
            gateway.url("/containers/json"),
            "https://gw.local:9443/api/endpoints/3/docker/containers/json"
        );
    }
}
