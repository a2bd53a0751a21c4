//! Container runtime gateway: single-container operations against one endpoint of a
//! container-management gateway.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::GatewayError;

pub mod http;
pub mod logs;
pub mod types;

pub use http::{HttpGateway, HttpGatewayDirectory};
pub use types::*;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Operations the upgrade orchestrator and update scanner need from a container host.
///
/// Every method reports "not found", "not modified" and "conflict" through the matching
/// [`GatewayError`] variant; verifying what a conflict actually means is the caller's job.
#[async_trait]
pub trait ContainerGateway: Send + Sync {
    async fn inspect(&self, id: &str) -> GatewayResult<ContainerInspect>;
    async fn inspect_image(&self, id: &str) -> GatewayResult<ImageInspect>;
    async fn stop(&self, id: &str) -> GatewayResult<()>;
    async fn start(&self, id: &str) -> GatewayResult<()>;
    async fn restart(&self, id: &str) -> GatewayResult<()>;
    async fn remove(&self, id: &str) -> GatewayResult<()>;
    async fn pull(&self, repository: &str, tag: &str) -> GatewayResult<()>;
    /// Creates a container and returns its runtime ID
    async fn create(&self, config: &CreateContainerRequest, name: &str) -> GatewayResult<String>;
    async fn logs(&self, id: &str, tail_lines: usize) -> GatewayResult<String>;
    async fn list_all(&self) -> GatewayResult<Vec<ContainerSummary>>;
}

/// A gateway instance plus one of its managed endpoints (container hosts).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointRef {
    pub gateway: String,
    pub endpoint: u64,
}

impl EndpointRef {
    pub fn new(gateway: impl Into<String>, endpoint: u64) -> Self {
        Self {
            gateway: gateway.into(),
            endpoint,
        }
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.gateway, self.endpoint)
    }
}

/// Resolves gateway/endpoint references to connected gateways
pub trait GatewayDirectory: Send + Sync {
    fn resolve(&self, endpoint: &EndpointRef) -> GatewayResult<Arc<dyn ContainerGateway>>;
}

/// Directory over gateways registered up front
#[derive(Default, Clone)]
pub struct StaticDirectory {
    gateways: HashMap<EndpointRef, Arc<dyn ContainerGateway>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gateway(
        mut self,
        endpoint: EndpointRef,
        gateway: Arc<dyn ContainerGateway>,
    ) -> Self {
        self.gateways.insert(endpoint, gateway);
        self
    }
}

impl GatewayDirectory for StaticDirectory {
    fn resolve(&self, endpoint: &EndpointRef) -> GatewayResult<Arc<dyn ContainerGateway>> {
        self.gateways
            .get(endpoint)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownEndpoint {
                reference: endpoint.to_string(),
            })
    }
}
