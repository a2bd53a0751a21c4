//! Drydock - container update detection and dependency-aware upgrades
//!
//! This crate watches containers behind container-management gateways, decides which ones run
//! stale images, and replaces them in place while keeping containers that share their network
//! namespace wired up.

pub mod config;
pub mod error;
pub mod gateway;
pub mod monitoring;
pub mod network;
pub mod orchestrator;
pub mod registry;
pub mod types;
pub mod updates;

pub use config::*;
pub use error::{DrydockError, Result};

pub use types::{ContainerIdentity, ContainerSnapshot, ImageRef};

// Re-export anyhow for compatibility
pub use anyhow;

use std::sync::Arc;

use gateway::{EndpointRef, GatewayDirectory, HttpGatewayDirectory};
use network::DependencyGraph;
use orchestrator::{Orchestrator, ReadinessPolicy, UpgradeOutcome, UpgradeRequest};
use registry::{HttpRegistryClient, RegistryClient};
use updates::{ContainerUpdate, UpdateScanner};

/// Re-exports for easier API usage
pub mod api {
    pub use crate::gateway::{ContainerGateway, EndpointRef, GatewayDirectory, StaticDirectory};
    pub use crate::network::{DependencyGraph, DependencyReason, build_graph};
    pub use crate::orchestrator::{
        Clock, DependentReport, Orchestrator, ReadinessPolicy, UpgradeOutcome, UpgradeRequest,
        UpgradeStage,
    };
    pub use crate::registry::{LatestImage, RegistryClient, RegistryProvider};
    pub use crate::updates::{ContainerUpdate, UpdateInfo, UpdateScanner, evaluate};
    pub use crate::{ContainerIdentity, ContainerSnapshot, Drydock, DrydockConfig, ImageRef};
}

/// Core Drydock API wired from a configuration file
pub struct Drydock {
    config: DrydockConfig,
    directory: Arc<dyn GatewayDirectory>,
    scanner: UpdateScanner,
    orchestrator: Orchestrator,
}

impl Drydock {
    /// Build HTTP gateways, the registry client and the orchestrator from `config`
    pub fn new(config: DrydockConfig) -> Result<Self> {
        let directory: Arc<dyn GatewayDirectory> =
            Arc::new(HttpGatewayDirectory::from_config(&config.gateways)?);
        let registry: Arc<dyn RegistryClient> =
            Arc::new(HttpRegistryClient::new(&config.registry)?);
        let policy = ReadinessPolicy::from_settings(&config.readiness)?;

        Ok(Self::with_parts(config, directory, registry, policy))
    }

    /// Assemble from injected collaborators
    pub fn with_parts(
        config: DrydockConfig,
        directory: Arc<dyn GatewayDirectory>,
        registry: Arc<dyn RegistryClient>,
        policy: ReadinessPolicy,
    ) -> Self {
        let scanner = UpdateScanner::new(registry.clone(), config.registry.scan_concurrency);
        let orchestrator =
            Orchestrator::new(directory.clone(), registry, config.upgrade.clone(), policy);
        Self {
            config,
            directory,
            scanner,
            orchestrator,
        }
    }

    /// Update candidates on one endpoint
    pub async fn check_updates(&self, endpoint: &EndpointRef) -> Result<Vec<ContainerUpdate>> {
        let gateway = self.directory.resolve(endpoint)?;
        self.scanner.scan(gateway.as_ref()).await
    }

    /// Upgrade one container
    pub async fn upgrade(&self, request: &UpgradeRequest) -> Result<UpgradeOutcome> {
        Ok(self.orchestrator.upgrade(request).await?)
    }

    /// Network dependency graph of one endpoint
    pub async fn dependency_graph(&self, endpoint: &EndpointRef) -> Result<DependencyGraph> {
        let gateway = self.directory.resolve(endpoint)?;
        let snapshots = network::discover_snapshots(
            gateway.as_ref(),
            self.config.upgrade.discovery_concurrency,
            self.config.upgrade.discovery_parallel_threshold,
        )
        .await?;
        Ok(network::build_graph(&snapshots))
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &DrydockConfig {
        &self.config
    }
}
