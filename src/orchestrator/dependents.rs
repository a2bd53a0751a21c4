use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::lifecycle::{remove_container, restart_container, start_container, stop_container};
use super::recreate::{build_create_request, rewrite_network_mode};
use crate::config::UpgradeSettings;
use crate::error::GatewayError;
use crate::gateway::{ContainerGateway, GatewayResult};
use crate::network::{DependencyReason, Dependent};
use crate::types::{ContainerIdentity, ContainerSnapshot, ContainerState, HealthStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentAction {
    Recreated,
    Restarted,
    Started,
    Failed,
}

impl fmt::Display for DependentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DependentAction::Recreated => "recreated",
            DependentAction::Restarted => "restarted",
            DependentAction::Started => "started",
            DependentAction::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What happened to one dependent during repair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependentReport {
    pub name: String,
    pub reason: DependencyReason,
    pub action: DependentAction,
    /// Runtime ID after a recreate
    pub new_id: Option<String>,
    pub error: Option<String>,
}

impl DependentReport {
    fn failed(name: &str, reason: DependencyReason, error: GatewayError) -> Self {
        Self {
            name: name.to_string(),
            reason,
            action: DependentAction::Failed,
            new_id: None,
            error: Some(error.to_string()),
        }
    }
}

/// Quiesces and rebuilds the containers around a replaced provider.
///
/// Every failure here is reported per dependent and never aborts the run.
pub struct DependentRepair<'a> {
    gateway: &'a dyn ContainerGateway,
    clock: &'a dyn Clock,
    settings: &'a UpgradeSettings,
}

impl<'a> DependentRepair<'a> {
    pub fn new(
        gateway: &'a dyn ContainerGateway,
        clock: &'a dyn Clock,
        settings: &'a UpgradeSettings,
    ) -> Self {
        Self {
            gateway,
            clock,
            settings,
        }
    }

    /// Stop the running network dependents, then let the runtime settle.
    /// Returns how many were stopped.
    pub async fn stop_network_dependents(&self, dependents: &[ContainerSnapshot]) -> usize {
        let mut stopped = 0;
        for dependent in dependents.iter().filter(|d| d.is_running()) {
            info!("⏸️  Stopping dependent {}", dependent.name());
            match stop_container(self.gateway, &dependent.identity.id).await {
                Ok(()) => stopped += 1,
                Err(e) => warn!("Failed to stop dependent {}: {}", dependent.name(), e),
            }
        }
        if stopped > 0 {
            self.clock.sleep(self.settings.dependent_settle()).await;
        }
        stopped
    }

    /// Give the replaced provider a bounded chance to report healthy before touching dependents
    pub async fn await_provider(&self, provider_id: &str, has_healthcheck: bool) {
        if !has_healthcheck {
            self.clock
                .sleep(self.settings.repair_delay_without_healthcheck())
                .await;
            return;
        }

        let started = self.clock.now();
        while self.clock.now().duration_since(started) < self.settings.repair_health_wait() {
            match self.gateway.inspect(provider_id).await {
                Ok(inspect)
                    if inspect
                        .state
                        .health
                        .as_ref()
                        .is_some_and(|h| HealthStatus::parse(&h.status) == HealthStatus::Healthy) =>
                {
                    debug!("Provider {} healthy, repairing dependents", provider_id);
                    return;
                }
                Ok(_) => {}
                Err(e) => debug!("Provider health poll failed: {}", e),
            }
            self.clock.sleep(self.settings.repair_poll_interval()).await;
        }
        warn!(
            "Provider {} not healthy after {:?}, repairing dependents anyway",
            provider_id,
            self.settings.repair_health_wait()
        );
    }

    /// Recreate every network dependent, then revive same-stack peers
    pub async fn repair(
        &self,
        provider: &ContainerIdentity,
        new_provider_id: &str,
        network_dependents: &[ContainerSnapshot],
        stack_peers: &[Dependent],
    ) -> Vec<DependentReport> {
        let mut reports = Vec::with_capacity(network_dependents.len() + stack_peers.len());

        for dependent in network_dependents {
            let report = match self.recreate(dependent, provider, new_provider_id).await {
                Ok(new_id) => {
                    info!("🔗 Recreated dependent {} as {}", dependent.name(), short(&new_id));
                    DependentReport {
                        name: dependent.name().to_string(),
                        reason: DependencyReason::NetworkMode,
                        action: DependentAction::Recreated,
                        new_id: Some(new_id),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Failed to recreate dependent {}: {}", dependent.name(), e);
                    DependentReport::failed(dependent.name(), DependencyReason::NetworkMode, e)
                }
            };
            reports.push(report);
        }

        for peer in stack_peers {
            let report = match self.revive_peer(&peer.identity).await {
                Ok(action) => {
                    info!("🔄 Stack peer {} {}", peer.identity.name, action);
                    DependentReport {
                        name: peer.identity.name.clone(),
                        reason: peer.reason,
                        action,
                        new_id: None,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Failed to revive stack peer {}: {}", peer.identity.name, e);
                    DependentReport::failed(&peer.identity.name, peer.reason, e)
                }
            };
            reports.push(report);
        }

        reports
    }

    /// Full stop/remove/create/start from the dependent's previously inspected configuration
    async fn recreate(
        &self,
        dependent: &ContainerSnapshot,
        provider: &ContainerIdentity,
        new_provider_id: &str,
    ) -> GatewayResult<String> {
        let id = &dependent.identity.id;
        match self.gateway.inspect(id).await {
            Ok(current) => {
                if !ContainerState::parse(&current.state.status).is_stopped() {
                    stop_container(self.gateway, id).await?;
                }
                remove_container(self.gateway, id).await?;
            }
            Err(GatewayError::NotFound { .. }) => {
                debug!("Dependent {} already removed", dependent.name());
            }
            Err(e) => return Err(e),
        }

        let image = dependent
            .inspect
            .config_str("Image")
            .unwrap_or(&dependent.image_id)
            .to_string();
        let network_mode = rewrite_network_mode(&dependent.network_mode, provider, new_provider_id);
        let request = build_create_request(dependent, &image, network_mode.as_deref());
        let new_id = self.gateway.create(&request, dependent.name()).await?;
        start_container(self.gateway, &new_id).await?;
        Ok(new_id)
    }

    /// Restart a running peer; start a stopped one, cycling stop/start if a plain start fails
    async fn revive_peer(&self, peer: &ContainerIdentity) -> GatewayResult<DependentAction> {
        let current = self.gateway.inspect(&peer.id).await?;
        if ContainerState::parse(&current.state.status).is_running() {
            restart_container(self.gateway, &peer.id).await?;
            return Ok(DependentAction::Restarted);
        }

        if let Err(e) = start_container(self.gateway, &peer.id).await {
            debug!("Plain start of {} failed ({}), cycling", peer.name, e);
            stop_container(self.gateway, &peer.id).await?;
            start_container(self.gateway, &peer.id).await?;
        }
        Ok(DependentAction::Started)
    }
}

fn short(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
