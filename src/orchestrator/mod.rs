//! Upgrade orchestrator: replaces one running container with a freshly pulled one and
//! rewires everything that shares its network namespace.

use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::config::UpgradeSettings;
use crate::error::{GatewayError, RollbackOutcome, UpgradeError};
use crate::gateway::{ContainerGateway, EndpointRef, GatewayDirectory};
use crate::monitoring::upgrade_span;
use crate::network::{
    Dependent, IdentityIndex, build_graph_indexed, discover_snapshots, stack_peers,
};
use crate::registry::RegistryClient;
use crate::types::{ContainerIdentity, ContainerSnapshot, ImageRef};

pub mod clock;
pub mod dependents;
pub mod lifecycle;
pub mod locks;
pub mod readiness;
pub mod recreate;

pub use clock::{Clock, TokioClock};
pub use dependents::{DependentAction, DependentReport, DependentRepair};
pub use locks::{UpgradeGuard, UpgradeLocks};
pub use readiness::{DatabasePatterns, ReadinessPolicy, ReadinessProber, ReadyReport};
pub use recreate::{build_create_request, rewrite_network_mode};

/// Steps of one upgrade run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStage {
    Idle,
    StopDependents,
    StopTarget,
    AwaitStopped,
    PullImage,
    RemoveOld,
    CreateNew,
    StartNew,
    AwaitReady,
    RepairDependents,
    Done,
    Failed,
}

impl fmt::Display for UpgradeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpgradeStage::Idle => "idle",
            UpgradeStage::StopDependents => "stop dependents",
            UpgradeStage::StopTarget => "stop target",
            UpgradeStage::AwaitStopped => "await stopped",
            UpgradeStage::PullImage => "pull image",
            UpgradeStage::RemoveOld => "remove old container",
            UpgradeStage::CreateNew => "create new container",
            UpgradeStage::StartNew => "start new container",
            UpgradeStage::AwaitReady => "await ready",
            UpgradeStage::RepairDependents => "repair dependents",
            UpgradeStage::Done => "done",
            UpgradeStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One upgrade: which container on which gateway endpoint, and optionally which image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRequest {
    pub gateway: String,
    pub endpoint: u64,
    /// Name, full ID or short ID
    pub container: String,
    /// Target image; the container's own repository and tag when absent or without a tag
    #[serde(default)]
    pub image: Option<String>,
}

impl UpgradeRequest {
    pub fn new(gateway: impl Into<String>, endpoint: u64, container: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into(),
            endpoint,
            container: container.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn endpoint_ref(&self) -> EndpointRef {
        EndpointRef::new(self.gateway.clone(), self.endpoint)
    }
}

/// Result of a successful run; produced once and never mutated
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeOutcome {
    pub run_id: Uuid,
    pub success: bool,
    pub old_container: ContainerIdentity,
    pub new_container: ContainerIdentity,
    pub old_image: String,
    pub new_image: String,
    pub dependents: Vec<DependentReport>,
}

/// Containers one run touches, from a fresh discovery pass
struct UpgradePlan {
    target: ContainerSnapshot,
    network_dependents: Vec<ContainerSnapshot>,
    stack_peers: Vec<Dependent>,
}

impl UpgradePlan {
    fn container_names(&self) -> Vec<String> {
        std::iter::once(self.target.name())
            .chain(self.network_dependents.iter().map(|d| d.name()))
            .chain(self.stack_peers.iter().map(|p| p.identity.name.as_str()))
            .map(str::to_string)
            .collect()
    }
}

pub struct Orchestrator {
    directory: Arc<dyn GatewayDirectory>,
    registry: Arc<dyn RegistryClient>,
    settings: UpgradeSettings,
    policy: ReadinessPolicy,
    clock: Arc<dyn Clock>,
    locks: UpgradeLocks,
}

impl Orchestrator {
    pub fn new(
        directory: Arc<dyn GatewayDirectory>,
        registry: Arc<dyn RegistryClient>,
        settings: UpgradeSettings,
        policy: ReadinessPolicy,
    ) -> Self {
        Self {
            directory,
            registry,
            settings,
            policy,
            clock: Arc::new(TokioClock),
            locks: UpgradeLocks::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one upgrade to completion or failure
    pub async fn upgrade(&self, request: &UpgradeRequest) -> Result<UpgradeOutcome, UpgradeError> {
        let run_id = Uuid::new_v4();
        let endpoint = request.endpoint_ref();
        let span = upgrade_span(&run_id, &endpoint, &request.container);

        async {
            let result = self.run(run_id, &endpoint, request).await;
            if let Err(e) = &result {
                warn!(stage = %UpgradeStage::Failed, "❌ Upgrade failed: {}", e);
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Independent runs with bounded concurrency; runs sharing a container serialize on its lock.
    /// Results keep the request order.
    pub async fn upgrade_many(
        &self,
        requests: &[UpgradeRequest],
    ) -> Vec<Result<UpgradeOutcome, UpgradeError>> {
        info!("📦 Upgrading {} containers", requests.len());
        stream::iter(requests)
            .map(|request| self.upgrade(request))
            .buffered(self.settings.batch_concurrency.max(1))
            .collect()
            .await
    }

    async fn run(
        &self,
        run_id: Uuid,
        endpoint: &EndpointRef,
        request: &UpgradeRequest,
    ) -> Result<UpgradeOutcome, UpgradeError> {
        let gateway = self
            .directory
            .resolve(endpoint)
            .map_err(|source| stage_error(UpgradeStage::Idle, &request.container, source))?;
        let gateway = gateway.as_ref();

        let planned = match self.plan(gateway, &request.container).await {
            Err(UpgradeError::NotFound { .. }) => {
                // A run holding this name may be between remove and create.
                let reference = request.container.trim_start_matches('/');
                drop(self.locks.acquire(endpoint, [reference.to_string()]).await);
                self.plan(gateway, &request.container).await?
            }
            planned => planned?,
        };
        let guard = self.locks.acquire(endpoint, planned.container_names()).await;

        // Another run may have replaced these containers while we waited.
        let plan = self.plan(gateway, planned.target.name()).await?;
        for name in plan.container_names() {
            let key = UpgradeLocks::key(endpoint, &name);
            if !guard.keys().contains(&key) {
                warn!("{} joined the dependency set after locking", name);
            }
        }

        let target = &plan.target;
        let image = resolve_image(target, request.image.as_deref())?;
        let old_image = target
            .inspect
            .config_str("Image")
            .unwrap_or(&target.image_id)
            .to_string();
        let name = target.name().to_string();
        info!("🚀 Upgrading {} ({} -> {})", name, old_image, image);

        let repair = DependentRepair::new(gateway, self.clock.as_ref(), &self.settings);

        enter(UpgradeStage::StopDependents);
        repair.stop_network_dependents(&plan.network_dependents).await;

        enter(UpgradeStage::StopTarget);
        lifecycle::stop_container(gateway, &target.identity.id)
            .await
            .map_err(|e| stage_error(UpgradeStage::StopTarget, &name, e))?;

        enter(UpgradeStage::AwaitStopped);
        self.await_stopped(gateway, target).await;

        enter(UpgradeStage::PullImage);
        let tag = image.tag_or_latest();
        info!("📥 Pulling {}", image);
        gateway
            .pull(&image.full_repository(), tag)
            .await
            .map_err(|e| stage_error(UpgradeStage::PullImage, &name, e))?;

        enter(UpgradeStage::RemoveOld);
        lifecycle::remove_container(gateway, &target.identity.id)
            .await
            .map_err(|e| stage_error(UpgradeStage::RemoveOld, &name, e))?;

        enter(UpgradeStage::CreateNew);
        let new_image = image.to_string();
        let create = build_create_request(target, &new_image, None);
        let new_id = match gateway.create(&create, &name).await {
            Ok(id) => id,
            Err(GatewayError::Rejected { message, .. }) => {
                let rollback = self.rollback(gateway, target).await;
                return Err(UpgradeError::ConfigRejected {
                    container: name,
                    message,
                    rollback,
                });
            }
            Err(e) => return Err(stage_error(UpgradeStage::CreateNew, &name, e)),
        };
        debug!("Created {} as {}", name, new_id);

        enter(UpgradeStage::StartNew);
        lifecycle::start_container(gateway, &new_id)
            .await
            .map_err(|e| stage_error(UpgradeStage::StartNew, &name, e))?;

        enter(UpgradeStage::AwaitReady);
        let ready = ReadinessProber::new(gateway, self.clock.as_ref(), &self.policy)
            .await_ready(&new_id)
            .await?;
        debug!(
            "{} ready after {} polls ({:?}, degraded: {})",
            name, ready.polls, ready.elapsed, ready.degraded
        );

        enter(UpgradeStage::RepairDependents);
        let dependents = if plan.network_dependents.is_empty() && plan.stack_peers.is_empty() {
            Vec::new()
        } else {
            repair.await_provider(&new_id, target.has_healthcheck).await;
            repair
                .repair(
                    &target.identity,
                    &new_id,
                    &plan.network_dependents,
                    &plan.stack_peers,
                )
                .await
        };

        self.registry.invalidate(&image);
        enter(UpgradeStage::Done);
        info!("✅ Upgraded {} to {}", name, new_image);

        Ok(UpgradeOutcome {
            run_id,
            success: true,
            old_container: target.identity.clone(),
            new_container: ContainerIdentity::new(&name, &new_id),
            old_image,
            new_image,
            dependents,
        })
    }

    async fn plan(
        &self,
        gateway: &dyn ContainerGateway,
        reference: &str,
    ) -> Result<UpgradePlan, UpgradeError> {
        let snapshots = discover_snapshots(
            gateway,
            self.settings.discovery_concurrency,
            self.settings.discovery_parallel_threshold,
        )
        .await
        .map_err(|e| stage_error(UpgradeStage::Idle, reference, e))?;

        let index = IdentityIndex::new(snapshots);
        let target = index
            .resolve(reference)
            .cloned()
            .ok_or_else(|| UpgradeError::NotFound {
                container: reference.to_string(),
            })?;

        let graph = build_graph_indexed(&index);
        let network = graph.dependents_of(&target.identity.id);
        let network_dependents: Vec<ContainerSnapshot> = network
            .iter()
            .filter_map(|d| index.resolve(&d.identity.id).cloned())
            .collect();
        let peers = stack_peers(index.snapshots(), &target, network);

        if !network_dependents.is_empty() || !peers.is_empty() {
            info!(
                "🕸️  {} has {} network dependents and {} stack peers",
                target.name(),
                network_dependents.len(),
                peers.len()
            );
        }

        Ok(UpgradePlan {
            target,
            network_dependents,
            stack_peers: peers,
        })
    }

    /// Bounded confirmation that the target stopped; proceeds regardless
    async fn await_stopped(&self, gateway: &dyn ContainerGateway, target: &ContainerSnapshot) {
        for attempt in 0..=self.settings.stop_retries {
            match gateway.inspect(&target.identity.id).await {
                Ok(inspect) => {
                    let snapshot = ContainerSnapshot::from_inspect(inspect);
                    if !snapshot.is_running() {
                        debug!("{} stopped ({})", target.name(), snapshot.state);
                        return;
                    }
                }
                Err(GatewayError::NotFound { .. }) => return,
                Err(e) => debug!("Stop confirmation poll failed: {}", e),
            }
            if attempt < self.settings.stop_retries {
                self.clock.sleep(self.settings.stop_poll_interval()).await;
            }
        }
        warn!(
            "{} not confirmed stopped after {} polls, continuing",
            target.name(),
            self.settings.stop_retries + 1
        );
    }

    /// Recreate the old container from its snapshot after the new configuration was rejected
    async fn rollback(
        &self,
        gateway: &dyn ContainerGateway,
        old: &ContainerSnapshot,
    ) -> RollbackOutcome {
        if !self.settings.rollback_on_reject {
            return RollbackOutcome::Skipped;
        }

        warn!("↩️  Restoring {} from its previous configuration", old.name());
        let request = build_create_request(old, &old.image_id, None);
        let restored = match gateway.create(&request, old.name()).await {
            Ok(id) => id,
            Err(e) => {
                return RollbackOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };
        if old.is_running() {
            if let Err(e) = lifecycle::start_container(gateway, &restored).await {
                return RollbackOutcome::Failed {
                    reason: format!("restored container did not start: {}", e),
                };
            }
        }
        RollbackOutcome::Restored {
            container_id: restored,
        }
    }
}

fn enter(stage: UpgradeStage) {
    debug!(stage = %stage, "Entering {}", stage);
}

fn stage_error(stage: UpgradeStage, container: &str, source: GatewayError) -> UpgradeError {
    match source {
        GatewayError::NotFound { .. } => UpgradeError::NotFound {
            container: container.to_string(),
        },
        source => UpgradeError::Gateway { stage, source },
    }
}

/// Image to pull: the requested reference, with the container's current tag filling in a
/// missing tag. `latest` is never substituted for a pinned tag.
fn resolve_image(
    target: &ContainerSnapshot,
    requested: Option<&str>,
) -> Result<ImageRef, UpgradeError> {
    let current = target.image.as_ref();
    let requested = requested.map(str::trim).filter(|r| !r.is_empty());

    let image = match requested {
        Some(reference) => ImageRef::parse(reference).map_err(|_| UpgradeError::InvalidImage {
            reference: reference.to_string(),
        })?,
        None => current.cloned().ok_or_else(|| UpgradeError::InvalidImage {
            reference: target.image_id.clone(),
        })?,
    };

    let tag = match (&image.tag, current.and_then(|c| c.tag.as_ref())) {
        (Some(tag), _) => tag.clone(),
        (None, Some(current_tag)) => current_tag.clone(),
        (None, None) if image.digest.is_none() => image.tag_or_latest().to_string(),
        (None, None) => {
            return Err(UpgradeError::InvalidImage {
                reference: image.to_string(),
            });
        }
    };
    Ok(image.with_tag(&tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ContainerInspect;
    use test_case::test_case;

    fn running(image: &str) -> ContainerSnapshot {
        ContainerSnapshot::from_inspect(ContainerInspect::new("web", "0a0b0c0d0e0f1a1b", image))
    }

    #[test_case("ghcr.io/acme/web:1.2", None => "ghcr.io/acme/web:1.2"; "current tag kept")]
    #[test_case("acme/web:1.2", Some("") => "acme/web:1.2"; "empty request")]
    #[test_case("acme/web:1.2", Some("acme/web") => "acme/web:1.2"; "tagless request keeps current tag")]
    #[test_case("acme/web:1.2", Some("acme/web:1.3") => "acme/web:1.3"; "explicit tag")]
    #[test_case("acme/web:1.2", Some("acme/web-ng") => "acme/web-ng:1.2"; "repository switch keeps tag")]
    #[test_case("acme/web", None => "acme/web:latest"; "untagged container")]
    #[test_case("acme/web:1.2@sha256:abc", None => "acme/web:1.2"; "digest dropped")]
    fn test_resolve_image(current: &str, requested: Option<&str>) -> String {
        resolve_image(&running(current), requested).unwrap().to_string()
    }

    #[test]
    fn test_digest_pinned_container_cannot_be_upgraded() {
        let result = resolve_image(&running("acme/web@sha256:abc"), None);
        assert!(matches!(result, Err(UpgradeError::InvalidImage { .. })));
    }

    #[test]
    fn test_invalid_requested_image() {
        let result = resolve_image(&running("acme/web:1.2"), Some("acme/web:"));
        assert!(matches!(result, Err(UpgradeError::InvalidImage { .. })));
    }

    #[test]
    fn test_not_found_maps_to_upgrade_not_found() {
        let err = stage_error(
            UpgradeStage::StopTarget,
            "web",
            GatewayError::NotFound {
                resource: "web".to_string(),
            },
        );
        assert!(matches!(err, UpgradeError::NotFound { container } if container == "web"));

        let err = stage_error(UpgradeStage::PullImage, "web", GatewayError::NotModified);
        assert_eq!(err.to_string(), "pull image failed: Not modified");
    }

    #[test]
    fn test_request_builder() {
        let request = UpgradeRequest::new("prod", 3, "web").with_image("acme/web:2");
        assert_eq!(request.endpoint_ref().to_string(), "prod/3");
        assert_eq!(request.image.as_deref(), Some("acme/web:2"));
    }
}
