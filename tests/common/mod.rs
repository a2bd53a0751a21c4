#![allow(dead_code)]

use async_trait::async_trait;
use mockall::mock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use std::time::{Duration, Instant};

use drydock::config::{ReadinessSettings, UpgradeSettings};
use drydock::error::{GatewayError, RegistryError};
use drydock::gateway::{
    ContainerGateway, ContainerInspect, ContainerSummary, CreateContainerRequest,
    EndpointSettings, GatewayResult, ImageInspect,
};
use drydock::orchestrator::{Clock, ReadinessPolicy};
use drydock::registry::{LatestImage, RegistryClient};
use drydock::types::{ImageRef, NetworkMode};

mock! {
    pub Registry {}

    #[async_trait]
    impl RegistryClient for Registry {
        async fn latest(&self, image: &ImageRef) -> Result<Option<LatestImage>, RegistryError>;
        fn invalidate(&self, image: &ImageRef);
    }
}

/// Registry mock that accepts any number of invalidations
pub fn quiet_registry() -> MockRegistry {
    let mut registry = MockRegistry::new();
    registry.expect_invalidate().return_const(());
    registry
}

/// Clock whose sleeps advance time instantly
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.offset.lock().unwrap() += duration;
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Stop(String),
    Start(String),
    Restart(String),
    Remove(String),
    Pull(String, String),
    Create {
        name: String,
        id: String,
        network_mode: Option<String>,
        /// Health of the namespace provider at creation time, for shared-namespace modes
        provider_health: Option<String>,
    },
}

/// Live state to report on successive inspects once the container has been started
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub state: &'static str,
    pub health: Option<&'static str>,
}

pub fn step(state: &'static str, health: Option<&'static str>) -> Step {
    Step { state, health }
}

#[derive(Default)]
struct FakeState {
    containers: Vec<ContainerInspect>,
    images: HashMap<String, ImageInspect>,
    events: Vec<Event>,
    next_id: u64,
    reject_images: HashSet<String>,
    exit_on_start: HashMap<String, (i64, String)>,
    scripts: HashMap<String, VecDeque<Step>>,
    armed: HashSet<String>,
    stop_errors: HashMap<String, GatewayError>,
    start_errors: HashMap<String, GatewayError>,
    remove_errors: HashMap<String, GatewayError>,
    remove_gates: HashMap<String, Arc<RemoveGate>>,
    logs: HashMap<String, String>,
}

impl FakeState {
    fn position(&self, reference: &str) -> Option<usize> {
        let reference = reference.trim_start_matches('/');
        self.containers.iter().position(|c| {
            c.id == reference
                || c.name.trim_start_matches('/') == reference
                || (reference.len() >= 12 && c.id.starts_with(reference))
        })
    }

    fn name_of(&self, index: usize) -> String {
        self.containers[index].name.trim_start_matches('/').to_string()
    }

    fn not_found(reference: &str) -> GatewayError {
        GatewayError::NotFound {
            resource: reference.to_string(),
        }
    }
}

/// Holds a remove of one container open until the test lets it finish
#[derive(Default)]
pub struct RemoveGate {
    pub removed: Notify,
    pub resume: Notify,
}

/// In-memory Docker host that follows the gateway contract, including its idempotency quirks
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, inspect: ContainerInspect) -> Self {
        self.state.lock().unwrap().containers.push(inspect);
        self
    }

    pub fn with_image(self, image: ImageInspect) -> Self {
        self.state
            .lock()
            .unwrap()
            .images
            .insert(image.id.clone(), image);
        self
    }

    /// Reject creates whose image matches, as a gateway does for an invalid configuration
    pub fn reject_create_for(self, image: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .reject_images
            .insert(image.to_string());
        self
    }

    pub fn exit_on_start(self, name: &str, exit_code: i64, logs: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .exit_on_start
            .insert(name.to_string(), (exit_code, logs.to_string()));
        self
    }

    pub fn script_after_start(self, name: &str, steps: Vec<Step>) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(name.to_string(), steps.into());
        self
    }

    /// Fail the next stop of `name` with `error` after actually stopping it
    pub fn stop_error(self, name: &str, error: GatewayError) -> Self {
        self.state
            .lock()
            .unwrap()
            .stop_errors
            .insert(name.to_string(), error);
        self
    }

    /// Fail the next start of `name` with `error`, leaving it stopped
    pub fn start_error(self, name: &str, error: GatewayError) -> Self {
        self.state
            .lock()
            .unwrap()
            .start_errors
            .insert(name.to_string(), error);
        self
    }

    /// Fail the next remove of `name` with `error` after actually removing it
    pub fn remove_error(self, name: &str, error: GatewayError) -> Self {
        self.state
            .lock()
            .unwrap()
            .remove_errors
            .insert(name.to_string(), error);
        self
    }

    /// Suspend the next remove of `name` once the container is gone, until `resume` is notified
    pub fn pause_after_remove(&self, name: &str) -> Arc<RemoveGate> {
        let gate = Arc::new(RemoveGate::default());
        self.state
            .lock()
            .unwrap()
            .remove_gates
            .insert(name.to_string(), gate.clone());
        gate
    }

    pub fn with_logs(self, name: &str, logs: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert(name.to_string(), logs.to_string());
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn container(&self, name: &str) -> Option<ContainerInspect> {
        let state = self.state.lock().unwrap();
        state.position(name).map(|i| state.containers[i].clone())
    }

    pub fn position_of(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Index of the first create of `name`
    pub fn create_position(&self, name: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| matches!(e, Event::Create { name: n, .. } if n == name))
    }
}

#[async_trait]
impl ContainerGateway for FakeGateway {
    async fn inspect(&self, id: &str) -> GatewayResult<ContainerInspect> {
        let mut state = self.state.lock().unwrap();
        let index = state.position(id).ok_or_else(|| FakeState::not_found(id))?;
        let name = state.name_of(index);

        if state.armed.contains(&name) {
            let next = state.scripts.get_mut(&name).and_then(|steps| {
                if steps.len() > 1 {
                    steps.pop_front()
                } else {
                    steps.front().copied()
                }
            });
            if let Some(step) = next {
                let container = &mut state.containers[index];
                container.set_state(step.state);
                container.set_health(step.health);
            }
        }
        Ok(state.containers[index].clone())
    }

    async fn inspect_image(&self, id: &str) -> GatewayResult<ImageInspect> {
        let state = self.state.lock().unwrap();
        state
            .images
            .get(id)
            .cloned()
            .ok_or_else(|| FakeState::not_found(id))
    }

    async fn stop(&self, id: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        let index = state.position(id).ok_or_else(|| FakeState::not_found(id))?;
        let name = state.name_of(index);
        if !state.containers[index].state.running {
            return Err(GatewayError::NotModified);
        }
        state.containers[index].set_state("exited");
        state.containers[index].set_health(None);
        state.events.push(Event::Stop(name.clone()));
        match state.stop_errors.remove(&name) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn start(&self, id: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        let index = state.position(id).ok_or_else(|| FakeState::not_found(id))?;
        let name = state.name_of(index);
        if state.containers[index].state.running {
            return Err(GatewayError::NotModified);
        }
        if let Some(error) = state.start_errors.remove(&name) {
            return Err(error);
        }
        state.events.push(Event::Start(name.clone()));

        if let Some((exit_code, logs)) = state.exit_on_start.get(&name).cloned() {
            let container = &mut state.containers[index];
            container.set_state("exited");
            container.state.exit_code = exit_code;
            state.logs.insert(name, logs);
            return Ok(());
        }

        let container = &mut state.containers[index];
        container.set_state("running");
        if container.has_configured_healthcheck() {
            container.set_health(Some("healthy"));
        }
        state.armed.insert(name);
        Ok(())
    }

    async fn restart(&self, id: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        let index = state.position(id).ok_or_else(|| FakeState::not_found(id))?;
        let name = state.name_of(index);
        state.containers[index].set_state("running");
        state.events.push(Event::Restart(name));
        Ok(())
    }

    async fn remove(&self, id: &str) -> GatewayResult<()> {
        let (gate, result) = {
            let mut state = self.state.lock().unwrap();
            let index = state.position(id).ok_or_else(|| FakeState::not_found(id))?;
            let name = state.name_of(index);
            state.containers.remove(index);
            state.armed.remove(&name);
            state.events.push(Event::Remove(name.clone()));
            let result = match state.remove_errors.remove(&name) {
                Some(error) => Err(error),
                None => Ok(()),
            };
            (state.remove_gates.remove(&name), result)
        };

        if let Some(gate) = gate {
            gate.removed.notify_one();
            gate.resume.notified().await;
        }
        result
    }

    async fn pull(&self, repository: &str, tag: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .events
            .push(Event::Pull(repository.to_string(), tag.to_string()));
        Ok(())
    }

    async fn create(&self, config: &CreateContainerRequest, name: &str) -> GatewayResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.position(name).is_some() {
            return Err(GatewayError::Conflict {
                message: format!("name {} already in use", name),
            });
        }
        let image = config.image().unwrap_or_default().to_string();
        if state.reject_images.contains(&image) {
            return Err(GatewayError::Rejected {
                status: 400,
                message: "invalid network settings".to_string(),
            });
        }

        state.next_id += 1;
        let id = format!("{:04x}", 0xc000 + state.next_id).repeat(16);

        let network_mode = config.network_mode().map(str::to_string);
        let provider_health = network_mode
            .as_deref()
            .map(NetworkMode::parse)
            .and_then(|mode| mode.shared_namespace_ref().map(str::to_string))
            .and_then(|reference| state.position(&reference))
            .map(|i| {
                state.containers[i]
                    .state
                    .health
                    .as_ref()
                    .map(|h| h.status.clone())
                    .unwrap_or_else(|| state.containers[i].state.status.clone())
            });

        let mut inspect = ContainerInspect::new(name, &id, &image);
        inspect.image = format!("sha256:img-{}", image);
        inspect.config = config.config.clone();
        inspect.host_config = config.host_config.clone();
        inspect.network_settings.networks.clear();
        if let Some(networking) = &config.networking_config {
            for (network, endpoint) in &networking.endpoints_config {
                inspect.network_settings.networks.insert(
                    network.clone(),
                    EndpointSettings {
                        ipam_config: endpoint.ipam_config.clone(),
                        links: endpoint.links.clone(),
                        aliases: endpoint.aliases.clone(),
                        ..EndpointSettings::default()
                    },
                );
            }
        }
        inspect.set_state("created");

        state.containers.push(inspect);
        state.events.push(Event::Create {
            name: name.to_string(),
            id: id.clone(),
            network_mode,
            provider_health,
        });
        Ok(id)
    }

    async fn logs(&self, id: &str, _tail_lines: usize) -> GatewayResult<String> {
        let state = self.state.lock().unwrap();
        let index = state.position(id).ok_or_else(|| FakeState::not_found(id))?;
        Ok(state.logs.get(&state.name_of(index)).cloned().unwrap_or_default())
    }

    async fn list_all(&self) -> GatewayResult<Vec<ContainerSummary>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![c.name.clone()],
                image: c.config_str("Image").unwrap_or_default().to_string(),
                state: c.state.status.clone(),
                labels: None,
            })
            .collect())
    }
}

/// Upgrade settings with short, deterministic delays
pub fn fast_upgrade_settings() -> UpgradeSettings {
    UpgradeSettings {
        stop_retries: 3,
        stop_poll_ms: 100,
        dependent_settle_ms: 100,
        repair_health_wait_seconds: 5,
        repair_poll_ms: 100,
        repair_delay_without_healthcheck_ms: 100,
        discovery_parallel_threshold: 2,
        ..UpgradeSettings::default()
    }
}

pub fn fast_readiness_settings() -> ReadinessSettings {
    ReadinessSettings {
        timeout_seconds: 10,
        poll_interval_ms: 500,
        health_grace_seconds: 3,
        min_stable_polls: 2,
        min_running_seconds: 1,
        database_min_running_seconds: 4,
        ..ReadinessSettings::default()
    }
}

pub fn fast_policy() -> ReadinessPolicy {
    ReadinessPolicy::from_settings(&fast_readiness_settings()).unwrap()
}

pub const TUNNEL_ID: &str = "7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a";
pub const APP_ID: &str = "a99a99a99a99a99a99a99a99a99a99a99a99a99a99a99a99a99a99a99a99a99a";
pub const WEB_ID: &str = "3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e";
pub const WORKER_ID: &str = "4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b4b";
