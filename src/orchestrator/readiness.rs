use regex::{Regex, RegexBuilder};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clock::Clock;
use crate::config::ReadinessSettings;
use crate::error::{ConfigError, GatewayError, UpgradeError};
use crate::gateway::ContainerGateway;
use crate::types::{ContainerSnapshot, ContainerState, HealthStatus};

/// Image name patterns that get the longer warm-up window
#[derive(Debug, Clone, Default)]
pub struct DatabasePatterns {
    patterns: Vec<Regex>,
}

impl DatabasePatterns {
    pub fn compile(patterns: &[String]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ConfigError::InvalidFormat {
                        reason: format!("database pattern '{}': {}", pattern, e),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, image: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(image))
    }
}

/// Thresholds of the readiness algorithm
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// How long a health check may stay `starting`/`none` before stability alone is accepted
    pub health_grace: Duration,
    pub min_stable_polls: u32,
    pub min_running: Duration,
    pub database_min_running: Duration,
    pub log_tail_lines: usize,
    pub database_patterns: DatabasePatterns,
}

impl ReadinessPolicy {
    pub fn from_settings(settings: &ReadinessSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            timeout: Duration::from_secs(settings.timeout_seconds),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            health_grace: Duration::from_secs(settings.health_grace_seconds),
            min_stable_polls: settings.min_stable_polls.max(1),
            min_running: Duration::from_secs(settings.min_running_seconds),
            database_min_running: Duration::from_secs(settings.database_min_running_seconds),
            log_tail_lines: settings.log_tail_lines,
            database_patterns: DatabasePatterns::compile(&settings.database_patterns)?,
        })
    }

    /// Minimum observed running time for containers without a health check
    pub fn min_running_for(&self, image: &str) -> Duration {
        if self.database_patterns.matches(image) {
            self.min_running.max(self.database_min_running)
        } else {
            self.min_running
        }
    }
}

/// How a container was judged ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyReport {
    pub polls: u32,
    pub elapsed: Duration,
    pub health: HealthStatus,
    /// Accepted on stability or on the final timeout check rather than a healthy report
    pub degraded: bool,
}

/// Polls one container until it is judged ready or the policy's timeout elapses
pub struct ReadinessProber<'a> {
    gateway: &'a dyn ContainerGateway,
    clock: &'a dyn Clock,
    policy: &'a ReadinessPolicy,
}

impl<'a> ReadinessProber<'a> {
    pub fn new(
        gateway: &'a dyn ContainerGateway,
        clock: &'a dyn Clock,
        policy: &'a ReadinessPolicy,
    ) -> Self {
        Self {
            gateway,
            clock,
            policy,
        }
    }

    pub async fn await_ready(&self, container_id: &str) -> Result<ReadyReport, UpgradeError> {
        let started = self.clock.now();
        let mut polls = 0u32;
        let mut stable_polls = 0u32;
        let mut running_since = None;
        let mut last_state = String::from("unknown");
        let mut name = container_id.to_string();

        while self.clock.now().duration_since(started) < self.policy.timeout {
            let now = self.clock.now();
            let elapsed = now.duration_since(started);
            polls += 1;

            let snapshot = match self.gateway.inspect(container_id).await {
                Ok(inspect) => ContainerSnapshot::from_inspect(inspect),
                Err(GatewayError::NotFound { .. }) => {
                    return Err(UpgradeError::NotFound { container: name });
                }
                Err(e) => {
                    debug!("Readiness poll of {} failed: {}", name, e);
                    self.clock.sleep(self.policy.poll_interval).await;
                    continue;
                }
            };
            name = snapshot.name().to_string();
            last_state = describe(&snapshot);

            if snapshot.state.is_terminated() {
                let logs = self.diagnostic(container_id, &last_state).await;
                warn!("💥 {} exited with code {}", name, snapshot.exit_code);
                return Err(UpgradeError::Exited {
                    container: name,
                    exit_code: snapshot.exit_code,
                    logs,
                });
            }

            if snapshot.state == ContainerState::Running {
                stable_polls += 1;
                running_since.get_or_insert(now);
            } else {
                stable_polls = 0;
                running_since = None;
            }
            let stable = stable_polls >= self.policy.min_stable_polls;

            if snapshot.has_healthcheck {
                match snapshot.health {
                    HealthStatus::Healthy if snapshot.is_running() => {
                        info!("✅ {} is healthy", name);
                        return Ok(self.report(polls, elapsed, HealthStatus::Healthy, false));
                    }
                    HealthStatus::Unhealthy => {
                        let logs = self.diagnostic(container_id, &last_state).await;
                        warn!("💔 {} reported unhealthy", name);
                        return Err(UpgradeError::Unhealthy {
                            container: name,
                            logs,
                        });
                    }
                    health if stable && elapsed >= self.policy.health_grace => {
                        info!(
                            "✅ {} stable for {} polls, health still {}; accepting",
                            name, stable_polls, health
                        );
                        return Ok(self.report(polls, elapsed, health, true));
                    }
                    _ => {}
                }
            } else if stable {
                let image = snapshot
                    .image
                    .as_ref()
                    .map(|i| i.repository.as_str())
                    .unwrap_or_default();
                let required = self.policy.min_running_for(image);
                if running_since.is_some_and(|since| now.duration_since(since) >= required) {
                    info!("✅ {} running and stable", name);
                    return Ok(self.report(polls, elapsed, HealthStatus::None, true));
                }
            }

            self.clock.sleep(self.policy.poll_interval).await;
        }

        let elapsed = self.clock.now().duration_since(started);
        match self.gateway.inspect(container_id).await {
            Ok(inspect) => {
                let snapshot = ContainerSnapshot::from_inspect(inspect);
                if snapshot.is_running() {
                    warn!(
                        "⏱️  {} not confirmed ready after {:?}, but running; accepting",
                        snapshot.name(),
                        elapsed
                    );
                    return Ok(self.report(polls + 1, elapsed, snapshot.health, true));
                }
                last_state = describe(&snapshot);
            }
            Err(e) => debug!("Final readiness check of {} failed: {}", name, e),
        }

        Err(UpgradeError::ReadinessTimeout {
            container: name,
            last_state,
        })
    }

    fn report(
        &self,
        polls: u32,
        elapsed: Duration,
        health: HealthStatus,
        degraded: bool,
    ) -> ReadyReport {
        ReadyReport {
            polls,
            elapsed,
            health,
            degraded,
        }
    }

    /// Log tail for a failed container; never empty
    async fn diagnostic(&self, container_id: &str, state: &str) -> String {
        match self.gateway.logs(container_id, self.policy.log_tail_lines).await {
            Ok(logs) if !logs.trim().is_empty() => logs,
            Ok(_) => format!("no log output (state: {})", state),
            Err(e) => format!("logs unavailable ({}) (state: {})", e, state),
        }
    }
}

fn describe(snapshot: &ContainerSnapshot) -> String {
    match snapshot.health {
        HealthStatus::None => snapshot.state.to_string(),
        health => format!("{} ({})", snapshot.state, health),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy() -> ReadinessPolicy {
        ReadinessPolicy::from_settings(&ReadinessSettings::default()).unwrap()
    }

    #[test]
    fn test_database_images_need_longer_warm_up() {
        let policy = policy();
        assert_eq!(policy.min_running_for("library/postgres"), Duration::from_secs(30));
        assert_eq!(policy.min_running_for("bitnami/MariaDB"), Duration::from_secs(30));
        assert_eq!(policy.min_running_for("acme/web"), Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let settings = ReadinessSettings {
            database_patterns: vec!["(".to_string()],
            ..ReadinessSettings::default()
        };
        assert!(matches!(
            ReadinessPolicy::from_settings(&settings),
            Err(ConfigError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_min_stable_polls_is_at_least_one() {
        let settings = ReadinessSettings {
            min_stable_polls: 0,
            ..ReadinessSettings::default()
        };
        assert_eq!(ReadinessPolicy::from_settings(&settings).unwrap().min_stable_polls, 1);
    }
}
