use anyhow::{Context, Result, anyhow};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::monitoring::tracing_setup::LoggingConfig;

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "drydock.toml";

/// Image name patterns that get the longer database warm-up before being judged ready
pub const DEFAULT_DATABASE_PATTERNS: &[&str] = &[
    "postgres",
    "mysql",
    "mariadb",
    "mongo",
    "redis",
    "influxdb",
    "elasticsearch",
    "clickhouse",
    "cockroach",
    "timescale",
    "couchdb",
];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DrydockConfig {
    pub logging: LoggingConfig,
    pub gateways: HashMap<String, GatewayConfig>,
    pub registry: RegistrySettings,
    pub upgrade: UpgradeSettings,
    pub readiness: ReadinessSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key; used when `api_key` is unset
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_seconds: u64,
}

fn default_gateway_timeout() -> u64 {
    30
}

impl GatewayConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|key| !key.is_empty())
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub cache_ttl_seconds: u64,
    pub timeout_seconds: u64,
    pub scan_concurrency: usize,
    pub release_sources: Vec<ReleaseSource>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 900,
            timeout_seconds: 20,
            scan_concurrency: 4,
            release_sources: Vec::new(),
        }
    }
}

/// Maps an image repository to a GitHub project whose releases track its versions
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReleaseSource {
    pub image: String,
    pub github: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpgradeSettings {
    pub stop_retries: u32,
    pub stop_poll_ms: u64,
    pub dependent_settle_ms: u64,
    pub repair_health_wait_seconds: u64,
    pub repair_poll_ms: u64,
    pub repair_delay_without_healthcheck_ms: u64,
    pub rollback_on_reject: bool,
    pub discovery_concurrency: usize,
    pub discovery_parallel_threshold: usize,
    pub batch_concurrency: usize,
}

impl Default for UpgradeSettings {
    fn default() -> Self {
        Self {
            stop_retries: 10,
            stop_poll_ms: 1000,
            dependent_settle_ms: 3000,
            repair_health_wait_seconds: 60,
            repair_poll_ms: 2000,
            repair_delay_without_healthcheck_ms: 5000,
            rollback_on_reject: true,
            discovery_concurrency: 8,
            discovery_parallel_threshold: 20,
            batch_concurrency: 2,
        }
    }
}

impl UpgradeSettings {
    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms)
    }

    pub fn dependent_settle(&self) -> Duration {
        Duration::from_millis(self.dependent_settle_ms)
    }

    pub fn repair_health_wait(&self) -> Duration {
        Duration::from_secs(self.repair_health_wait_seconds)
    }

    pub fn repair_poll_interval(&self) -> Duration {
        Duration::from_millis(self.repair_poll_ms)
    }

    pub fn repair_delay_without_healthcheck(&self) -> Duration {
        Duration::from_millis(self.repair_delay_without_healthcheck_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadinessSettings {
    pub timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub health_grace_seconds: u64,
    pub min_stable_polls: u32,
    pub min_running_seconds: u64,
    pub database_min_running_seconds: u64,
    pub log_tail_lines: usize,
    pub database_patterns: Vec<String>,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            poll_interval_ms: 2000,
            health_grace_seconds: 60,
            min_stable_polls: 3,
            min_running_seconds: 10,
            database_min_running_seconds: 30,
            log_tail_lines: 50,
            database_patterns: DEFAULT_DATABASE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl DrydockConfig {
    /// Default configuration path: `<config dir>/drydock/drydock.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("drydock")
            .join(CONFIG_FILE_NAME)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            return Err(ConfigError::FileNotFound {
                path: path.as_ref().display().to_string(),
            }
            .into());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration at {:?}", path.as_ref()))?;

        let config: DrydockConfig =
            toml::from_str(&content).with_context(|| "Failed to parse configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Load from `path` when it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            debug!("No configuration at {:?}, using defaults", path.as_ref());
            Ok(Self::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;

        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration")?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write configuration at {:?}", path.as_ref()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        info!("🔍 Validating drydock configuration");

        self.validate_gateways()?;
        self.validate_registry()?;
        self.validate_upgrade()?;
        self.validate_readiness()?;

        info!("✅ Configuration validation passed");
        Ok(())
    }

    fn validate_gateways(&self) -> Result<()> {
        debug!("Validating gateways");

        for (name, gateway) in &self.gateways {
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(anyhow!("Invalid gateway name: '{}'", name));
            }
            if gateway.url.trim().is_empty() {
                return Err(anyhow!("Gateway '{}' must specify a url", name));
            }
            if !gateway.url.starts_with("http://") && !gateway.url.starts_with("https://") {
                return Err(anyhow!(
                    "Gateway '{}' url must start with http:// or https://: '{}'",
                    name,
                    gateway.url
                ));
            }
            if gateway.timeout_seconds == 0 {
                return Err(anyhow!("Gateway '{}' timeout must be greater than zero", name));
            }
        }

        Ok(())
    }

    fn validate_registry(&self) -> Result<()> {
        debug!("Validating registry settings");

        if self.registry.scan_concurrency == 0 {
            return Err(anyhow!("registry.scan_concurrency must be greater than zero"));
        }
        for source in &self.registry.release_sources {
            let valid = source
                .github
                .split_once('/')
                .is_some_and(|(owner, repo)| {
                    !owner.is_empty() && !repo.is_empty() && !repo.contains('/')
                });
            if !valid {
                return Err(anyhow!(
                    "Release source for '{}' must name a GitHub project as owner/name, got '{}'",
                    source.image,
                    source.github
                ));
            }
        }

        Ok(())
    }

    fn validate_upgrade(&self) -> Result<()> {
        debug!("Validating upgrade settings");

        let upgrade = &self.upgrade;
        if upgrade.stop_poll_ms == 0 || upgrade.repair_poll_ms == 0 {
            return Err(anyhow!("Upgrade poll intervals must be greater than zero"));
        }
        if upgrade.discovery_concurrency == 0 || upgrade.batch_concurrency == 0 {
            return Err(anyhow!("Upgrade concurrency limits must be greater than zero"));
        }

        Ok(())
    }

    fn validate_readiness(&self) -> Result<()> {
        debug!("Validating readiness settings");

        let readiness = &self.readiness;
        if readiness.poll_interval_ms == 0 {
            return Err(anyhow!("readiness.poll_interval_ms must be greater than zero"));
        }
        if readiness.timeout_seconds * 1000 < readiness.poll_interval_ms {
            return Err(anyhow!(
                "readiness.timeout_seconds ({}s) is shorter than one poll interval ({}ms)",
                readiness.timeout_seconds,
                readiness.poll_interval_ms
            ));
        }
        if readiness.min_stable_polls == 0 {
            return Err(anyhow!("readiness.min_stable_polls must be at least 1"));
        }
        for pattern in &readiness.database_patterns {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("Invalid database pattern '{}'", pattern))?;
        }

        Ok(())
    }
}
