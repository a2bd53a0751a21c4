use thiserror::Error;

use crate::orchestrator::UpgradeStage;

/// Drydock-specific error types for better error handling
#[derive(Error, Debug)]
pub enum DrydockError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Upgrade failed: {0}")]
    Upgrade(#[from] UpgradeError),

    #[error("Generic error: {0}")]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at path: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration: {reason}")]
    InvalidFormat { reason: String },
}

/// Failures reported by a container runtime gateway.
///
/// `NotFound`, `NotModified` and `Conflict` are the three idempotency conditions every
/// gateway reports uniformly; callers decide whether they mean "already in the desired state".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Not modified")]
    NotModified,

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Transport failure: {message}")]
    Transport { message: String },

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Gateway API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unknown gateway endpoint: {reference}")]
    UnknownEndpoint { reference: String },
}

impl GatewayError {
    /// True for responses that may mean the container is already in the requested state.
    pub fn is_idempotent_condition(&self) -> bool {
        matches!(
            self,
            GatewayError::NotModified
                | GatewayError::Conflict { .. }
                | GatewayError::Transport { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Rate limit exceeded on {provider}{}", .retry_after.map(|s| format!(" (retry after {}s)", s)).unwrap_or_default())]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    #[error("Invalid image reference: {reference}")]
    InvalidReference { reference: String },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Registry transport failure: {message}")]
    Transport { message: String },

    #[error("Malformed registry response: {reason}")]
    Malformed { reason: String },
}

impl RegistryError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, RegistryError::RateLimited { .. })
    }
}

/// What happened to the old container after the new configuration was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    Restored { container_id: String },
    Failed { reason: String },
    Skipped,
}

impl std::fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackOutcome::Restored { container_id } => {
                write!(f, "old container restored as {}", container_id)
            }
            RollbackOutcome::Failed { reason } => write!(f, "rollback failed: {}", reason),
            RollbackOutcome::Skipped => write!(f, "no rollback attempted"),
        }
    }
}

#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("Container not found: {container}")]
    NotFound { container: String },

    #[error("Invalid image reference: {reference}")]
    InvalidImage { reference: String },

    #[error("Gateway rejected the configuration for {container}: {message} ({rollback})")]
    ConfigRejected {
        container: String,
        message: String,
        rollback: RollbackOutcome,
    },

    #[error("Container {container} exited with code {exit_code}: {logs}")]
    Exited {
        container: String,
        exit_code: i64,
        logs: String,
    },

    #[error("Container {container} reported unhealthy: {logs}")]
    Unhealthy { container: String, logs: String },

    #[error("Container {container} was not ready in time (last state: {last_state})")]
    ReadinessTimeout {
        container: String,
        last_state: String,
    },

    #[error("{stage} failed: {source}")]
    Gateway {
        stage: UpgradeStage,
        #[source]
        source: GatewayError,
    },
}

/// Convenience type alias for Drydock results
pub type Result<T, E = DrydockError> = std::result::Result<T, E>;
