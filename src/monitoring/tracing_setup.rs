use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::gateway::EndpointRef;

/// Logging configuration (`[logging]` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    /// Directory for daily rolling log files; console only when unset
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber.
    ///
    /// `RUST_LOG` takes precedence over the configured level. The returned guard must be
    /// kept alive for file output to be flushed.
    pub fn init(&self, verbose: bool) -> Result<Option<WorkerGuard>> {
        let level = if verbose { "debug" } else { self.level.as_str() };
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let console_layer = if self.json {
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_writer(io::stderr)
                .boxed()
        } else {
            fmt::layer()
                .with_target(false)
                .compact()
                .with_writer(io::stderr)
                .boxed()
        };

        let (file_layer, guard) = match &self.file {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let appender = tracing_appender::rolling::daily(dir, "drydock.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .json()
                    .boxed();
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        Registry::default()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        Ok(guard)
    }
}

/// Span wrapping one orchestration run
pub fn upgrade_span(run_id: &uuid::Uuid, endpoint: &EndpointRef, container: &str) -> tracing::Span {
    tracing::info_span!(
        "upgrade",
        run_id = %run_id,
        gateway = %endpoint.gateway,
        endpoint = endpoint.endpoint,
        container = %container
    )
}
