//! Observability for drydock: tracing subscriber setup and run spans.

pub mod tracing_setup;

pub use tracing_setup::{LoggingConfig, upgrade_span};
