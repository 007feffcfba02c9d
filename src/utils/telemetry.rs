//! Logging
//!
//! Installs the process-wide `tracing` subscriber used by the batch binary.
//! Library code only emits events; it never installs a subscriber itself.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Directive used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_DIRECTIVE: &str = "occurrence_matrix=info";

/// Build the filter from `RUST_LOG`, falling back to `default_directive`.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install a formatted subscriber filtered by `RUST_LOG`.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(default_directive: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    Registry::default()
        .with(env_filter(default_directive))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
}
