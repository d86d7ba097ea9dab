//! Diagnostic logging setup.
//!
//! Events go to stderr so the transcript printed on stdout stays clean.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_ENV_VAR: &str = "SPOILERFREE_LOG";
pub const DEFAULT_DIRECTIVES: &str = "spoilerfree=info";

/// Builds the filter from `SPOILERFREE_LOG`, falling back to `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs the global subscriber. Calling it again is a no-op.
pub fn init(default: &str) {
    let result = tracing_subscriber::registry()
        .with(env_filter(default))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
