//! # ragway-telemetry
//!
//! Tracing subscriber setup for ragway binaries and services.
//!
//! Log levels come from `RUST_LOG` and default to `info`. Logs go to stderr
//! so command output on stdout stays clean.
//!
//! ```rust,no_run
//! ragway_telemetry::init_telemetry("ragway-cli").ok();
//! tracing::info!("ready");
//! ```

pub mod memory;

pub use memory::{SpanRecord, SpanRecorderLayer, SpanStore, TENANT_FIELD};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a human-readable subscriber as the global default.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(service: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()?;
    tracing::debug!(service, "telemetry initialized");
    Ok(())
}

/// Install a JSON-lines subscriber as the global default.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_json_telemetry(service: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
        .try_init()?;
    tracing::debug!(service, "telemetry initialized");
    Ok(())
}

/// Like [`init_telemetry`], and also capture tenant-scoped spans into `store`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_with_store(service: &str, store: SpanStore) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(SpanRecorderLayer::new(store))
        .try_init()?;
    tracing::debug!(service, "telemetry initialized with span capture");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_global_init_fails() {
        let store = SpanStore::new();
        let first = init_with_store("test", store.clone());
        assert!(first.is_ok());
        assert!(init_telemetry("test").is_err());
        assert!(init_json_telemetry("test").is_err());

        tracing::error_span!("rag.search", tenant_id = "global").in_scope(|| {});
        assert_eq!(store.spans_for("global").len(), 1);
    }
}
