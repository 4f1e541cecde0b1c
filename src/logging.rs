//! # Logging Setup
//!
//! Console tracing initialization with environment-driven filtering. Safe to
//! call from multiple entry points; only the first call installs a
//! subscriber, and an already-installed global subscriber (for example from
//! an embedding host) is left in place.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console logging, honoring `RUST_LOG` when set.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive()));

        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_err()
        {
            tracing::debug!("global tracing subscriber already installed, keeping it");
        }
    });
}

fn default_directive() -> String {
    match std::env::var("TYPEBUS_ENV").as_deref() {
        Ok("production") => "info".to_string(),
        _ => "debug".to_string(),
    }
}
