//! Tracing setup.
//!
//! The filter sits behind a `reload` layer so the level can be changed on a
//! running process.
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Filter for `logging`: a valid `RUST_LOG` wins, otherwise the configured
/// level.
fn initial_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(logging: &LoggingConfig) {
    let (filter, handle) = reload::Layer::new(initial_filter(logging));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Replace the active filter with `level`.
///
/// Returns `false` when tracing was not installed by [`init_tracing`] or the
/// directive does not parse.
pub fn apply_logging_level(level: &str) -> bool {
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };
    match EnvFilter::try_new(level) {
        Ok(filter) => handle.reload(filter).is_ok(),
        Err(e) => {
            tracing::warn!(level = %level, error = %e, "Ignoring invalid log level");
            false
        }
    }
}
