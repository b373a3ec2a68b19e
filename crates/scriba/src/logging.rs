//! Logging initialization for shells embedding the workbench.
//!
//! Library code logs through the `log` facade. A binary (or test harness)
//! calls [`init`] once to route those records through `tracing` with an
//! env-filterable fmt subscriber (`RUST_LOG` controls verbosity).

use tracing_subscriber::EnvFilter;

/// Initializes logging with an `info` default level.
pub fn init() {
    init_with_default("info");
}

/// Initializes logging, using `default_filter` when `RUST_LOG` is unset.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));

    // Bridge `log` records into tracing events.
    let _ = tracing_log::LogTracer::init();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
