//! Logging setup and helpers
//!
//! Structured logging with tracing. Library crates in this workspace only
//! emit events; binaries and test harnesses call [`init`] once to install a
//! subscriber.

use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Install a global tracing subscriber filtered by `RUST_LOG`
///
/// Falls back to `info` when `RUST_LOG` is unset. Safe to call more than
/// once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Log the execution time of an async operation at debug level
pub async fn timed<F, T>(name: &str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    debug!("Starting: {}", name);

    let result = future.await;

    debug!("Completed: {} in {:?}", name, start.elapsed());
    result
}
