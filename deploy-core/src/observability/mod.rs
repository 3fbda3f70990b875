//! Observability infrastructure: tracing and metrics.
//!
//! Logs go to stderr so that report output on stdout stays machine-readable.
//! Metrics go through the `metrics` facade; without an installed recorder
//! they cost nothing.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Initialize logging and describe the core metrics.
///
/// `RUST_LOG` overrides the default `info` filter. Calling this twice is
/// harmless; the second subscriber is simply not installed.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    if installed.is_ok() {
        tracing::debug!(json, "Observability initialized");
    }

    metrics::register_core_metrics();
}
