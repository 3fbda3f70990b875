//! Readiness probing.
//!
//! [`HealthProbe::wait_ready`] polls a service's readiness check until it
//! passes, the timeout elapses, or the run is cancelled. It never busy-loops:
//! attempts are separated by the poll interval, and a single slow attempt is
//! cut off at the deadline.

use crate::observability::metrics::record_probe_attempt;
use crate::types::{ReadinessCheck, ServiceSpec};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

mod checks;

pub use checks::{DbCredentials, NetworkChecker};

/// Performs a single readiness check.
#[async_trait]
pub trait ReadinessChecker: Send + Sync {
    /// `Ok(())` when the target is ready, otherwise a diagnostic.
    async fn check(&self, check: &ReadinessCheck) -> Result<(), String>;
}

/// Result of waiting for readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready { attempts: u32, elapsed: Duration },
    TimedOut { attempts: u32, last_error: String },
    Cancelled { attempts: u32 },
}

/// Bounded active polling against a [`ReadinessChecker`].
#[derive(Clone)]
pub struct HealthProbe {
    checker: Arc<dyn ReadinessChecker>,
}

impl HealthProbe {
    pub fn new(checker: Arc<dyn ReadinessChecker>) -> Self {
        Self { checker }
    }

    /// Wait until `spec` passes its readiness check.
    ///
    /// A spec without a readiness check is ready immediately. Only the calling
    /// task is suspended between attempts.
    #[instrument(skip(self, spec, cancel), fields(service = %spec.name))]
    pub async fn wait_ready(
        &self,
        spec: &ServiceSpec,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> ProbeOutcome {
        let Some(check) = &spec.readiness else {
            return ProbeOutcome::Ready { attempts: 0, elapsed: Duration::ZERO };
        };

        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempts = 0;
        let mut last_error;

        loop {
            attempts += 1;
            record_probe_attempt(check.kind());

            let attempt = tokio::time::timeout_at(deadline, self.checker.check(check));
            let result = tokio::select! {
                _ = cancel.cancelled() => return ProbeOutcome::Cancelled { attempts },
                result = attempt => result,
            };

            match result {
                Ok(Ok(())) => {
                    let elapsed = started.elapsed();
                    info!(attempts, elapsed_ms = elapsed.as_millis() as u64, target = %check, "Ready");
                    return ProbeOutcome::Ready { attempts, elapsed };
                }
                Ok(Err(e)) => {
                    debug!(attempts, error = %e, "Not ready yet");
                    last_error = e;
                }
                Err(_) => {
                    last_error = format!("check still pending after {:?}", timeout);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return ProbeOutcome::TimedOut { attempts, last_error };
            }

            let wake = (now + poll_interval).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => return ProbeOutcome::Cancelled { attempts },
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}
