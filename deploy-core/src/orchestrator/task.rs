//! Work units spawned by the control loop.
//!
//! Each job is one start attempt (or one certificate pass). Jobs never touch
//! the run table; they return a [`JobResult`] and the control loop applies it.

use crate::certs::{CertificateManager, CertificateOutcome};
use crate::observability::metrics;
use crate::probe::{HealthProbe, ProbeOutcome};
use crate::runtime::{ServiceHandle, StartOutcome};
use crate::types::{CertificateSpec, FailureDetail, FailureStage, ServiceSpec};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub(crate) enum Job {
    Service {
        spec: ServiceSpec,
        attempt: u32,
        /// Stop the previous (unhealthy) instance before starting again
        restart: bool,
        /// Final proxy whose host ports must be free first (temp proxy only)
        port_guard: Option<ServiceSpec>,
    },
    Certificate {
        cert: CertificateSpec,
        temp_proxy: ServiceSpec,
        final_proxy: ServiceSpec,
    },
}

pub(crate) enum JobOutcome {
    Ready { already_running: bool },
    Failed(FailureDetail),
    Cancelled(String),
    Certificate(CertificateOutcome),
}

pub(crate) struct JobResult {
    pub index: usize,
    pub outcome: JobOutcome,
}

/// Shared collaborators, cloned into every job.
#[derive(Clone)]
pub(crate) struct Workers {
    pub handle: ServiceHandle,
    pub probe: HealthProbe,
    pub certs: Arc<CertificateManager>,
}

impl Workers {
    pub async fn execute(self, index: usize, job: Job, cancel: CancellationToken) -> JobResult {
        let outcome = match job {
            Job::Service { spec, attempt, restart, port_guard } => {
                self.start_service(&spec, attempt, restart, port_guard.as_ref(), &cancel).await
            }
            Job::Certificate { cert, temp_proxy, final_proxy } => JobOutcome::Certificate(
                self.certs.run(&cert, &temp_proxy, &final_proxy, &cancel).await,
            ),
        };
        JobResult { index, outcome }
    }

    #[instrument(skip_all, fields(service = %spec.name, attempt = attempt))]
    async fn start_service(
        &self,
        spec: &ServiceSpec,
        attempt: u32,
        restart: bool,
        port_guard: Option<&ServiceSpec>,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        if cancel.is_cancelled() {
            return JobOutcome::Cancelled("cancelled before start".to_string());
        }

        if restart {
            if let Err(e) = self.handle.stop(spec).await {
                warn!(error = %e, "Could not stop unhealthy instance before retry");
            }
        }

        if let Some(final_proxy) = port_guard {
            if let Err(e) = self.certs.check_ports(spec, final_proxy).await {
                return JobOutcome::Failed(FailureDetail {
                    stage: FailureStage::StartFailed,
                    message: e.to_string(),
                });
            }
        }

        metrics::record_start(&spec.name);
        let already_running = match self.handle.start(spec).await {
            StartOutcome::Started => false,
            StartOutcome::AlreadyRunning => true,
            StartOutcome::Failed(reason) => {
                warn!(reason = %reason, "Start failed");
                return JobOutcome::Failed(FailureDetail {
                    stage: FailureStage::StartFailed,
                    message: reason,
                });
            }
        };

        match self.probe.wait_ready(spec, spec.timeout, spec.poll_interval, cancel).await {
            ProbeOutcome::Ready { attempts, elapsed } => {
                info!(probes = attempts, elapsed_ms = elapsed.as_millis() as u64, "Service ready");
                JobOutcome::Ready { already_running }
            }
            ProbeOutcome::TimedOut { attempts, last_error } => {
                warn!(probes = attempts, "Readiness timed out");
                JobOutcome::Failed(FailureDetail {
                    stage: FailureStage::ReadinessTimeout,
                    message: format!(
                        "not ready within {}s after {} checks: {}",
                        spec.timeout.as_secs(),
                        attempts,
                        last_error
                    ),
                })
            }
            ProbeOutcome::Cancelled { .. } => {
                JobOutcome::Cancelled("cancelled while waiting for readiness; left running".to_string())
            }
        }
    }
}
