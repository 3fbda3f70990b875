//! TLS provisioning.
//!
//! The [`CertificateManager`] breaks the chicken-and-egg problem between the
//! final proxy (which needs a certificate) and the HTTP challenge (which needs
//! a proxy) by serving the challenge from a throwaway proxy:
//!
//! ```text
//! Idle -> TempProxyUp -> ChallengePending -> (Issued | ChallengeFailed)
//!      -> TempProxyDown -> (FinalProxyReady | Aborted)
//! ```
//!
//! `TempProxyDown` runs on every path once the manager has started, so the
//! temporary proxy is never left holding port 80 after [`CertificateManager::run`]
//! returns.

use crate::error::{DeployError, Result};
use crate::probe::{HealthProbe, ProbeOutcome};
use crate::runtime::{ServiceHandle, StartOutcome};
use crate::types::{
    CertificateRecord, CertificateSpec, FailureDetail, FailureStage, RunState, ServiceSpec,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

mod acme;
mod store;

pub use acme::{is_transient, AcmeClient, AcmeRequest, AcmeResponse, CertbotClient};
pub use store::CertificateStore;

/// Attempts per run: the first order plus one retry on a transient failure.
const MAX_ACME_ATTEMPTS: u32 = 2;

/// Pause before retrying a transient failure.
const ACME_RETRY_DELAY: Duration = Duration::from_secs(5);

/// States of the issuance state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertState {
    Idle,
    TempProxyUp,
    ChallengePending,
    Issued,
    ChallengeFailed,
    TempProxyDown,
    /// Certificate in place; the caller may start the final proxy
    FinalProxyReady,
    Aborted,
}

impl std::fmt::Display for CertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::TempProxyUp => "TempProxyUp",
            Self::ChallengePending => "ChallengePending",
            Self::Issued => "Issued",
            Self::ChallengeFailed => "ChallengeFailed",
            Self::TempProxyDown => "TempProxyDown",
            Self::FinalProxyReady => "FinalProxyReady",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// Result of one pass through the state machine.
#[derive(Debug, Clone)]
pub struct CertificateOutcome {
    /// `FinalProxyReady` or `Aborted`
    pub state: CertState,
    /// Every state visited, in order
    pub trace: Vec<CertState>,
    /// The certificate to hand to the final proxy
    pub record: Option<CertificateRecord>,
    /// An existing certificate was reused without contacting the CA
    pub reused: bool,
    pub acme_attempts: u32,
    pub temp_proxy_stopped: bool,
    pub error: Option<FailureDetail>,
}

impl CertificateOutcome {
    pub fn is_ready(&self) -> bool {
        self.state == CertState::FinalProxyReady
    }
}

enum Issuance {
    Issued { record: CertificateRecord, reused: bool },
    Failed(FailureDetail),
}

fn failure(stage: FailureStage, message: impl Into<String>) -> Issuance {
    Issuance::Failed(FailureDetail { stage, message: message.into() })
}

/// Drives certificate issuance around a temporary challenge proxy.
pub struct CertificateManager {
    handle: ServiceHandle,
    probe: HealthProbe,
    acme: Arc<dyn AcmeClient>,
    validity_days: i64,
    renew_before_days: i64,
}

impl CertificateManager {
    pub fn new(
        handle: ServiceHandle,
        probe: HealthProbe,
        acme: Arc<dyn AcmeClient>,
        validity_days: i64,
        renew_before_days: i64,
    ) -> Self {
        Self { handle, probe, acme, validity_days, renew_before_days }
    }

    pub fn store(&self, cert: &CertificateSpec) -> CertificateStore {
        CertificateStore::new(&cert.cert_dir, self.validity_days, self.renew_before_days)
    }

    /// Refuse to bring up `temp` while `final_proxy` is running on one of its
    /// host ports.
    pub async fn check_ports(&self, temp: &ServiceSpec, final_proxy: &ServiceSpec) -> Result<()> {
        let shared: Vec<u16> =
            temp.host_ports().filter(|p| final_proxy.host_ports().any(|q| q == *p)).collect();
        let Some(&port) = shared.first() else {
            return Ok(());
        };

        if self.handle.status(final_proxy).await? == RunState::Ready {
            return Err(DeployError::PortConflict { port, service: final_proxy.name.clone() });
        }
        Ok(())
    }

    /// Run the full state machine for `cert`.
    ///
    /// A valid certificate on disk short-circuits to `Issued` with zero ACME
    /// calls. The temp proxy is stopped before returning on every path.
    #[instrument(skip_all, fields(primary = cert.domains.first().map(String::as_str).unwrap_or_default()))]
    pub async fn run(
        &self,
        cert: &CertificateSpec,
        temp: &ServiceSpec,
        final_proxy: &ServiceSpec,
        cancel: &CancellationToken,
    ) -> CertificateOutcome {
        let mut trace = vec![CertState::Idle];
        let mut acme_attempts = 0;

        let store = self.store(cert);
        let issuance = match store.find_valid(&cert.domains, Utc::now()) {
            Some(record) => {
                info!(
                    expires_at = %record.expires_at,
                    days_remaining = record.days_remaining(Utc::now()),
                    "Existing certificate still valid, skipping ACME"
                );
                trace.push(CertState::Issued);
                Issuance::Issued { record, reused: true }
            }
            None => {
                self.issue(cert, temp, final_proxy, &store, cancel, &mut trace, &mut acme_attempts)
                    .await
            }
        };

        trace.push(CertState::TempProxyDown);
        let stop = self.handle.stop(temp).await;
        let temp_proxy_stopped = stop.is_ok();
        if let Err(e) = &stop {
            error!(service = %temp.name, error = %e, "Failed to stop temporary proxy");
        }

        let (state, record, reused, error) = match (issuance, stop) {
            (Issuance::Issued { record, reused }, Ok(_)) => {
                (CertState::FinalProxyReady, Some(record), reused, None)
            }
            (Issuance::Issued { record, reused }, Err(e)) => {
                let detail = FailureDetail { stage: FailureStage::StopFailed, message: e.to_string() };
                (CertState::Aborted, Some(record), reused, Some(detail))
            }
            (Issuance::Failed(detail), _) => (CertState::Aborted, None, false, Some(detail)),
        };
        trace.push(state);

        info!(state = %state, acme_attempts, "Certificate manager finished");
        CertificateOutcome { state, trace, record, reused, acme_attempts, temp_proxy_stopped, error }
    }

    #[allow(clippy::too_many_arguments)]
    async fn issue(
        &self,
        cert: &CertificateSpec,
        temp: &ServiceSpec,
        final_proxy: &ServiceSpec,
        store: &CertificateStore,
        cancel: &CancellationToken,
        trace: &mut Vec<CertState>,
        attempts: &mut u32,
    ) -> Issuance {
        trace.push(CertState::TempProxyUp);
        if let Err(e) = self.check_ports(temp, final_proxy).await {
            return failure(FailureStage::StartFailed, e.to_string());
        }
        if let StartOutcome::Failed(reason) = self.handle.start(temp).await {
            return failure(FailureStage::StartFailed, reason);
        }
        match self.probe.wait_ready(temp, temp.timeout, temp.poll_interval, cancel).await {
            ProbeOutcome::Ready { .. } => {}
            ProbeOutcome::TimedOut { last_error, .. } => {
                return failure(FailureStage::ReadinessTimeout, last_error);
            }
            ProbeOutcome::Cancelled { .. } => {
                return failure(FailureStage::Cancelled, "cancelled while waiting for temporary proxy");
            }
        }

        trace.push(CertState::ChallengePending);
        let request = AcmeRequest {
            domains: cert.domains.clone(),
            webroot: cert.webroot.clone(),
            cert_dir: cert.cert_dir.clone(),
            email: cert.email.clone(),
            staging: cert.staging,
        };

        loop {
            *attempts += 1;
            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    return failure(FailureStage::Cancelled, "cancelled during ACME challenge");
                }
                response = self.acme.obtain(&request) => response,
            };

            let output = match response {
                Ok(response) if response.success => {
                    return match store.record_issued(&cert.domains, Utc::now()) {
                        Ok(record) => {
                            trace.push(CertState::Issued);
                            info!(attempts = *attempts, expires_at = %record.expires_at, "Certificate issued");
                            Issuance::Issued { record, reused: false }
                        }
                        Err(e) => {
                            trace.push(CertState::ChallengeFailed);
                            failure(
                                FailureStage::ChallengeFailed,
                                format!("certificate issued but its record could not be written: {}", e),
                            )
                        }
                    };
                }
                Ok(response) => response.output,
                Err(e) => e.to_string(),
            };

            if *attempts < MAX_ACME_ATTEMPTS && is_transient(&output) {
                warn!(attempt = *attempts, "Transient ACME failure, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return failure(FailureStage::Cancelled, "cancelled during ACME challenge");
                    }
                    _ = tokio::time::sleep(ACME_RETRY_DELAY) => {}
                }
                continue;
            }

            trace.push(CertState::ChallengeFailed);
            return failure(FailureStage::ChallengeFailed, output);
        }
    }
}
