//! Idempotent service lifecycle on top of a [`ContainerRuntime`].

use super::{ContainerRuntime, InstanceState};
use crate::error::{DeployError, Result};
use crate::types::{RunState, ServiceSpec};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new instance was launched (or a stopped one resumed)
    Started,
    /// An instance with this name was already running
    AlreadyRunning,
    /// The runtime refused; the reason is its verbatim diagnostic
    Failed(String),
}

/// Start/stop/status/logs for plan services.
#[derive(Clone)]
pub struct ServiceHandle {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ServiceHandle {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Start `spec`. Safe to call when it is already running.
    pub async fn start(&self, spec: &ServiceSpec) -> StartOutcome {
        match self.runtime.status(&spec.name).await {
            Ok(state) if state.is_running() => {
                debug!(service = %spec.name, %state, "Instance already running");
                return StartOutcome::AlreadyRunning;
            }
            Ok(_) => {}
            Err(e) => {
                // The start below reports the real problem if the runtime is down.
                warn!(service = %spec.name, error = %e, "Status query failed before start");
            }
        }

        match self.runtime.start(&spec.name, spec).await {
            Ok(()) => {
                info!(service = %spec.name, runtime = self.runtime.name(), "Service started");
                StartOutcome::Started
            }
            Err(e) => StartOutcome::Failed(failure_reason(e)),
        }
    }

    /// Stop `spec`; a service that is not running counts as stopped.
    pub async fn stop(&self, spec: &ServiceSpec) -> Result<RunState> {
        self.runtime.stop(&spec.name).await?;
        info!(service = %spec.name, "Service stopped");
        Ok(RunState::Stopped)
    }

    /// Live state of `spec` as seen by the runtime.
    pub async fn status(&self, spec: &ServiceSpec) -> Result<RunState> {
        Ok(run_state_of(&self.runtime.status(&spec.name).await?))
    }

    pub async fn logs(&self, spec: &ServiceSpec, tail: usize) -> Result<String> {
        self.runtime.logs(&spec.name, tail).await
    }
}

/// Map a runtime instance state onto the orchestrator's vocabulary.
pub(crate) fn run_state_of(state: &InstanceState) -> RunState {
    match state {
        InstanceState::Missing => RunState::Pending,
        InstanceState::Created | InstanceState::Restarting => RunState::Starting,
        InstanceState::Running | InstanceState::Paused => RunState::Ready,
        InstanceState::Exited { code: 0 } => RunState::Stopped,
        InstanceState::Exited { .. } | InstanceState::Dead => RunState::Failed,
    }
}

/// Strip our own wrapping so the report shows the runtime's words.
fn failure_reason(err: DeployError) -> String {
    match err {
        DeployError::StartFailed { reason, .. } | DeployError::Runtime(reason) => reason,
        other => other.to_string(),
    }
}
