//! Deployment report produced once per run.

use super::state::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage at which a service failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// The runtime could not launch the service
    StartFailed,
    /// Launched but never passed its readiness check
    ReadinessTimeout,
    /// Certificate issuance failed
    ChallengeFailed,
    /// A service that had to be retired could not be stopped
    StopFailed,
    /// The run was cancelled while the service was in flight
    Cancelled,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StartFailed => write!(f, "StartFailed"),
            Self::ReadinessTimeout => write!(f, "ReadinessTimeout"),
            Self::ChallengeFailed => write!(f, "ChallengeFailed"),
            Self::StopFailed => write!(f, "StopFailed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Failure stage plus the raw diagnostic text from the failing collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub stage: FailureStage,
    pub message: String,
}

/// Final outcome of one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub service: String,
    pub state: RunState,
    /// Wall-clock time from first start to settling
    pub duration_ms: u64,
    /// Start attempts made (0 when never started)
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ReportEntry {
    /// Attempts beyond the first.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Ready, or Stopped by intentional teardown during the run.
    pub fn is_clean(&self) -> bool {
        matches!(self.state, RunState::Ready | RunState::Stopped)
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of every service's final state, in topological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub run_id: Uuid,
    pub stack: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub entries: Vec<ReportEntry>,
}

impl DeploymentReport {
    /// Build the report; the outcome is derived from the entries.
    pub fn new(
        run_id: Uuid,
        stack: impl Into<String>,
        started_at: DateTime<Utc>,
        entries: Vec<ReportEntry>,
        cancelled: bool,
    ) -> Self {
        let outcome = if cancelled {
            RunOutcome::Cancelled
        } else if entries.iter().all(ReportEntry::is_clean) {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        };

        Self { run_id, stack: stack.into(), started_at, finished_at: Utc::now(), outcome, entries }
    }

    /// Look up the entry for a service.
    pub fn entry(&self, service: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.service == service)
    }

    /// Process exit status: 0 when every service settled cleanly, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::Succeeded => 0,
            RunOutcome::Failed | RunOutcome::Cancelled => 1,
        }
    }

    /// Services that failed, with their failure detail.
    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.state == RunState::Failed)
    }

    pub fn total_duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}
