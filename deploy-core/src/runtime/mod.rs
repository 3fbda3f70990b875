//! Container runtime abstraction.
//!
//! The orchestrator never talks to a container engine directly. It goes
//! through the [`ContainerRuntime`] trait:
//! - [`DockerRuntime`]: drives the `docker` CLI (primary)
//! - test doubles implement the trait in-process
//!
//! [`ServiceHandle`] layers the idempotent start/stop/status contract on top.

use crate::error::Result;
use crate::types::ServiceSpec;
use async_trait::async_trait;

mod docker;
mod handle;

pub use docker::DockerRuntime;
pub use handle::{ServiceHandle, StartOutcome};

/// Observed state of a named instance in the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    /// No instance with that name exists
    Missing,
    /// Created but never started
    Created,
    Running,
    Restarting,
    Paused,
    /// Process exited with the given code
    Exited { code: i32 },
    Dead,
}

impl InstanceState {
    /// Whether the instance currently holds its resources (ports, names).
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Restarting | Self::Paused)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Restarting => write!(f, "restarting"),
            Self::Paused => write!(f, "paused"),
            Self::Exited { code } => write!(f, "exited ({})", code),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// Container runtime client.
///
/// Implementations are called concurrently for different names; the runtime
/// itself serializes operations on the same name.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// One-time preparation before the first start of a run (e.g. creating
    /// the stack network). Must be idempotent.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Launch an instance of `spec` under `name`.
    ///
    /// Errors carry the runtime's diagnostic text verbatim.
    async fn start(&self, name: &str, spec: &ServiceSpec) -> Result<()>;

    /// Stop the instance. Stopping a missing or stopped instance succeeds.
    async fn stop(&self, name: &str) -> Result<()>;

    /// Query the instance state.
    async fn status(&self, name: &str) -> Result<InstanceState>;

    /// Last `tail` lines of the instance's output.
    async fn logs(&self, name: &str, tail: usize) -> Result<String>;

    /// Runtime name (for logging).
    fn name(&self) -> &str;
}
