//! Deploy Core Library
//!
//! Dependency-aware deployment orchestration for single-host container
//! stacks: plan loading, readiness probing, certificate provisioning and the
//! run/status/teardown operations behind the `deploy` CLI.

pub mod certs;
pub mod command;
pub mod config;
pub mod error;
pub mod graph;
pub mod observability;
pub mod orchestrator;
pub mod paths;
pub mod plan;
pub mod probe;
pub mod runtime;
pub mod types;

// Re-export commonly used items
pub use certs::{AcmeClient, CertbotClient, CertificateManager};
pub use config::{Config, Secrets};
pub use error::{DeployError, Result};
pub use graph::DependencyGraph;
pub use observability::init as init_observability;
pub use orchestrator::{Orchestrator, ServiceStatus};
pub use plan::DeploymentPlan;
pub use probe::{DbCredentials, HealthProbe, NetworkChecker, ReadinessChecker};
pub use runtime::{ContainerRuntime, DockerRuntime, ServiceHandle};
pub use types::{DeploymentReport, RunOutcome, RunState, ServiceSpec};
