//! Core domain types.

pub mod certificate;
pub mod report;
pub mod service;
pub mod state;

// Re-exports
pub use certificate::CertificateRecord;
pub use report::{DeploymentReport, FailureDetail, FailureStage, ReportEntry, RunOutcome};
pub use service::{
    CertificateSpec, PortMapping, Protocol, ReadinessCheck, RestartPolicy, ServiceRole,
    ServiceSpec,
};
pub use state::RunState;
