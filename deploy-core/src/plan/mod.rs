//! Deployment plans.
//!
//! A plan is loaded once per run: parsed from YAML, interpolated against the
//! secrets, converted into [`ServiceSpec`]s and validated into a
//! [`DependencyGraph`]. Every error raised here happens before any side effect.

mod parser;
mod types;

pub use types::{CertificateEntry, EnvValue, Environment, PlanFile, RoleName, ServiceEntry};

use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::types::ServiceSpec;
use std::path::PathBuf;

/// A validated deployment plan.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    /// Stack name
    pub name: String,
    pub network: Option<String>,
    /// File the plan was read from, if any
    pub source: Option<PathBuf>,
    graph: DependencyGraph,
}

impl DeploymentPlan {
    /// Wrap a graph assembled in code. The graph is validated when the plan
    /// is run, not here.
    pub fn from_graph(name: impl Into<String>, graph: DependencyGraph) -> Self {
        Self { name: name.into(), network: None, source: None, graph }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Services in the order they will be started.
    pub fn order(&self) -> Result<Vec<&ServiceSpec>> {
        self.graph.topological_order()
    }

    /// The certificate issuance node, if the plan has one.
    pub fn certificate_node(&self) -> Option<&ServiceSpec> {
        self.graph.specs().iter().find(|s| s.is_certificate())
    }
}
