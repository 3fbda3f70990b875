//! Deployment orchestration.
//!
//! The [`Orchestrator`] walks the plan's dependency graph. Services whose
//! dependencies are all Ready are started concurrently, bounded by the
//! configured limit, and every start is followed by a readiness wait. A
//! failure is contained to the failed service's dependents unless the
//! service sits on the path to certificate issuance, which aborts the run.
//!
//! The run table is owned by the control loop below. Jobs report back
//! through the [`JoinSet`] and never mutate state themselves.

mod table;
mod task;

use crate::certs::{AcmeClient, CertificateManager};
use crate::config::Config;
use crate::error::{DeployError, Result};
use crate::graph::DependencyGraph;
use crate::observability::metrics;
use crate::plan::DeploymentPlan;
use crate::probe::{HealthProbe, ReadinessChecker};
use crate::runtime::{ContainerRuntime, ServiceHandle};
use crate::types::{
    DeploymentReport, FailureDetail, FailureStage, RunState, ServiceRole, ServiceSpec,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use table::RunTable;
use task::{Job, JobOutcome, JobResult, Workers};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Live state of one service, as reported by `status` and `teardown`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service: String,
    /// `None` when the runtime could not be queried
    pub state: Option<RunState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Drives a deployment plan to completion.
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    workers: Workers,
    max_concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        checker: Arc<dyn ReadinessChecker>,
        acme: Arc<dyn AcmeClient>,
        config: &Config,
    ) -> Self {
        let handle = ServiceHandle::new(runtime.clone());
        let probe = HealthProbe::new(checker);
        let certs = Arc::new(CertificateManager::new(
            handle.clone(),
            probe.clone(),
            acme,
            config.certificate_validity_days,
            config.renew_before_days,
        ));

        Self {
            runtime,
            workers: Workers { handle, probe, certs },
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Override the number of services started concurrently.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Deploy `plan`.
    ///
    /// Returns `Err` only when nothing could be attempted (invalid plan,
    /// unusable runtime). Service failures are part of the report.
    #[instrument(skip_all, fields(stack = %plan.name))]
    pub async fn run(
        &self,
        plan: &DeploymentPlan,
        cancel: CancellationToken,
    ) -> Result<DeploymentReport> {
        let graph = plan.graph();
        let order = graph.order_indices()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, services = graph.len(), max_concurrency = self.max_concurrency, "Starting deployment");

        self.runtime.prepare().await?;

        let mut walk = Walk::new(graph, &order);
        let mut jobs: JoinSet<JobResult> = JoinSet::new();

        loop {
            while walk.abort_reason.is_none()
                && !cancel.is_cancelled()
                && jobs.len() < self.max_concurrency
            {
                let Some(Reverse((_, index))) = walk.ready.pop() else {
                    break;
                };
                if let Some(until) = self.challenge_proxy_not_needed(graph, index) {
                    info!(service = %graph.spec(index).name, "Certificate still valid, skipping challenge proxy");
                    walk.table.transition(index, RunState::Stopped)?;
                    walk.table
                        .note(index, format!("not needed: certificate valid until {}", until.format("%Y-%m-%d")));
                    walk.release(index);
                    continue;
                }
                let job = self.job_for(graph, index, 1, false)?;
                walk.table.transition(index, RunState::Starting)?;
                jobs.spawn(self.workers.clone().execute(index, job, cancel.clone()));
            }

            let Some(joined) = jobs.join_next().await else {
                break;
            };
            let JobResult { index, outcome } = joined
                .map_err(|e| DeployError::Internal(format!("service task failed: {}", e)))?;
            let name = graph.spec(index).name.as_str();

            match outcome {
                JobOutcome::Ready { already_running } => {
                    walk.table.transition(index, RunState::Ready)?;
                    if already_running {
                        walk.table.note(index, "already running");
                    }
                    metrics::record_ready(name, walk.table.elapsed(index).as_secs_f64());
                    walk.release(index);
                }

                JobOutcome::Failed(detail) => {
                    let spec = graph.spec(index);
                    let attempts = walk.table.attempts(index);
                    let retry = attempts <= spec.retries
                        && walk.abort_reason.is_none()
                        && !cancel.is_cancelled();
                    let restart = detail.stage == FailureStage::ReadinessTimeout;

                    if retry {
                        warn!(
                            service = name,
                            attempt = attempts,
                            retries = spec.retries,
                            stage = %detail.stage,
                            "Attempt failed, retrying"
                        );
                        walk.table.fail(index, detail)?;
                        let job = self.job_for(graph, index, attempts + 1, restart)?;
                        walk.table.transition(index, RunState::Starting)?;
                        jobs.spawn(self.workers.clone().execute(index, job, cancel.clone()));
                    } else {
                        error!(service = name, stage = %detail.stage, error = %detail.message, "Service failed");
                        metrics::record_failure(name, &detail.stage.to_string());
                        walk.table.fail(index, detail)?;
                        walk.contain(index);
                    }
                }

                JobOutcome::Cancelled(message) => {
                    info!(service = name, "Cancelled in flight");
                    walk.table
                        .set_error(index, FailureDetail { stage: FailureStage::Cancelled, message });
                }

                JobOutcome::Certificate(outcome) => {
                    let temp = graph
                        .spec(index)
                        .certificate()
                        .and_then(|c| graph.index_of(&c.temp_proxy));
                    if let Some(temp) = temp {
                        if outcome.temp_proxy_stopped && walk.table.state(temp) == RunState::Ready {
                            walk.table.transition(temp, RunState::Stopped)?;
                            walk.table.note(temp, "retired after certificate issuance");
                        }
                    }
                    walk.table.set_attempts(index, outcome.acme_attempts.max(1));

                    if outcome.is_ready() {
                        walk.table.transition(index, RunState::Ready)?;
                        if let Some(record) = &outcome.record {
                            let how = if outcome.reused { "reused" } else { "issued" };
                            walk.table.note(
                                index,
                                format!("certificate {}, expires {}", how, record.expires_at.format("%Y-%m-%d")),
                            );
                        }
                        walk.release(index);
                    } else {
                        let detail = outcome.error.unwrap_or(FailureDetail {
                            stage: FailureStage::ChallengeFailed,
                            message: "certificate manager aborted".to_string(),
                        });
                        if detail.stage == FailureStage::Cancelled {
                            walk.table.set_error(index, detail);
                        } else {
                            error!(service = name, stage = %detail.stage, "Certificate issuance aborted");
                            metrics::record_failure(name, &detail.stage.to_string());
                            walk.table.fail(index, detail)?;
                            walk.contain(index);
                        }
                    }
                }
            }
        }

        walk.annotate_unstarted(cancel.is_cancelled());
        let entries = walk.table.into_entries(&order);
        let cancelled = cancel.is_cancelled() && entries.iter().any(|e| !e.is_clean());
        let report = DeploymentReport::new(run_id, plan.name.clone(), started_at, entries, cancelled);

        info!(
            %run_id,
            outcome = %report.outcome,
            failed = report.failures().count(),
            duration_ms = report.total_duration_ms(),
            "Deployment finished"
        );
        Ok(report)
    }

    fn job_for(
        &self,
        graph: &DependencyGraph,
        index: usize,
        attempt: u32,
        restart: bool,
    ) -> Result<Job> {
        let spec = graph.spec(index);
        let lookup = |name: &str| -> Result<ServiceSpec> {
            graph
                .get(name)
                .cloned()
                .ok_or_else(|| DeployError::Internal(format!("service '{}' vanished from plan", name)))
        };

        if let Some(cert) = spec.certificate() {
            return Ok(Job::Certificate {
                cert: cert.clone(),
                temp_proxy: lookup(&cert.temp_proxy)?,
                final_proxy: lookup(&cert.final_proxy)?,
            });
        }

        let port_guard = match spec.role {
            ServiceRole::ChallengeProxy => graph
                .specs()
                .iter()
                .find_map(|s| s.certificate())
                .map(|c| lookup(&c.final_proxy))
                .transpose()?,
            _ => None,
        };
        Ok(Job::Service { spec: spec.clone(), attempt, restart, port_guard })
    }

    /// Expiry of the stored certificate when `index` is a challenge proxy
    /// whose certificate needs no renewal.
    fn challenge_proxy_not_needed(&self, graph: &DependencyGraph, index: usize) -> Option<DateTime<Utc>> {
        if graph.spec(index).role != ServiceRole::ChallengeProxy {
            return None;
        }
        let cert = graph.specs().iter().find_map(|s| s.certificate())?;
        self.workers
            .certs
            .store(cert)
            .find_valid(&cert.domains, Utc::now())
            .map(|record| record.expires_at)
    }

    /// Live state of every service in start order.
    ///
    /// The certificate node reports on the stored certificate instead.
    pub async fn status(&self, plan: &DeploymentPlan) -> Result<Vec<ServiceStatus>> {
        let mut statuses = Vec::new();
        for spec in plan.order()? {
            let status = match spec.certificate() {
                Some(cert) => {
                    let store = self.workers.certs.store(cert);
                    let primary = cert.domains.first().map(String::as_str).unwrap_or_default();
                    let now = Utc::now();
                    match store.load(primary) {
                        Ok(Some(record)) => {
                            let valid = store.find_valid(&cert.domains, now).is_some();
                            ServiceStatus {
                                service: spec.name.clone(),
                                state: Some(if valid { RunState::Ready } else { RunState::Pending }),
                                detail: Some(format!(
                                    "{}expires {} ({} days)",
                                    if valid { "" } else { "renewal due: " },
                                    record.expires_at.format("%Y-%m-%d"),
                                    record.days_remaining(now)
                                )),
                            }
                        }
                        Ok(None) => ServiceStatus {
                            service: spec.name.clone(),
                            state: Some(RunState::Pending),
                            detail: Some("no certificate issued".to_string()),
                        },
                        Err(e) => ServiceStatus {
                            service: spec.name.clone(),
                            state: None,
                            detail: Some(e.to_string()),
                        },
                    }
                }
                None => match self.workers.handle.status(spec).await {
                    Ok(state) => ServiceStatus { service: spec.name.clone(), state: Some(state), detail: None },
                    Err(e) => ServiceStatus {
                        service: spec.name.clone(),
                        state: None,
                        detail: Some(e.to_string()),
                    },
                },
            };
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// Stop every container in reverse start order.
    ///
    /// Keeps going past individual failures; each is reported in the result.
    #[instrument(skip_all, fields(stack = %plan.name))]
    pub async fn teardown(&self, plan: &DeploymentPlan) -> Result<Vec<ServiceStatus>> {
        let mut order = plan.order()?;
        order.reverse();

        let mut results = Vec::new();
        for spec in order.into_iter().filter(|s| !s.is_certificate()) {
            let status = match self.workers.handle.stop(spec).await {
                Ok(state) => ServiceStatus { service: spec.name.clone(), state: Some(state), detail: None },
                Err(e) => {
                    error!(service = %spec.name, error = %e, "Stop failed");
                    ServiceStatus { service: spec.name.clone(), state: None, detail: Some(e.to_string()) }
                }
            };
            results.push(status);
        }
        info!(stopped = results.iter().filter(|r| r.state.is_some()).count(), "Teardown finished");
        Ok(results)
    }

    /// Recent output of one service.
    pub async fn logs(&self, plan: &DeploymentPlan, service: &str, tail: usize) -> Result<String> {
        let spec = plan
            .graph()
            .get(service)
            .filter(|s| !s.is_certificate())
            .ok_or_else(|| DeployError::PlanInvalid {
                reason: format!("no container service named '{}' in plan", service),
            })?;
        self.workers.handle.logs(spec, tail).await
    }
}

/// Bookkeeping for one topological walk.
struct Walk<'a> {
    graph: &'a DependencyGraph,
    table: RunTable,
    /// Position of each node in the resolved order
    position: Vec<usize>,
    /// Dependencies not yet Ready
    waiting_on: Vec<usize>,
    /// Eligible nodes, earliest in the order first
    ready: BinaryHeap<Reverse<(usize, usize)>>,
    /// Nodes whose failure aborts the run
    critical: HashSet<usize>,
    abort_reason: Option<String>,
}

impl<'a> Walk<'a> {
    fn new(graph: &'a DependencyGraph, order: &[usize]) -> Self {
        let mut position = vec![0; graph.len()];
        for (pos, &index) in order.iter().enumerate() {
            position[index] = pos;
        }

        let waiting_on: Vec<usize> = (0..graph.len()).map(|i| graph.dependencies(i).len()).collect();
        let ready = (0..graph.len())
            .filter(|&i| waiting_on[i] == 0)
            .map(|i| Reverse((position[i], i)))
            .collect();

        let critical = match graph.specs().iter().position(|s| s.is_certificate()) {
            Some(cert) => {
                let mut nodes = graph.ancestors(cert);
                nodes.insert(cert);
                nodes
            }
            None => HashSet::new(),
        };

        Self {
            graph,
            table: RunTable::new(graph),
            position,
            waiting_on,
            ready,
            critical,
            abort_reason: None,
        }
    }

    /// `index` is Ready: dependents with nothing else outstanding become eligible.
    fn release(&mut self, index: usize) {
        for &dependent in self.graph.dependents(index) {
            self.waiting_on[dependent] -= 1;
            if self.waiting_on[dependent] == 0 {
                self.ready.push(Reverse((self.position[dependent], dependent)));
            }
        }
    }

    /// `index` failed for good. Its dependents stay Pending; a failure on the
    /// path to certificate issuance stops all further starts.
    fn contain(&mut self, index: usize) {
        let graph = self.graph;
        let name = &graph.spec(index).name;
        for dependent in graph.descendants(index) {
            if self.table.state(dependent) == RunState::Pending && !self.table.has_note(dependent) {
                self.table.note(dependent, format!("blocked: dependency '{}' failed", name));
            }
        }

        if self.critical.contains(&index) && self.abort_reason.is_none() {
            warn!(service = %name, "Failure on the certificate path, aborting remaining starts");
            self.abort_reason = Some(format!("'{}' failed on the certificate path", name));
        }
    }

    /// Explain why services that never started were left alone.
    fn annotate_unstarted(&mut self, cancelled: bool) {
        let reason = if cancelled {
            Some("not started: run cancelled".to_string())
        } else {
            self.abort_reason.as_ref().map(|r| format!("not started: run aborted ({})", r))
        };
        let Some(reason) = reason else {
            return;
        };
        for index in 0..self.graph.len() {
            if self.table.state(index) == RunState::Pending && !self.table.has_note(index) {
                self.table.note(index, reason.clone());
            }
        }
    }
}
