//! Per-run state table.
//!
//! Owned by the orchestrator's control loop; nothing else writes to it.

use crate::error::{DeployError, Result};
use crate::graph::DependencyGraph;
use crate::types::{FailureDetail, ReportEntry, RunState};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct Row {
    state: RunState,
    attempts: u32,
    started: Option<Instant>,
    settled: Option<Instant>,
    error: Option<FailureDetail>,
    note: Option<String>,
}

pub(crate) struct RunTable {
    names: Vec<String>,
    rows: Vec<Row>,
}

impl RunTable {
    /// Every service starts Pending.
    pub fn new(graph: &DependencyGraph) -> Self {
        let names = graph.specs().iter().map(|s| s.name.clone()).collect::<Vec<_>>();
        let row = Row {
            state: RunState::Pending,
            attempts: 0,
            started: None,
            settled: None,
            error: None,
            note: None,
        };
        Self { rows: vec![row; names.len()], names }
    }

    pub fn state(&self, index: usize) -> RunState {
        self.rows[index].state
    }

    pub fn attempts(&self, index: usize) -> u32 {
        self.rows[index].attempts
    }

    /// Apply a transition, rejecting anything the state machine forbids.
    pub fn transition(&mut self, index: usize, to: RunState) -> Result<()> {
        let row = &mut self.rows[index];
        if !row.state.can_transition_to(to) {
            return Err(DeployError::InvalidTransition {
                service: self.names[index].clone(),
                from: row.state.to_string(),
                to: to.to_string(),
            });
        }
        debug!(service = %self.names[index], from = %row.state, to = %to, "Transition");

        let now = Instant::now();
        if to == RunState::Starting {
            row.attempts += 1;
            row.started.get_or_insert(now);
            row.settled = None;
            row.error = None;
        }
        if to.is_settled() && row.settled.is_none() {
            row.settled = Some(now);
        }
        row.state = to;
        Ok(())
    }

    /// Record the failure detail for the latest attempt.
    pub fn fail(&mut self, index: usize, detail: FailureDetail) -> Result<()> {
        self.transition(index, RunState::Failed)?;
        self.rows[index].error = Some(detail);
        Ok(())
    }

    /// Leave the row in its current state but attach an error.
    pub fn set_error(&mut self, index: usize, detail: FailureDetail) {
        self.rows[index].error = Some(detail);
    }

    /// Override the attempt count (certificate orders count CA calls).
    pub fn set_attempts(&mut self, index: usize, attempts: u32) {
        self.rows[index].attempts = attempts;
    }

    pub fn note(&mut self, index: usize, note: impl Into<String>) {
        self.rows[index].note = Some(note.into());
    }

    pub fn has_note(&self, index: usize) -> bool {
        self.rows[index].note.is_some()
    }

    /// Time since the first start, up to settling (or now).
    pub fn elapsed(&self, index: usize) -> std::time::Duration {
        let row = &self.rows[index];
        match row.started {
            Some(started) => row.settled.unwrap_or_else(Instant::now) - started,
            None => std::time::Duration::ZERO,
        }
    }

    /// Report entries in the given order.
    pub fn into_entries(self, order: &[usize]) -> Vec<ReportEntry> {
        order
            .iter()
            .map(|&i| {
                let duration_ms = self.elapsed(i).as_millis() as u64;
                let row = &self.rows[i];
                ReportEntry {
                    service: self.names[i].clone(),
                    state: row.state,
                    duration_ms,
                    attempts: row.attempts,
                    error: row.error.clone(),
                    note: row.note.clone(),
                }
            })
            .collect()
    }
}
