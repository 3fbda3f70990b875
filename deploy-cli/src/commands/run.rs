//! `deploy run` command

use super::{first_line, paint};
use crate::context::Context;
use crate::signal;
use anyhow::{Context as _, Result};
use colored::Colorize;
use deploy_core::{DeploymentReport, RunOutcome};
use std::path::Path;
use std::process::ExitCode;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "SERVICE")]
    service: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "ATTEMPTS")]
    attempts: u32,
    #[tabled(rename = "DURATION")]
    duration: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

/// Deploy the plan and print the report. The exit code reflects the outcome.
pub async fn run(
    plan_path: &Path,
    secrets: Option<&Path>,
    json: bool,
    concurrency: Option<usize>,
) -> Result<ExitCode> {
    let ctx = Context::load(plan_path, secrets)?;
    let mut orchestrator = ctx.orchestrator()?;
    if let Some(limit) = concurrency {
        orchestrator = orchestrator.with_max_concurrency(limit);
    }

    if !json {
        let order = ctx.plan.order()?;
        let names: Vec<&str> = order.iter().map(|s| s.name.as_str()).collect();
        println!(
            "{} Deploying {} ({} services): {}",
            "→".cyan().bold(),
            ctx.plan.name.bold(),
            names.len(),
            names.join(" → ").dimmed()
        );
        println!();
    }

    let cancel = signal::cancel_on_signal();
    let report = orchestrator.run(&ctx.plan, cancel).await.context("Deployment could not start")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(ExitCode::from(report.exit_code() as u8))
}

fn print_report(report: &DeploymentReport) {
    let rows: Vec<ReportRow> = report
        .entries
        .iter()
        .map(|entry| ReportRow {
            service: entry.service.clone(),
            state: paint(Some(entry.state)),
            attempts: entry.attempts,
            duration: format_ms(entry.duration_ms),
            detail: match (&entry.error, &entry.note) {
                (Some(error), _) => format!("{}: {}", error.stage, first_line(&error.message)),
                (None, Some(note)) => note.clone(),
                (None, None) => String::new(),
            },
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);
    println!();

    let total = format_ms(report.total_duration_ms());
    match report.outcome {
        RunOutcome::Succeeded => {
            println!("{} Stack {} is up ({})", "✓".green().bold(), report.stack.bold(), total);
        }
        RunOutcome::Failed => {
            println!("{} Deployment of {} failed ({})", "✗".red().bold(), report.stack.bold(), total);
            for entry in report.failures() {
                if let Some(error) = &entry.error {
                    println!();
                    println!("{} {}", entry.service.bold(), format!("({})", error.stage).dimmed());
                    for line in error.message.lines() {
                        println!("  {}", line);
                    }
                }
            }
        }
        RunOutcome::Cancelled => {
            println!(
                "{} Deployment of {} cancelled ({}); started services were left running",
                "⚠".yellow().bold(),
                report.stack.bold(),
                total
            );
        }
    }
    println!("{}", format!("run {}", report.run_id).dimmed());
}

fn format_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}
