//! `deploy teardown` command

use crate::context::Context;
use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use std::process::ExitCode;

/// Stop every container in reverse dependency order.
pub async fn teardown(plan_path: &Path, secrets: Option<&Path>) -> Result<ExitCode> {
    let ctx = Context::load(plan_path, secrets)?;
    println!("{} Tearing down {}", "→".cyan().bold(), ctx.plan.name.bold());

    let results = ctx.orchestrator()?.teardown(&ctx.plan).await?;

    let mut failed = 0;
    for result in &results {
        match (&result.state, &result.detail) {
            (Some(_), _) => println!("  {} {}", "✓".green(), result.service),
            (None, detail) => {
                failed += 1;
                println!(
                    "  {} {} {}",
                    "✗".red(),
                    result.service,
                    detail.as_deref().unwrap_or_default().dimmed()
                );
            }
        }
    }

    if failed == 0 {
        println!("{} Stack stopped: {}", "✓".green().bold(), ctx.plan.name.bold());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{} {} service(s) could not be stopped", "✗".red().bold(), failed);
        Ok(ExitCode::FAILURE)
    }
}
