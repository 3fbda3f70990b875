//! `deploy logs` command

use crate::context::Context;
use anyhow::Result;
use std::path::Path;

/// Print the last `tail` lines of a service's output.
pub async fn logs(plan_path: &Path, secrets: Option<&Path>, service: &str, tail: usize) -> Result<()> {
    let ctx = Context::load(plan_path, secrets)?;
    let output = ctx.orchestrator()?.logs(&ctx.plan, service, tail).await?;
    print!("{}", output);
    if !output.ends_with('\n') {
        println!();
    }
    Ok(())
}
