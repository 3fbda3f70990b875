//! `deploy validate` command

use crate::context::Context;
use anyhow::Result;
use colored::Colorize;
use deploy_core::types::ServiceRole;
use std::path::Path;

/// Load the plan without touching the runtime and print the start order.
pub fn validate(plan_path: &Path, secrets: Option<&Path>) -> Result<()> {
    let ctx = Context::load(plan_path, secrets)?;
    let order = ctx.plan.order()?;

    println!("{} Plan {} is valid", "✓".green().bold(), ctx.plan.name.bold());
    println!();
    for (position, spec) in order.iter().enumerate() {
        let kind = match &spec.role {
            ServiceRole::Service => spec.image.clone().unwrap_or_default(),
            ServiceRole::ChallengeProxy => {
                format!("{} (challenge proxy)", spec.image.as_deref().unwrap_or_default())
            }
            ServiceRole::Certificate(cert) => format!("certificate for {}", cert.domains.join(", ")),
        };
        let after = if spec.depends_on.is_empty() {
            String::new()
        } else {
            format!("after {}", spec.depends_on.join(", "))
        };
        println!("  {:>2}. {} {} {}", position + 1, spec.name.bold(), kind.dimmed(), after.dimmed());
    }

    Ok(())
}
