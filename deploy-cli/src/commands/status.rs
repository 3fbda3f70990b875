//! `deploy status` command

use super::{first_line, paint};
use crate::context::Context;
use anyhow::Result;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "SERVICE")]
    service: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

/// Query the runtime and the certificate store for every service.
pub async fn status(plan_path: &Path, secrets: Option<&Path>, json: bool) -> Result<()> {
    let ctx = Context::load(plan_path, secrets)?;
    let statuses = ctx.orchestrator()?.status(&ctx.plan).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    let rows: Vec<StatusRow> = statuses
        .into_iter()
        .map(|s| StatusRow {
            service: s.service,
            state: paint(s.state),
            detail: s.detail.as_deref().map(first_line).unwrap_or_default(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);

    Ok(())
}
