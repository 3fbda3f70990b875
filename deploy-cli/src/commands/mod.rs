//! CLI command implementations

mod logs;
mod run;
mod status;
mod teardown;
mod validate;

pub use logs::logs;
pub use run::run;
pub use status::status;
pub use teardown::teardown;
pub use validate::validate;

use colored::Colorize;
use deploy_core::RunState;

/// Colored state label; `None` means the runtime could not be asked.
fn paint(state: Option<RunState>) -> String {
    match state {
        Some(RunState::Ready) => "ready".green().to_string(),
        Some(RunState::Stopped) => "stopped".blue().to_string(),
        Some(RunState::Failed) => "failed".red().to_string(),
        Some(RunState::Starting) => "starting".yellow().to_string(),
        Some(RunState::Pending) => "pending".dimmed().to_string(),
        None => "unknown".red().dimmed().to_string(),
    }
}

/// First line of a possibly long diagnostic, for table cells.
fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > 80 {
        format!("{}…", line.chars().take(79).collect::<String>())
    } else {
        line.to_string()
    }
}
