use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use deploy_core::DeployError;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod context;
mod signal;

/// Exit status for an unusable plan (parse error, invalid reference, cycle).
const EXIT_PLAN_INVALID: u8 = 2;

#[derive(Parser)]
#[command(name = "deploy")]
#[command(about = "Dependency-aware deployment orchestrator for container stacks", long_about = None)]
struct Cli {
    /// Plan file
    #[arg(short, long, global = true, default_value = "deploy.yaml")]
    file: PathBuf,

    /// KEY=VALUE secrets file (process environment wins)
    #[arg(long, global = true)]
    secrets: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the stack up in dependency order
    Run {
        /// Plan file (overrides --file)
        plan: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Maximum services started concurrently
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Show the live state of every service
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stop every service in reverse dependency order
    Teardown,

    /// Check a plan and print the resolved start order
    Validate {
        /// Plan file (overrides --file)
        plan: Option<PathBuf>,
    },

    /// Show recent output of a service
    Logs {
        /// Service name
        service: String,

        /// Number of lines from the end
        #[arg(short = 'n', long, default_value = "100")]
        tail: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            let plan_error = e
                .chain()
                .any(|cause| cause.downcast_ref::<DeployError>().is_some_and(DeployError::is_plan_error));
            if plan_error {
                ExitCode::from(EXIT_PLAN_INVALID)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let secrets = cli.secrets.as_deref();

    match cli.command {
        Commands::Run { plan, json, concurrency } => {
            let plan = plan.unwrap_or(cli.file);
            commands::run(&plan, secrets, json, concurrency).await
        }

        Commands::Status { json } => {
            commands::status(&cli.file, secrets, json).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Teardown => commands::teardown(&cli.file, secrets).await,

        Commands::Validate { plan } => {
            let plan = plan.unwrap_or(cli.file);
            commands::validate(&plan, secrets)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Logs { service, tail } => {
            commands::logs(&cli.file, secrets, &service, tail).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
