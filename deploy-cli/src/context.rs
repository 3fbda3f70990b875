//! Shared setup for every subcommand: configuration, secrets, the plan, and
//! the production collaborators behind the orchestrator.

use anyhow::{Context as _, Result};
use deploy_core::command::CommandRunner;
use deploy_core::{
    CertbotClient, Config, DbCredentials, DeploymentPlan, DockerRuntime, NetworkChecker,
    Orchestrator, Secrets,
};
use std::path::Path;
use std::sync::Arc;

pub struct Context {
    pub config: Config,
    pub plan: DeploymentPlan,
    secrets: Secrets,
}

impl Context {
    /// Load configuration, start logging, read secrets once and load the plan.
    pub fn load(plan_path: &Path, secrets_file: Option<&Path>) -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        deploy_core::init_observability(config.log_json);

        let secrets = Secrets::load(secrets_file).context("Failed to load secrets")?;
        let plan = DeploymentPlan::load(plan_path, &secrets, &config)
            .with_context(|| format!("Invalid plan {}", plan_path.display()))?;

        Ok(Self { config, plan, secrets })
    }

    /// Orchestrator wired to docker, live network checks and certbot.
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let runner = CommandRunner::new(self.config.command_timeout());

        let runtime =
            DockerRuntime::new(self.config.docker_binary.clone(), runner.clone(), self.plan.name.clone())
                .with_network(self.plan.network.clone());
        let checker = NetworkChecker::new(DbCredentials::from_secrets(&self.secrets))
            .context("Failed to set up readiness checks")?;
        let acme = CertbotClient::new(self.config.acme_command.clone(), runner)
            .context("Invalid ACME client command")?;

        Ok(Orchestrator::new(Arc::new(runtime), Arc::new(checker), Arc::new(acme), &self.config))
    }
}
