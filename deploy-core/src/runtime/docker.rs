//! Docker CLI runtime.

use super::{ContainerRuntime, InstanceState};
use crate::command::{CommandOutput, CommandRunner};
use crate::error::{DeployError, Result};
use crate::types::ServiceSpec;
use async_trait::async_trait;
use tracing::{info, instrument};

/// Label carrying the stack name on every container we create.
pub const STACK_LABEL: &str = "deploy.stack";

/// Runtime backed by the `docker` command-line client.
pub struct DockerRuntime {
    binary: String,
    runner: CommandRunner,
    stack: String,
    network: Option<String>,
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>, runner: CommandRunner, stack: impl Into<String>) -> Self {
        Self { binary: binary.into(), runner, stack: stack.into(), network: None }
    }

    /// Attach every started container to `network`.
    pub fn with_network(mut self, network: Option<String>) -> Self {
        self.network = network;
        self
    }

    async fn docker(&self, args: Vec<String>) -> Result<CommandOutput> {
        self.runner.run(&self.binary, &args).await
    }

    /// Arguments for `docker run` creating a fresh container.
    pub(crate) fn run_args(&self, name: &str, spec: &ServiceSpec) -> Result<Vec<String>> {
        let image = spec.image.as_deref().ok_or_else(|| DeployError::StartFailed {
            service: name.to_string(),
            reason: "no image configured".to_string(),
        })?;

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--label".to_string(),
            format!("{}={}", STACK_LABEL, self.stack),
            "--restart".to_string(),
            spec.restart.to_string(),
        ];

        if let Some(network) = &self.network {
            args.extend(["--network".to_string(), network.clone()]);
            args.extend(["--network-alias".to_string(), name.to_string()]);
        }
        for port in &spec.ports {
            args.extend(["-p".to_string(), port.to_publish_arg()]);
        }
        for (key, value) in &spec.environment {
            args.extend(["-e".to_string(), format!("{}={}", key, value.expose())]);
        }
        for volume in &spec.volumes {
            args.extend(["-v".to_string(), volume.clone()]);
        }

        args.push(image.to_string());
        args.extend(spec.command.iter().cloned());
        Ok(args)
    }
}

/// Docker reports a missing object on stderr with varying capitalization.
fn is_missing(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();
    stderr.contains("no such object") || stderr.contains("no such container")
}

/// Parse `docker inspect --format '{{.State.Status}} {{.State.ExitCode}}'`.
fn parse_state(line: &str) -> InstanceState {
    let mut parts = line.split_whitespace();
    let status = parts.next().unwrap_or_default();
    let code = parts.next().and_then(|c| c.parse().ok()).unwrap_or(0);

    match status {
        "created" => InstanceState::Created,
        "running" => InstanceState::Running,
        "restarting" => InstanceState::Restarting,
        "paused" => InstanceState::Paused,
        "exited" => InstanceState::Exited { code },
        "removing" | "dead" => InstanceState::Dead,
        _ => InstanceState::Missing,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn prepare(&self) -> Result<()> {
        let Some(network) = &self.network else {
            return Ok(());
        };

        let inspect = self.docker(vec!["network".into(), "inspect".into(), network.clone()]).await?;
        if inspect.success() {
            return Ok(());
        }

        info!(network = %network, "Creating network");
        let create = self
            .docker(vec![
                "network".into(),
                "create".into(),
                "--label".into(),
                format!("{}={}", STACK_LABEL, self.stack),
                network.clone(),
            ])
            .await?;
        if create.success() {
            Ok(())
        } else {
            Err(DeployError::Runtime(create.diagnostic()))
        }
    }

    #[instrument(skip(self, spec), fields(runtime = "docker"))]
    async fn start(&self, name: &str, spec: &ServiceSpec) -> Result<()> {
        let output = match self.status(name).await? {
            InstanceState::Missing => self.docker(self.run_args(name, spec)?).await?,
            state if state.is_running() => return Ok(()),
            _ => self.docker(vec!["start".into(), name.to_string()]).await?,
        };

        if output.success() {
            Ok(())
        } else {
            Err(DeployError::StartFailed { service: name.to_string(), reason: output.diagnostic() })
        }
    }

    #[instrument(skip(self), fields(runtime = "docker"))]
    async fn stop(&self, name: &str) -> Result<()> {
        let output = self.docker(vec!["stop".into(), name.to_string()]).await?;
        if output.success() || is_missing(&output) {
            Ok(())
        } else {
            Err(DeployError::StopFailed { service: name.to_string(), reason: output.diagnostic() })
        }
    }

    async fn status(&self, name: &str) -> Result<InstanceState> {
        let output = self
            .docker(vec![
                "inspect".into(),
                "--type".into(),
                "container".into(),
                "--format".into(),
                "{{.State.Status}} {{.State.ExitCode}}".into(),
                name.to_string(),
            ])
            .await?;

        if output.success() {
            Ok(parse_state(output.stdout.trim()))
        } else if is_missing(&output) {
            Ok(InstanceState::Missing)
        } else {
            Err(DeployError::Runtime(output.diagnostic()))
        }
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String> {
        let output = self
            .docker(vec!["logs".into(), "--tail".into(), tail.to_string(), name.to_string()])
            .await?;
        if output.success() {
            Ok(output.combined())
        } else {
            Err(DeployError::Runtime(output.diagnostic()))
        }
    }

    fn name(&self) -> &str {
        "docker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use crate::types::{PortMapping, RestartPolicy, ServiceRole};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn runtime() -> DockerRuntime {
        DockerRuntime::new("docker", CommandRunner::new(Duration::from_secs(1)), "pmi")
            .with_network(Some("pmi-net".to_string()))
    }

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "db".to_string(),
            image: Some("mysql:8.0".to_string()),
            command: vec!["--default-authentication-plugin=mysql_native_password".to_string()],
            ports: vec![PortMapping::parse("3306:3306").unwrap()],
            environment: BTreeMap::from([(
                "MYSQL_ROOT_PASSWORD".to_string(),
                Secret::new("pw"),
            )]),
            volumes: vec!["db-data:/var/lib/mysql".to_string()],
            depends_on: vec![],
            readiness: None,
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            retries: 0,
            restart: RestartPolicy::UnlessStopped,
            role: ServiceRole::Service,
        }
    }

    #[test]
    fn test_run_args() {
        let args = runtime().run_args("db", &spec()).unwrap();
        let joined = args.join(" ");
        assert!(joined.starts_with("run -d --name db --label deploy.stack=pmi"));
        assert!(joined.contains("--restart unless-stopped"));
        assert!(joined.contains("--network pmi-net --network-alias db"));
        assert!(joined.contains("-p 3306:3306/tcp"));
        assert!(joined.contains("-e MYSQL_ROOT_PASSWORD=pw"));
        assert!(joined.contains("-v db-data:/var/lib/mysql"));
        // image precedes the command override
        let image_pos = args.iter().position(|a| a == "mysql:8.0").unwrap();
        assert_eq!(args[image_pos + 1], "--default-authentication-plugin=mysql_native_password");
    }

    #[test]
    fn test_run_args_require_image() {
        let mut s = spec();
        s.image = None;
        assert!(matches!(runtime().run_args("db", &s), Err(DeployError::StartFailed { .. })));
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("running 0"), InstanceState::Running);
        assert_eq!(parse_state("exited 137"), InstanceState::Exited { code: 137 });
        assert_eq!(parse_state("created 0"), InstanceState::Created);
        assert_eq!(parse_state(""), InstanceState::Missing);
    }

    #[test]
    fn test_missing_detection() {
        let output = CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "Error: No such object: db".to_string(),
        };
        assert!(is_missing(&output));
    }

    /// Stand-in for the docker CLI that keeps one container's state in a file.
    #[cfg(unix)]
    fn fake_docker(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let state = dir.join("state");
        let calls = dir.join("calls");
        let script = format!(
            r#"#!/bin/sh
echo "$*" >> '{calls}'
case "$1" in
  inspect)
    if [ -f '{state}' ]; then echo "$(cat '{state}') 0"; else echo "Error: No such object: $6" >&2; exit 1; fi ;;
  run)
    echo running > '{state}'; echo 4f2a9c ;;
  start)
    echo running > '{state}'; echo "$2" ;;
  stop)
    if [ -f '{state}' ]; then echo exited > '{state}'; echo "$2"; else echo "Error response from daemon: No such container: $2" >&2; exit 1; fi ;;
esac
"#,
            calls = calls.display(),
            state = state.display(),
        );

        let path = dir.join("docker");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_container_lifecycle_through_cli() {
        use crate::runtime::{ServiceHandle, StartOutcome};
        use crate::types::RunState;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(DockerRuntime::new(
            fake_docker(dir.path()),
            CommandRunner::new(Duration::from_secs(5)),
            "pmi",
        ));
        let handle = ServiceHandle::new(runtime.clone());
        let db = spec();

        // Nothing exists yet: stopping is a no-op
        assert!(runtime.stop("db").await.is_ok());
        assert_eq!(runtime.status("db").await.unwrap(), InstanceState::Missing);

        assert_eq!(handle.start(&db).await, StartOutcome::Started);
        assert_eq!(handle.start(&db).await, StartOutcome::AlreadyRunning);

        assert_eq!(handle.stop(&db).await.unwrap(), RunState::Stopped);
        assert_eq!(runtime.status("db").await.unwrap(), InstanceState::Exited { code: 0 });

        // The stopped container is resumed, not recreated
        assert_eq!(handle.start(&db).await, StartOutcome::Started);
        assert_eq!(runtime.status("db").await.unwrap(), InstanceState::Running);

        let calls = std::fs::read_to_string(dir.path().join("calls")).unwrap();
        let verbs: Vec<&str> =
            calls.lines().filter_map(|l| l.split_whitespace().next()).filter(|v| *v != "inspect").collect();
        assert_eq!(verbs, ["stop", "run", "stop", "start"]);
    }
}
