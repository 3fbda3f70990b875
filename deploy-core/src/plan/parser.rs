//! Plan file parser and validation.

use super::types::{CertificateEntry, PlanFile, RoleName, ServiceEntry};
use super::DeploymentPlan;
use crate::config::{Config, Secret, Secrets};
use crate::error::{DeployError, Result};
use crate::graph::DependencyGraph;
use crate::paths;
use crate::types::{CertificateSpec, PortMapping, ServiceRole, ServiceSpec};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

fn invalid(reason: impl Into<String>) -> DeployError {
    DeployError::PlanInvalid { reason: reason.into() }
}

impl DeploymentPlan {
    /// Read and validate the plan at `path`.
    ///
    /// Relative paths in the plan resolve against the plan's directory.
    #[instrument(skip(secrets, config))]
    pub fn load(path: &Path, secrets: &Secrets, config: &Config) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DeployError::PlanParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut plan = Self::parse_inner(&content, path, base_dir, secrets, config)?;
        plan.source = Some(path.to_path_buf());
        Ok(plan)
    }

    /// Parse a plan from a string.
    pub fn parse(content: &str, base_dir: &Path, secrets: &Secrets, config: &Config) -> Result<Self> {
        Self::parse_inner(content, Path::new("<inline>"), base_dir, secrets, config)
    }

    fn parse_inner(
        content: &str,
        origin: &Path,
        base_dir: &Path,
        secrets: &Secrets,
        config: &Config,
    ) -> Result<Self> {
        let file: PlanFile = serde_yaml::from_str(content).map_err(|e| {
            DeployError::PlanParseError { path: origin.to_path_buf(), reason: e.to_string() }
        })?;

        if file.name.trim().is_empty() {
            return Err(invalid("stack name must not be empty"));
        }
        if file.services.is_empty() {
            return Err(invalid("no services defined"));
        }

        let cert_entries: Vec<(&str, &CertificateEntry)> = file
            .services
            .iter()
            .filter_map(|s| s.certificate.as_ref().map(|c| (s.name.as_str(), c)))
            .collect();
        if cert_entries.len() > 1 {
            let names: Vec<&str> = cert_entries.iter().map(|(n, _)| *n).collect();
            return Err(invalid(format!(
                "at most one certificate node is allowed, found: {}",
                names.join(", ")
            )));
        }
        let temp_proxy = cert_entries.first().map(|(_, c)| c.temp_proxy.as_str());

        let specs = file
            .services
            .iter()
            .map(|entry| convert_service(entry, temp_proxy, base_dir, secrets, config))
            .collect::<Result<Vec<_>>>()?;

        let graph = DependencyGraph::from_specs(specs)?;
        graph.order_indices()?;
        validate_certificate(&graph)?;

        info!(stack = %file.name, services = graph.len(), "Plan loaded");
        Ok(Self { name: file.name, network: file.network, source: None, graph })
    }
}

fn convert_service(
    entry: &ServiceEntry,
    temp_proxy: Option<&str>,
    base_dir: &Path,
    secrets: &Secrets,
    config: &Config,
) -> Result<ServiceSpec> {
    let name = entry.name.trim();
    if name.is_empty() {
        return Err(invalid("service name must not be empty"));
    }
    let ctx = |what: String| invalid(format!("service '{}': {}", name, what));

    let ports = entry
        .ports
        .iter()
        .map(|p| PortMapping::parse(p))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(ctx)?;

    let mut environment = BTreeMap::new();
    for (key, raw) in entry.environment.to_map().map_err(ctx)? {
        let value = secrets
            .interpolate(&raw)
            .map_err(|e| ctx(format!("environment {}: {}", key, e)))?;
        environment.insert(key, Secret::new(value));
    }

    let poll_interval =
        entry.poll_interval_ms.map(Duration::from_millis).unwrap_or_else(|| config.poll_interval());
    if poll_interval.is_zero() {
        return Err(ctx("poll interval must be greater than zero".to_string()));
    }

    let role = match (&entry.certificate, entry.role) {
        (Some(_), Some(_)) => {
            return Err(ctx("a certificate node cannot also declare a role".to_string()))
        }
        (Some(cert), None) => {
            if entry.image.is_some() || !entry.ports.is_empty() || entry.readiness.is_some() {
                return Err(ctx(
                    "a certificate node runs no container: image, ports and readiness are not allowed"
                        .to_string(),
                ));
            }
            ServiceRole::Certificate(certificate_spec(cert, base_dir, secrets).map_err(ctx)?)
        }
        (None, role) => {
            if entry.image.as_deref().map_or(true, |i| i.trim().is_empty()) {
                return Err(ctx("missing image".to_string()));
            }
            match role {
                Some(RoleName::ChallengeProxy) if temp_proxy != Some(name) => {
                    return Err(ctx(
                        "declared challenge-proxy but no certificate node uses it".to_string(),
                    ));
                }
                Some(RoleName::ChallengeProxy) => ServiceRole::ChallengeProxy,
                _ if temp_proxy == Some(name) => ServiceRole::ChallengeProxy,
                _ => ServiceRole::Service,
            }
        }
    };

    Ok(ServiceSpec {
        name: name.to_string(),
        image: entry.image.clone(),
        command: entry.command.clone(),
        ports,
        environment,
        volumes: entry.volumes.clone(),
        depends_on: entry.depends_on.clone(),
        readiness: entry.readiness.clone(),
        timeout: entry.timeout_secs.map(Duration::from_secs).unwrap_or_else(|| config.default_timeout()),
        poll_interval,
        retries: entry.retries.unwrap_or(config.default_retries),
        restart: entry.restart,
        role,
    })
}

fn certificate_spec(
    entry: &CertificateEntry,
    base_dir: &Path,
    secrets: &Secrets,
) -> std::result::Result<CertificateSpec, String> {
    let domains = match secrets.domains() {
        from_env if !from_env.is_empty() => from_env,
        _ => entry.domains.clone(),
    };
    if domains.is_empty() {
        return Err("no domains: set certificate.domains or DEPLOY_DOMAINS".to_string());
    }
    if entry.temp_proxy == entry.final_proxy {
        return Err(format!("'{}' cannot be both the temporary and the final proxy", entry.temp_proxy));
    }

    let resolve = |p: &PathBuf| paths::resolve_relative(base_dir, p);
    Ok(CertificateSpec {
        temp_proxy: entry.temp_proxy.clone(),
        final_proxy: entry.final_proxy.clone(),
        webroot: resolve(&entry.webroot),
        cert_dir: resolve(&entry.cert_dir),
        domains,
        email: secrets.acme_email().map(str::to_string).or_else(|| entry.email.clone()),
        staging: entry.staging,
    })
}

/// Check the proxies around the certificate node against the graph shape.
fn validate_certificate(graph: &DependencyGraph) -> Result<()> {
    let Some((cert_idx, cert_node, cert)) = graph
        .specs()
        .iter()
        .enumerate()
        .find_map(|(i, s)| s.certificate().map(|c| (i, s, c)))
    else {
        return Ok(());
    };

    let lookup = |name: &str, what: &str| {
        graph.index_of(name).ok_or_else(|| {
            invalid(format!("certificate node '{}': {} '{}' does not exist", cert_node.name, what, name))
        })
    };
    let temp_idx = lookup(&cert.temp_proxy, "temp_proxy")?;
    let final_idx = lookup(&cert.final_proxy, "final_proxy")?;

    if !graph.ancestors(cert_idx).contains(&temp_idx) {
        return Err(invalid(format!(
            "temp proxy '{}' must be a dependency of certificate node '{}'",
            cert.temp_proxy, cert_node.name
        )));
    }
    if !graph.descendants(cert_idx).contains(&final_idx) {
        return Err(invalid(format!(
            "final proxy '{}' must depend on certificate node '{}'",
            cert.final_proxy, cert_node.name
        )));
    }
    Ok(())
}
