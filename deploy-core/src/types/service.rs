//! Service domain types.
//!
//! A [`ServiceSpec`] is the validated, immutable form of one entry in the
//! deployment plan. It is produced by the plan loader and never mutated
//! during a run.

use crate::config::Secret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// One managed unit of the stack.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Unique name; also the container name
    pub name: String,

    /// Container image (None for the certificate node)
    pub image: Option<String>,

    /// Optional argv override
    pub command: Vec<String>,

    /// Published ports
    pub ports: Vec<PortMapping>,

    /// Environment after secret interpolation
    pub environment: BTreeMap<String, Secret>,

    /// Volume specs passed through to the runtime (`SRC:DST[:ro]`)
    pub volumes: Vec<String>,

    /// Names of services that must be Ready first
    pub depends_on: Vec<String>,

    /// How to decide the service accepts traffic
    pub readiness: Option<ReadinessCheck>,

    /// Upper bound for one readiness wait
    pub timeout: Duration,

    /// Delay between readiness attempts
    pub poll_interval: Duration,

    /// Additional start attempts after the first failure
    pub retries: u32,

    /// Runtime restart policy
    pub restart: RestartPolicy,

    /// What part the service plays in the deployment
    pub role: ServiceRole,
}

impl ServiceSpec {
    /// Whether this node is the certificate issuance point.
    pub fn is_certificate(&self) -> bool {
        matches!(self.role, ServiceRole::Certificate(_))
    }

    /// The certificate configuration, if this is the issuance node.
    pub fn certificate(&self) -> Option<&CertificateSpec> {
        match &self.role {
            ServiceRole::Certificate(spec) => Some(spec),
            _ => None,
        }
    }

    /// Host ports this service binds.
    pub fn host_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().map(|p| p.host_port)
    }
}

/// Part a node plays in the deployment.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceRole {
    /// Ordinary long-running container
    Service,

    /// Minimal proxy serving only the ACME challenge path; retired after issuance
    ChallengeProxy,

    /// Designated certificate issuance point (no container of its own)
    Certificate(CertificateSpec),
}

/// Certificate issuance settings attached to the certificate node.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateSpec {
    /// Service that serves the webroot during the challenge
    pub temp_proxy: String,

    /// Service that will consume the issued certificate
    pub final_proxy: String,

    /// Directory served at `/.well-known/acme-challenge`
    pub webroot: PathBuf,

    /// Root of the certificate store (certbot layout)
    pub cert_dir: PathBuf,

    /// Names to put on the certificate; the first is the primary
    pub domains: Vec<String>,

    /// Contact address registered with the CA
    pub email: Option<String>,

    /// Use the CA's staging endpoint
    pub staging: bool,
}

/// Readiness check descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReadinessCheck {
    /// TCP connect to `address` (`host:port`)
    Tcp { address: String },

    /// HTTP GET against `url`, expecting `expect_status`
    Http {
        url: String,
        #[serde(default = "default_http_status")]
        expect_status: u16,
    },

    /// Authenticated ping against a MySQL-compatible server
    Database {
        host: String,
        #[serde(default = "default_db_port")]
        port: u16,
        #[serde(default)]
        database: Option<String>,
    },
}

fn default_http_status() -> u16 {
    200
}

fn default_db_port() -> u16 {
    3306
}

impl ReadinessCheck {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Http { .. } => "http",
            Self::Database { .. } => "database",
        }
    }
}

impl std::fmt::Display for ReadinessCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { address } => write!(f, "tcp://{}", address),
            Self::Http { url, expect_status } => write!(f, "{} (expect {})", url, expect_status),
            Self::Database { host, port, database } => match database {
                Some(db) => write!(f, "mysql://{}:{}/{}", host, port, db),
                None => write!(f, "mysql://{}:{}", host, port),
            },
        }
    }
}

/// Container restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::No => write!(f, "no"),
            Self::Always => write!(f, "always"),
            Self::OnFailure => write!(f, "on-failure"),
            Self::UnlessStopped => write!(f, "unless-stopped"),
        }
    }
}

/// Transport protocol of a published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// Published port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Optional host interface (e.g. 127.0.0.1)
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    /// Parse `[IP:]HOST:CONTAINER[/proto]` or `PORT[/proto]`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let (ports, protocol) = match spec.rsplit_once('/') {
            Some((ports, proto)) => {
                let protocol = match proto.to_lowercase().as_str() {
                    "tcp" => Protocol::Tcp,
                    "udp" => Protocol::Udp,
                    other => return Err(format!("unknown protocol '{}' in '{}'", other, spec)),
                };
                (ports, protocol)
            }
            None => (spec, Protocol::Tcp),
        };

        let parse_port = |s: &str| {
            s.parse::<u16>().map_err(|_| format!("invalid port '{}' in '{}'", s, spec))
        };

        let parts: Vec<&str> = ports.split(':').collect();
        let (host_ip, host_port, container_port) = match parts.as_slice() {
            [port] => {
                let port = parse_port(port)?;
                (None, port, port)
            }
            [host, container] => (None, parse_port(host)?, parse_port(container)?),
            [ip, host, container] => {
                (Some(ip.to_string()), parse_port(host)?, parse_port(container)?)
            }
            _ => return Err(format!("invalid port spec '{}'", spec)),
        };

        Ok(Self { host_ip, host_port, container_port, protocol })
    }

    /// Render in `docker run -p` syntax.
    pub fn to_publish_arg(&self) -> String {
        let proto = match self.protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        match &self.host_ip {
            Some(ip) => format!("{}:{}:{}/{}", ip, self.host_port, self.container_port, proto),
            None => format!("{}:{}/{}", self.host_port, self.container_port, proto),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ports() {
        let m = PortMapping::parse("8080:80").unwrap();
        assert_eq!((m.host_port, m.container_port, m.protocol), (8080, 80, Protocol::Tcp));

        let m = PortMapping::parse("53:53/udp").unwrap();
        assert_eq!(m.protocol, Protocol::Udp);

        let m = PortMapping::parse("9000").unwrap();
        assert_eq!((m.host_port, m.container_port), (9000, 9000));

        let m = PortMapping::parse("127.0.0.1:3306:3306").unwrap();
        assert_eq!(m.host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(m.to_publish_arg(), "127.0.0.1:3306:3306/tcp");
    }

    #[test]
    fn test_parse_ports_rejects_garbage() {
        assert!(PortMapping::parse("http").is_err());
        assert!(PortMapping::parse("80:80/sctp").is_err());
        assert!(PortMapping::parse("1:2:3:4").is_err());
        assert!(PortMapping::parse("70000:80").is_err());
    }

    #[test]
    fn test_readiness_check_yaml() {
        let check: ReadinessCheck =
            serde_yaml::from_str("kind: http\nurl: http://127.0.0.1:8000/health\n").unwrap();
        assert_eq!(
            check,
            ReadinessCheck::Http {
                url: "http://127.0.0.1:8000/health".to_string(),
                expect_status: 200
            }
        );

        let check: ReadinessCheck =
            serde_yaml::from_str("kind: database\nhost: 127.0.0.1\ndatabase: pmi_db\n").unwrap();
        assert_eq!(check.kind(), "database");
        assert_eq!(check.to_string(), "mysql://127.0.0.1:3306/pmi_db");
    }

    #[test]
    fn test_restart_policy_names() {
        let policy: RestartPolicy = serde_yaml::from_str("unless-stopped").unwrap();
        assert_eq!(policy, RestartPolicy::UnlessStopped);
        assert_eq!(policy.to_string(), "unless-stopped");
    }
}
