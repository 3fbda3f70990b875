//! Deployment plan file format.
//!
//! These types mirror the YAML one-to-one. They are converted into
//! [`ServiceSpec`](crate::types::ServiceSpec)s by the parser and never used
//! past plan load.

use crate::types::{ReadinessCheck, RestartPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root of a plan file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    /// Stack name; labels every container of the stack
    pub name: String,

    /// Network created before the first start
    #[serde(default)]
    pub network: Option<String>,

    /// Services in declaration order
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
}

/// One service declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceEntry {
    pub name: String,

    /// Container image; omitted on the certificate node
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub command: Vec<String>,

    /// Port mappings (e.g., ["8080:80", "443:443"])
    #[serde(default)]
    pub ports: Vec<String>,

    #[serde(default)]
    pub environment: Environment,

    /// Volume mounts (e.g., ["./data:/data", "db:/var/lib/mysql"])
    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub restart: RestartPolicy,

    #[serde(default)]
    pub readiness: Option<ReadinessCheck>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub role: Option<RoleName>,

    /// Marks this entry as the certificate issuance point
    #[serde(default)]
    pub certificate: Option<CertificateEntry>,
}

/// Explicit role of a container node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoleName {
    Service,
    ChallengeProxy,
}

/// Certificate settings of the issuance node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateEntry {
    pub temp_proxy: String,
    pub final_proxy: String,

    /// Relative paths resolve against the plan file's directory
    pub webroot: PathBuf,
    pub cert_dir: PathBuf,

    /// Overridden by `DEPLOY_DOMAINS` when set
    #[serde(default)]
    pub domains: Vec<String>,

    /// Overridden by `DEPLOY_ACME_EMAIL` when set
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub staging: bool,
}

/// Environment variables can be specified as a map or list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    /// Environment as key-value map
    Map(BTreeMap<String, EnvValue>),
    /// Environment as list of KEY=value strings
    List(Vec<String>),
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Map(BTreeMap::new())
    }
}

/// Scalar environment value; YAML happily types `3306` or `true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl std::fmt::Display for EnvValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Float(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl Environment {
    /// Normalize to raw (uninterpolated) `KEY -> value` pairs.
    ///
    /// List entries without `=` are rejected rather than dropped.
    pub fn to_map(&self) -> Result<BTreeMap<String, String>, String> {
        match self {
            Environment::Map(map) => {
                Ok(map.iter().map(|(k, v)| (k.clone(), v.to_string())).collect())
            }
            Environment::List(list) => list
                .iter()
                .map(|entry| {
                    entry
                        .split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .ok_or_else(|| format!("environment entry '{}' is not KEY=value", entry))
                })
                .collect(),
        }
    }
}
