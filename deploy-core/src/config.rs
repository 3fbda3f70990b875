//! Configuration management.
//!
//! Two pieces of configuration exist:
//! - [`Config`]: tunables persisted as JSON in the config directory.
//! - [`Secrets`]: credentials, contact email and domain list, read once from
//!   an optional `KEY=VALUE` secrets file and the process environment.

use crate::error::{DeployError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const ENV_DB_USER: &str = "DEPLOY_DB_USER";
pub const ENV_DB_PASSWORD: &str = "DEPLOY_DB_PASSWORD";
pub const ENV_ACME_EMAIL: &str = "DEPLOY_ACME_EMAIL";
pub const ENV_DOMAINS: &str = "DEPLOY_DOMAINS";

/// Persistent configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_concurrency: usize,
    pub poll_interval_ms: u64,
    pub default_timeout_secs: u64,
    pub default_retries: u32,
    pub renew_before_days: i64,
    pub certificate_validity_days: i64,
    pub docker_binary: String,
    pub acme_command: Vec<String>,
    pub command_timeout_secs: u64,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            poll_interval_ms: 2000,
            default_timeout_secs: 60,
            default_retries: 1,
            renew_before_days: 30,
            certificate_validity_days: 90, // Let's Encrypt lifetime
            docker_binary: "docker".to_string(),
            acme_command: vec!["certbot".to_string()],
            command_timeout_secs: 300,
            log_json: false,
        }
    }
}

impl Config {
    /// Load configuration from disk, falling back to defaults when no file
    /// exists, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&paths::config_file())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| DeployError::InvalidConfig {
            reason: format!("Failed to read config {}: {}", path.display(), e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            DeployError::InvalidConfig { reason: format!("Failed to parse config: {}", e) }
        })?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse::<usize>("DEPLOY_MAX_CONCURRENCY") {
            self.max_concurrency = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("DEPLOY_POLL_INTERVAL_MS") {
            self.poll_interval_ms = ms;
        }
        if let Ok(bin) = std::env::var("DEPLOY_DOCKER_BINARY") {
            self.docker_binary = bin;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(DeployError::InvalidConfig {
                reason: "max_concurrency must be at least 1".to_string(),
            });
        }
        if self.acme_command.is_empty() {
            return Err(DeployError::InvalidConfig {
                reason: "acme_command must name a program".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// A value that must never end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Externally supplied credentials and identity, read once at plan-load time.
#[derive(Clone, Default)]
pub struct Secrets {
    values: HashMap<String, Secret>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets").field("entries", &self.values.len()).finish()
    }
}

impl Secrets {
    /// Read the optional secrets file, then overlay the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut values = HashMap::new();

        if let Some(path) = file {
            let iter = dotenvy::from_path_iter(path).map_err(|e| DeployError::InvalidConfig {
                reason: format!("Failed to read secrets file {}: {}", path.display(), e),
            })?;
            for item in iter {
                let (key, value) = item.map_err(|e| DeployError::InvalidConfig {
                    reason: format!("Malformed secrets file {}: {}", path.display(), e),
                })?;
                values.insert(key, value);
            }
        }

        values.extend(std::env::vars());
        Ok(Self::from_map(values))
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values: values.into_iter().map(|(k, v)| (k, Secret::new(v))).collect() }
    }

    /// Look up a raw value by key.
    pub fn get(&self, key: &str) -> Option<&Secret> {
        self.values.get(key).filter(|v| !v.expose().is_empty())
    }

    pub fn db_user(&self) -> Option<&str> {
        self.get(ENV_DB_USER).map(Secret::expose)
    }

    pub fn db_password(&self) -> Option<&Secret> {
        self.get(ENV_DB_PASSWORD)
    }

    pub fn acme_email(&self) -> Option<&str> {
        self.get(ENV_ACME_EMAIL).map(Secret::expose)
    }

    /// Domains from `DEPLOY_DOMAINS`, comma or whitespace separated.
    pub fn domains(&self) -> Vec<String> {
        self.get(ENV_DOMAINS)
            .map(|v| {
                v.expose()
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace every `${NAME}` reference in `input`.
    ///
    /// Fails on the first reference that has no value so a plan never starts a
    /// container with a half-substituted credential.
    pub fn interpolate(&self, input: &str) -> std::result::Result<String, String> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| format!("unterminated reference in '{}'", input))?;
            let key = &after[..end];
            let value = self.get(key).ok_or_else(|| format!("'{}' is not set", key))?;
            out.push_str(value.expose());
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}
