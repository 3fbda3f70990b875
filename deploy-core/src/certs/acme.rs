//! ACME client seam and the certbot implementation.

use crate::command::CommandRunner;
use crate::error::{DeployError, Result};
use crate::observability::metrics;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// Failures worth a second attempt: name resolution and connectivity.
static TRANSIENT_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(dns problem|nxdomain|servfail|temporary failure in name resolution|name or service not known|connection refused|connection reset|network is unreachable|timed? ?out|could not connect)",
    )
    .expect("Invalid transient error regex")
});

/// Whether an ACME client's output describes a transient network failure.
pub fn is_transient(output: &str) -> bool {
    TRANSIENT_ERROR.is_match(output)
}

/// One certificate order using the webroot strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmeRequest {
    /// Names to certify; the first is the primary and names the lineage
    pub domains: Vec<String>,
    /// Directory served at `/.well-known/acme-challenge` by the temp proxy
    pub webroot: PathBuf,
    /// Certificate store root (certbot `--config-dir`)
    pub cert_dir: PathBuf,
    pub email: Option<String>,
    pub staging: bool,
}

impl AcmeRequest {
    pub fn primary_domain(&self) -> &str {
        self.domains.first().map(String::as_str).unwrap_or_default()
    }
}

/// Outcome reported by the ACME client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmeResponse {
    pub success: bool,
    /// Raw client output, kept for diagnosis
    pub output: String,
}

/// Certificate authority client.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Request a certificate. `Err` means the client could not be run at all;
    /// a refused order is `Ok` with `success == false`.
    async fn obtain(&self, request: &AcmeRequest) -> Result<AcmeResponse>;
}

/// Drives the `certbot` CLI (or any argv prefix that ends in certbot, such as
/// `docker run --rm certbot/certbot`).
pub struct CertbotClient {
    command: Vec<String>,
    runner: CommandRunner,
}

impl CertbotClient {
    pub fn new(command: Vec<String>, runner: CommandRunner) -> Result<Self> {
        if command.is_empty() {
            return Err(DeployError::InvalidConfig {
                reason: "ACME command must name a program".to_string(),
            });
        }
        Ok(Self { command, runner })
    }

    pub(crate) fn args(&self, request: &AcmeRequest) -> Vec<String> {
        let mut args: Vec<String> = self.command[1..].to_vec();
        args.extend([
            "certonly".to_string(),
            "--webroot".to_string(),
            "-w".to_string(),
            request.webroot.display().to_string(),
            "--config-dir".to_string(),
            request.cert_dir.display().to_string(),
            "--cert-name".to_string(),
            request.primary_domain().to_string(),
        ]);
        for domain in &request.domains {
            args.extend(["-d".to_string(), domain.clone()]);
        }
        match &request.email {
            Some(email) => args.extend(["--email".to_string(), email.clone()]),
            None => args.push("--register-unsafely-without-email".to_string()),
        }
        args.extend(["--agree-tos".to_string(), "--non-interactive".to_string()]);
        if request.staging {
            args.push("--staging".to_string());
        }
        args
    }
}

#[async_trait]
impl AcmeClient for CertbotClient {
    #[instrument(skip(self, request), fields(primary = request.primary_domain(), staging = request.staging))]
    async fn obtain(&self, request: &AcmeRequest) -> Result<AcmeResponse> {
        info!(domains = request.domains.len(), "Requesting certificate");
        let output = self.runner.run(&self.command[0], &self.args(request)).await?;

        let success = output.success();
        metrics::record_acme_request(if success { "issued" } else { "refused" });
        if !success {
            warn!(code = ?output.code, "ACME client refused the order");
        }
        Ok(AcmeResponse { success, output: output.combined() })
    }
}
