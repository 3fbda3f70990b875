//! Network readiness checks: TCP connect, HTTP status, database ping.

use super::ReadinessChecker;
use crate::config::{Secret, Secrets};
use crate::error::{DeployError, Result as DeployResult};
use crate::types::ReadinessCheck;
use async_trait::async_trait;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;
use tokio::net::TcpStream;

/// Credentials for database readiness checks.
#[derive(Debug, Clone)]
pub struct DbCredentials {
    pub user: String,
    pub password: Secret,
}

impl DbCredentials {
    /// Credentials from the secrets, if both user and password are present.
    pub fn from_secrets(secrets: &Secrets) -> Option<Self> {
        Some(Self {
            user: secrets.db_user()?.to_string(),
            password: secrets.db_password()?.clone(),
        })
    }
}

/// Checker that talks to the real network.
pub struct NetworkChecker {
    http: reqwest::Client,
    db: Option<DbCredentials>,
}

impl NetworkChecker {
    /// Redirects are not followed: an `http` check matches the status of the
    /// probed URL itself.
    pub fn new(db: Option<DbCredentials>) -> DeployResult<Self> {
        // Attempts are bounded by the probe deadline; this only guards a
        // single hung request from eating the whole budget.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| DeployError::InvalidConfig {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { http, db })
    }

    async fn tcp(&self, address: &str) -> Result<(), String> {
        TcpStream::connect(address)
            .await
            .map(|_| ())
            .map_err(|e| format!("tcp connect {}: {}", address, e))
    }

    async fn http(&self, url: &str, expect_status: u16) -> Result<(), String> {
        let response =
            self.http.get(url).send().await.map_err(|e| format!("GET {}: {}", url, e))?;
        let status = response.status().as_u16();
        if status == expect_status {
            Ok(())
        } else {
            Err(format!("GET {} returned {} (expected {})", url, status, expect_status))
        }
    }

    async fn database(&self, host: &str, port: u16, database: Option<&str>) -> Result<(), String> {
        let creds = self.db.as_ref().ok_or_else(|| {
            "database credentials not configured (DEPLOY_DB_USER / DEPLOY_DB_PASSWORD)".to_string()
        })?;

        let mut options = MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(&creds.user)
            .password(creds.password.expose());
        if let Some(db) = database {
            options = options.database(db);
        }

        let mut conn =
            options.connect().await.map_err(|e| format!("mysql {}:{}: {}", host, port, e))?;
        let ping = conn.ping().await.map_err(|e| format!("mysql ping {}:{}: {}", host, port, e));
        let _ = conn.close().await;
        ping
    }
}

#[async_trait]
impl ReadinessChecker for NetworkChecker {
    async fn check(&self, check: &ReadinessCheck) -> Result<(), String> {
        match check {
            ReadinessCheck::Tcp { address } => self.tcp(address).await,
            ReadinessCheck::Http { url, expect_status } => self.http(url, *expect_status).await,
            ReadinessCheck::Database { host, port, database } => {
                self.database(host, *port, database.as_deref()).await
            }
        }
    }
}
