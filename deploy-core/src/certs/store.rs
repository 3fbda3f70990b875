//! On-disk certificate store in certbot's layout.
//!
//! ```text
//! <cert_dir>/live/<primary>/fullchain.pem
//! <cert_dir>/live/<primary>/privkey.pem
//! <cert_dir>/live/<primary>/deploy-record.json
//! ```

use crate::error::{DeployError, Result};
use crate::paths;
use crate::types::CertificateRecord;
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct CertificateStore {
    cert_dir: PathBuf,
    validity: Duration,
    renew_before: Duration,
}

impl CertificateStore {
    pub fn new(cert_dir: impl Into<PathBuf>, validity_days: i64, renew_before_days: i64) -> Self {
        Self {
            cert_dir: cert_dir.into(),
            validity: Duration::days(validity_days),
            renew_before: Duration::days(renew_before_days),
        }
    }

    pub fn cert_dir(&self) -> &Path {
        &self.cert_dir
    }

    /// Read the record for `primary`, if one was ever written.
    pub fn load(&self, primary: &str) -> Result<Option<CertificateRecord>> {
        let path = paths::cert_record_path(&self.cert_dir, primary);
        if !path.exists() {
            return Ok(None);
        }
        let content =
            std::fs::read_to_string(&path).map_err(|source| DeployError::Io { path: path.clone(), source })?;
        let record = serde_json::from_str(&content).map_err(|e| {
            DeployError::Internal(format!("corrupt certificate record {}: {}", path.display(), e))
        })?;
        Ok(Some(record))
    }

    /// A record that can be used as-is for `domains` at `now`.
    ///
    /// Valid means it covers every name, both PEM files exist and it does not
    /// expire within the renewal window. A corrupt record counts as absent.
    pub fn find_valid(&self, domains: &[String], now: DateTime<Utc>) -> Option<CertificateRecord> {
        let primary = domains.first()?;
        let record = match self.load(primary) {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "Ignoring unreadable certificate record");
                return None;
            }
        };

        let usable = record.covers(domains)
            && record.fullchain_path.exists()
            && record.privkey_path.exists()
            && record.is_fresh(now, self.renew_before);
        usable.then_some(record)
    }

    /// Record a fresh issuance for `domains` and persist it.
    ///
    /// The previous record, if any, is replaced wholesale.
    pub fn record_issued(&self, domains: &[String], now: DateTime<Utc>) -> Result<CertificateRecord> {
        let primary = domains.first().ok_or_else(|| DeployError::PlanInvalid {
            reason: "certificate requires at least one domain".to_string(),
        })?;
        let live = paths::live_cert_dir(&self.cert_dir, primary);
        let record = CertificateRecord {
            domains: domains.to_vec(),
            issued_at: now,
            expires_at: now + self.validity,
            fullchain_path: live.join("fullchain.pem"),
            privkey_path: live.join("privkey.pem"),
        };
        self.save(&record)?;
        Ok(record)
    }

    fn save(&self, record: &CertificateRecord) -> Result<()> {
        let primary = record.domains.first().map(String::as_str).unwrap_or_default();
        let path = paths::cert_record_path(&self.cert_dir, primary);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| DeployError::Io { path: parent.to_path_buf(), source })?;
        }

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| DeployError::Internal(format!("serialize certificate record: {}", e)))?;

        // Readers never observe a partially written record.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|source| DeployError::Io { path: tmp.clone(), source })?;
        std::fs::rename(&tmp, &path).map_err(|source| DeployError::Io { path: path.clone(), source })?;
        Ok(())
    }
}
