//! Certificate metadata.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata describing one issued certificate.
///
/// Written once after issuance and replaced wholesale on renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Names covered; the first is the primary
    pub domains: Vec<String>,

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    /// Full chain PEM
    pub fullchain_path: PathBuf,

    /// Private key PEM
    pub privkey_path: PathBuf,
}

impl CertificateRecord {
    /// Whether every requested name is covered by this certificate.
    pub fn covers(&self, domains: &[String]) -> bool {
        domains.iter().all(|d| self.domains.iter().any(|have| have.eq_ignore_ascii_case(d)))
    }

    /// Whether the certificate stays valid for longer than `renew_before`
    /// measured from `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, renew_before: Duration) -> bool {
        self.expires_at - now > renew_before
    }

    /// Whole days left before expiry (negative once expired).
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days()
    }
}
