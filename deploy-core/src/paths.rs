//! Centralized path configuration.
//!
//! All on-disk locations used by the CLI go through this module so that
//! `run`, `status` and `teardown` agree on where things live.

use std::path::{Path, PathBuf};

/// Get the configuration directory.
///
/// Resolution order:
/// 1. `DEPLOY_CONFIG_DIR` environment variable
/// 2. `<platform config dir>/deploy` (e.g. `~/.config/deploy`)
/// 3. `./.deploy` when no home directory can be determined
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DEPLOY_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir().map(|d| d.join("deploy")).unwrap_or_else(|| PathBuf::from(".deploy"))
}

/// Get the path to the configuration file.
pub fn config_file() -> PathBuf {
    config_dir().join("config.json")
}

/// Resolve a path from a plan file relative to the plan's directory.
///
/// Absolute paths are returned unchanged.
pub fn resolve_relative(plan_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        plan_dir.join(path)
    }
}

/// Directory holding the live certificate files for a primary domain
/// (certbot layout).
pub fn live_cert_dir(cert_dir: &Path, primary_domain: &str) -> PathBuf {
    cert_dir.join("live").join(primary_domain)
}

/// Path of the certificate metadata record for a primary domain.
pub fn cert_record_path(cert_dir: &Path, primary_domain: &str) -> PathBuf {
    live_cert_dir(cert_dir, primary_domain).join("deploy-record.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative() {
        let base = Path::new("/srv/stack");
        assert_eq!(resolve_relative(base, Path::new("certs")), PathBuf::from("/srv/stack/certs"));
        assert_eq!(resolve_relative(base, Path::new("/etc/ssl")), PathBuf::from("/etc/ssl"));
    }

    #[test]
    fn test_cert_layout() {
        let dir = Path::new("/data/certbot/conf");
        assert_eq!(
            cert_record_path(dir, "example.org"),
            PathBuf::from("/data/certbot/conf/live/example.org/deploy-record.json")
        );
    }
}
