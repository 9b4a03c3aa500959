//! Per-run reconciliation settings.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default renewal descriptor directory used by certbot
pub const DEFAULT_RENEWAL_DIR: &str = "/etc/letsencrypt/renewal";

/// Default system CA bundle (Debian/Ubuntu layout)
pub const DEFAULT_CA_BUNDLE: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Default edge HTTPS listener probed for live certificates
pub const DEFAULT_EDGE_ADDRESS: &str = "localhost:443";

/// Default issuance client executable
pub const DEFAULT_ISSUANCE_COMMAND: &str = "certbot";

/// Port the standalone HTTP-01 responder binds to; the edge forwards
/// `/.well-known/acme-challenge/` there.
pub const DEFAULT_CHALLENGE_PORT: u16 = 8080;

pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TLS_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ISSUANCE_TIMEOUT: Duration = Duration::from_secs(600);

/// Static parameters for one reconciliation run.
///
/// Built once from the command line and treated as read-only afterwards.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Public address domains must resolve to before a certificate is requested
    pub server_ip: IpAddr,
    /// HAProxy backend map listing routed domains
    pub backend_map: PathBuf,
    /// Directory of `<name>.pem` certificates served by HAProxy
    pub certs_dir: PathBuf,
    /// Directory of certbot renewal descriptors (`<name>.conf`)
    pub renewal_dir: PathBuf,
    /// Contact address registered with the certificate authority
    pub contact_email: String,
    /// Request certificates from the staging environment
    pub use_staging: bool,
    /// Additional trust anchor for staging certificates
    pub fake_cert: Option<PathBuf>,
    /// System CA bundle seeding the probe trust store
    pub ca_bundle: PathBuf,
    /// `host:port` of the edge HTTPS listener
    pub edge_address: String,
    /// Issuance client executable
    pub issuance_command: String,
    pub challenge_port: u16,
    pub dns_timeout: Duration,
    pub tls_timeout: Duration,
    pub issuance_timeout: Duration,
    /// Log intended issuance and removals without performing them
    pub dry_run: bool,
}

impl ReconcileSettings {
    /// Create settings with the required parameters and defaults for the rest.
    pub fn new(
        server_ip: IpAddr,
        backend_map: impl Into<PathBuf>,
        certs_dir: impl Into<PathBuf>,
        contact_email: impl Into<String>,
    ) -> Self {
        Self {
            server_ip,
            backend_map: backend_map.into(),
            certs_dir: certs_dir.into(),
            renewal_dir: PathBuf::from(DEFAULT_RENEWAL_DIR),
            contact_email: contact_email.into(),
            use_staging: false,
            fake_cert: None,
            ca_bundle: PathBuf::from(DEFAULT_CA_BUNDLE),
            edge_address: DEFAULT_EDGE_ADDRESS.to_string(),
            issuance_command: DEFAULT_ISSUANCE_COMMAND.to_string(),
            challenge_port: DEFAULT_CHALLENGE_PORT,
            dns_timeout: DEFAULT_DNS_TIMEOUT,
            tls_timeout: DEFAULT_TLS_TIMEOUT,
            issuance_timeout: DEFAULT_ISSUANCE_TIMEOUT,
            dry_run: false,
        }
    }

    /// Extra trust anchor to add to the probe trust store.
    ///
    /// The fake root only applies when certificates come from the staging
    /// environment; production runs trust the system bundle alone.
    pub fn extra_trust_anchor(&self) -> Option<&Path> {
        if self.use_staging {
            self.fake_cert.as_deref()
        } else {
            None
        }
    }

    /// Check settings that would otherwise fail halfway through a run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let email = self.contact_email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ConfigError::invalid(
                "contact_email",
                format!("{:?} is not an email address", self.contact_email),
            ));
        }

        if !self.certs_dir.is_dir() {
            return Err(ConfigError::invalid(
                "certs_dir",
                format!("{} is not a directory", self.certs_dir.display()),
            ));
        }

        if self.edge_address.trim().is_empty() {
            return Err(ConfigError::invalid("edge_address", "must not be empty"));
        }

        if self.issuance_command.trim().is_empty() {
            return Err(ConfigError::invalid("issuance_command", "must not be empty"));
        }

        if let Some(anchor) = self.extra_trust_anchor() {
            if !anchor.is_file() {
                return Err(ConfigError::invalid(
                    "fake_cert",
                    format!("{} is not a readable file", anchor.display()),
                ));
            }
        }

        for (field, value) in [
            ("dns_timeout", self.dns_timeout),
            ("tls_timeout", self.tls_timeout),
            ("issuance_timeout", self.issuance_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn settings(certs_dir: &Path) -> ReconcileSettings {
        ReconcileSettings::new(
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10)),
            "/etc/haproxy/backends.map",
            certs_dir,
            "ops@example.com",
        )
    }

    #[test]
    fn test_defaults() {
        let dir = TempDir::new().unwrap();
        let s = settings(dir.path());

        assert_eq!(s.renewal_dir, PathBuf::from(DEFAULT_RENEWAL_DIR));
        assert_eq!(s.challenge_port, 8080);
        assert!(!s.use_staging);
        assert!(!s.dry_run);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_fake_cert_only_used_in_staging() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(dir.path());
        s.fake_cert = Some(PathBuf::from("/etc/ssl/fakeroot.pem"));

        assert_eq!(s.extra_trust_anchor(), None);

        s.use_staging = true;
        assert_eq!(
            s.extra_trust_anchor(),
            Some(Path::new("/etc/ssl/fakeroot.pem"))
        );
    }

    #[test]
    fn test_validate_rejects_bad_email() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(dir.path());
        s.contact_email = "not-an-email".to_string();

        let err = s.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                field: "contact_email",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_missing_certs_dir() {
        let s = settings(Path::new("/nonexistent/haproxy/certs"));
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("certs_dir"));
    }

    #[test]
    fn test_validate_rejects_missing_staging_anchor() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(dir.path());
        s.use_staging = true;
        s.fake_cert = Some(dir.path().join("missing.pem"));

        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("fake_cert"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(dir.path());
        s.tls_timeout = Duration::ZERO;

        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("tls_timeout"));
    }
}
