//! Orphaned certificate cleanup
//!
//! Scans the HAProxy certificate directory and removes certificates that no
//! longer serve any routed domain. The matching certbot renewal descriptor
//! is renamed from `<name>.conf` to `<name>.disabled` rather than deleted,
//! which stops renewal but keeps the history and allows re-enabling it by
//! hand.
//!
//! # Removal rules
//!
//! A certificate is removed only when its served names can be read, none of
//! them is a wildcard, and none of them is routed. Everything else stays:
//!
//! - unreadable or nameless certificates are skipped and logged
//! - wildcard certificates are managed outside this tool and never touched
//! - a single routed name keeps the whole certificate

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};
use x509_parser::extensions::GeneralName;

use edgecert_config::{normalize_domain, ActiveDomainSet, ReconcileSettings};

use crate::error::{CertificateParseError, CleanupError};

/// Extension of certificates in the HAProxy certificate directory
pub const CERT_EXTENSION: &str = "pem";

/// Extension of an active renewal descriptor
pub const RENEWAL_EXTENSION: &str = "conf";

/// Extension of a disabled renewal descriptor
pub const DISABLED_EXTENSION: &str = "disabled";

/// Names served by a PEM certificate.
///
/// Uses the DNS entries of the Subject Alternative Name extension when the
/// certificate has one, otherwise the subject Common Name. Only the first
/// `CERTIFICATE` block is considered, so chain and key blocks that follow
/// the leaf in a combined HAProxy PEM are ignored. Names are returned in
/// canonical form (see [`normalize_domain`]) so they compare with routed
/// names regardless of case or a trailing root dot.
///
/// # Errors
///
/// Fails when the input holds no parsable certificate, or when no name can
/// be extracted. Callers must treat an error as "keep this certificate".
pub fn extract_served_names(raw: &[u8]) -> Result<BTreeSet<String>, CertificateParseError> {
    let blocks = pem::parse_many(raw).map_err(|e| CertificateParseError::Pem(e.to_string()))?;
    let block = blocks
        .iter()
        .find(|p| p.tag() == "CERTIFICATE")
        .ok_or(CertificateParseError::NoCertificate)?;

    let (_, cert) = x509_parser::parse_x509_certificate(block.contents())
        .map_err(|e| CertificateParseError::X509(e.to_string()))?;

    let san = cert
        .subject_alternative_name()
        .map_err(|e| CertificateParseError::X509(e.to_string()))?;

    let names: BTreeSet<String> = match san {
        Some(san) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(normalize_domain(dns)),
                _ => None,
            })
            .collect(),
        None => cert
            .subject()
            .iter_common_name()
            .filter_map(|cn| cn.as_str().ok())
            .map(normalize_domain)
            .collect(),
    };

    if names.is_empty() {
        return Err(CertificateParseError::NoNames);
    }
    Ok(names)
}

/// Whether any served name contains a wildcard label
pub fn is_wildcard(served_names: &BTreeSet<String>) -> bool {
    served_names.iter().any(|name| name.contains('*'))
}

/// Deletion rule: not a wildcard and no served name is routed.
pub fn is_eligible_for_removal(served_names: &BTreeSet<String>, active: &ActiveDomainSet) -> bool {
    !served_names.is_empty() && !is_wildcard(served_names) && served_names.is_disjoint(active)
}

/// A certificate found in the certificate directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub file_path: PathBuf,
    pub served_names: BTreeSet<String>,
    pub is_wildcard: bool,
}

impl CertificateRecord {
    /// Read and parse the certificate at `path`.
    pub fn load(path: &Path) -> Result<Self, CertificateParseError> {
        let raw = fs::read(path)?;
        let served_names = extract_served_names(&raw)?;
        Ok(Self {
            file_path: path.to_path_buf(),
            is_wildcard: is_wildcard(&served_names),
            served_names,
        })
    }

    pub fn is_orphaned(&self, active: &ActiveDomainSet) -> bool {
        is_eligible_for_removal(&self.served_names, active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedCertificate {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedCleanup {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Whether removals were only logged
    pub dry_run: bool,
    /// Certificates removed (or, in a dry run, that would have been)
    pub removed: Vec<PathBuf>,
    /// Renewal descriptors renamed to `.disabled`
    pub disabled_renewals: Vec<PathBuf>,
    /// Certificates still serving a routed domain
    pub retained: Vec<PathBuf>,
    /// Wildcard certificates left alone
    pub wildcards: Vec<PathBuf>,
    /// Certificates whose names could not be read
    pub skipped: Vec<SkippedCertificate>,
    /// Filesystem errors during removal
    pub failed: Vec<FailedCleanup>,
}

/// Removes certificates no longer serving a routed domain.
#[derive(Debug, Clone)]
pub struct CertificateJanitor {
    certs_dir: PathBuf,
    renewal_dir: PathBuf,
    dry_run: bool,
}

impl CertificateJanitor {
    pub fn new(certs_dir: impl Into<PathBuf>, renewal_dir: impl Into<PathBuf>) -> Self {
        Self {
            certs_dir: certs_dir.into(),
            renewal_dir: renewal_dir.into(),
            dry_run: false,
        }
    }

    pub fn from_settings(settings: &ReconcileSettings) -> Self {
        Self::new(&settings.certs_dir, &settings.renewal_dir).dry_run(settings.dry_run)
    }

    /// Log removals instead of performing them
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Certificate files in the certificate directory, sorted by path.
    pub fn certificate_paths(&self) -> Result<Vec<PathBuf>, CleanupError> {
        let enumerate_err = |reason: String| CleanupError::Enumerate {
            dir: self.certs_dir.clone(),
            reason,
        };

        let dir = self
            .certs_dir
            .to_str()
            .ok_or_else(|| enumerate_err("path is not valid UTF-8".to_string()))?;
        let pattern = format!("{}/*.{}", glob::Pattern::escape(dir), CERT_EXTENSION);

        let mut paths = Vec::new();
        for entry in glob::glob(&pattern).map_err(|e| enumerate_err(e.to_string()))? {
            match entry {
                Ok(path) if path.is_file() => paths.push(path),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to inspect certificate directory entry"),
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Renewal descriptor belonging to the certificate at `cert_path`
    pub fn renewal_descriptor(&self, cert_path: &Path) -> Option<PathBuf> {
        let stem = cert_path.file_stem()?.to_str()?;
        Some(
            self.renewal_dir
                .join(format!("{stem}.{RENEWAL_EXTENSION}")),
        )
    }

    /// Remove every certificate that serves none of `active`.
    ///
    /// Per-file failures are logged and recorded in the report; they never
    /// stop the pass.
    pub fn clean(&self, active: &ActiveDomainSet) -> CleanupReport {
        let mut report = CleanupReport {
            dry_run: self.dry_run,
            ..Default::default()
        };

        let paths = match self.certificate_paths() {
            Ok(paths) => paths,
            Err(e) => {
                error!(error = %e, "Certificate cleanup skipped");
                report.failed.push(FailedCleanup {
                    path: self.certs_dir.clone(),
                    error: e.to_string(),
                });
                return report;
            }
        };

        debug!(
            certs_dir = %self.certs_dir.display(),
            certificates = paths.len(),
            active_domains = active.len(),
            "Scanning certificates for cleanup"
        );

        for path in paths {
            let record = match CertificateRecord::load(&path) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Cannot determine certificate names, keeping it"
                    );
                    report.skipped.push(SkippedCertificate {
                        path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if record.is_wildcard {
                debug!(
                    path = %path.display(),
                    names = ?record.served_names,
                    "Keeping wildcard certificate"
                );
                report.wildcards.push(path);
                continue;
            }

            if !record.is_orphaned(active) {
                debug!(path = %path.display(), "Certificate still serves a routed domain");
                report.retained.push(path);
                continue;
            }

            if self.dry_run {
                info!(
                    path = %path.display(),
                    names = ?record.served_names,
                    "Dry run: would remove unused certificate"
                );
                report.removed.push(path);
                continue;
            }

            self.remove(&record, &mut report);
        }

        info!(
            removed = report.removed.len(),
            retained = report.retained.len(),
            wildcards = report.wildcards.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Certificate cleanup finished"
        );

        report
    }

    fn remove(&self, record: &CertificateRecord, report: &mut CleanupReport) {
        let path = &record.file_path;

        if let Err(source) = fs::remove_file(path) {
            let e = CleanupError::Remove {
                path: path.clone(),
                source,
            };
            error!(error = %e, "Failed to remove unused certificate");
            report.failed.push(FailedCleanup {
                path: path.clone(),
                error: e.to_string(),
            });
            return;
        }

        info!(
            path = %path.display(),
            names = ?record.served_names,
            "Removed unused certificate"
        );
        report.removed.push(path.clone());

        match self.disable_renewal(path) {
            Ok(Some(disabled)) => report.disabled_renewals.push(disabled),
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "Failed to disable certificate renewal");
                report.failed.push(FailedCleanup {
                    path: path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Rename the renewal descriptor of `cert_path` to its disabled form.
    ///
    /// Returns the new path, or `None` when there is no descriptor.
    fn disable_renewal(&self, cert_path: &Path) -> Result<Option<PathBuf>, CleanupError> {
        let Some(descriptor) = self.renewal_descriptor(cert_path) else {
            return Ok(None);
        };
        if !descriptor.is_file() {
            debug!(path = %descriptor.display(), "No renewal descriptor to disable");
            return Ok(None);
        }

        let disabled = descriptor.with_extension(DISABLED_EXTENSION);
        fs::rename(&descriptor, &disabled).map_err(|source| CleanupError::DisableRenewal {
            path: descriptor.clone(),
            source,
        })?;

        info!(
            from = %descriptor.display(),
            to = %disabled.display(),
            "Disabled certificate renewal"
        );
        Ok(Some(disabled))
    }
}
