//! Reconciliation run orchestration.
//!
//! One run loads the routing table, requests certificates for uncovered
//! domains, then removes certificates that serve no routed domain. Cleanup
//! runs last so that certificates issued in the same run are already on
//! disk when the janitor looks.
//!
//! Runs must not overlap: two concurrent runs could request the same
//! certificate twice or remove files the other run is installing. The
//! scheduler invoking edgecert is responsible for serializing runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use edgecert_config::{ConfigError, DomainRegistry, ReconcileSettings};

use crate::issuance::{GroupOutcome, IssuanceBatcher, IssuanceClient, IssuanceOptions};
use crate::janitor::{CertificateJanitor, CleanupReport};
use crate::validator::CoverageCheck;

/// Everything one run did
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Number of routed domains
    pub domain_count: usize,
    pub issuance: Vec<GroupOutcome>,
    pub cleanup: CleanupReport,
}

impl RunSummary {
    /// Domains a certificate was requested for, across all groups
    pub fn requested_domains(&self) -> impl Iterator<Item = &str> {
        self.issuance
            .iter()
            .flat_map(|o| o.domains.iter().map(String::as_str))
    }
}

/// Single reconciliation pass over an edge server.
pub struct Reconciler {
    settings: ReconcileSettings,
    checker: Box<dyn CoverageCheck>,
    issuer: Box<dyn IssuanceClient>,
}

impl Reconciler {
    pub fn new(
        settings: ReconcileSettings,
        checker: impl CoverageCheck + 'static,
        issuer: impl IssuanceClient + 'static,
    ) -> Self {
        Self {
            settings,
            checker: Box::new(checker),
            issuer: Box::new(issuer),
        }
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Run issuance, then cleanup.
    ///
    /// # Errors
    ///
    /// Only an unreadable or malformed routing table aborts the run, and it
    /// does so before any probe or filesystem change. Issuance and cleanup
    /// failures are recorded in the returned summary.
    pub async fn run(&self) -> Result<RunSummary, ConfigError> {
        let started_at = Utc::now();
        let registry = DomainRegistry::load(&self.settings.backend_map)?;

        info!(
            backend_map = %self.settings.backend_map.display(),
            domain_count = registry.len(),
            dry_run = self.settings.dry_run,
            "Starting certificate reconciliation"
        );

        let issuance = IssuanceBatcher::new(
            self.checker.as_ref(),
            self.issuer.as_ref(),
            IssuanceOptions::from_settings(&self.settings),
        )
        .dry_run(self.settings.dry_run)
        .request_for_needed(&registry)
        .await;

        let cleanup = CertificateJanitor::from_settings(&self.settings).clean(&registry.active_names());

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            dry_run: self.settings.dry_run,
            domain_count: registry.len(),
            issuance,
            cleanup,
        };

        info!(
            groups_requested = summary.issuance.len(),
            groups_failed = summary.issuance.iter().filter(|o| o.is_failed()).count(),
            certificates_removed = summary.cleanup.removed.len(),
            cleanup_failures = summary.cleanup.failed.len(),
            elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
            "Certificate reconciliation finished"
        );

        Ok(summary)
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
