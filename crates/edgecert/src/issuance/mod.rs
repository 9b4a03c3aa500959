//! Certificate issuance
//!
//! Domains that need a certificate are grouped by backend and each group is
//! handed to an [`IssuanceClient`] once. A group's certificate therefore
//! covers every uncovered domain of one backend.
//!
//! Groups are independent: a failed request is logged and recorded, and the
//! remaining groups still run. There are no retries within a run; the next
//! scheduled run picks the domains up again.

mod certbot;

pub use certbot::CertbotClient;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use edgecert_config::{DomainRegistry, ReconcileSettings};

use crate::error::IssuanceError;
use crate::validator::CoverageCheck;

/// Parameters passed to the issuance client alongside the domain list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceOptions {
    /// Contact address registered with the certificate authority
    pub contact_email: String,
    /// Port of the standalone HTTP-01 responder
    pub challenge_port: u16,
    /// Use the staging environment
    pub staging: bool,
}

impl IssuanceOptions {
    pub fn from_settings(settings: &ReconcileSettings) -> Self {
        Self {
            contact_email: settings.contact_email.clone(),
            challenge_port: settings.challenge_port,
            staging: settings.use_staging,
        }
    }
}

/// Requests one certificate covering a list of domains.
#[async_trait]
pub trait IssuanceClient: Send + Sync {
    async fn issue(&self, domains: &[String], options: &IssuanceOptions) -> Result<(), IssuanceError>;
}

/// Uncovered domains sharing a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceGroup {
    pub backend_id: String,
    pub domains: Vec<String>,
}

/// Group `(domain, backend)` pairs by backend.
///
/// Groups are ordered by the first appearance of their backend and keep the
/// input order of their domains.
pub fn group_by_backend<'a, I>(domains: I) -> Vec<IssuanceGroup>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut groups: Vec<IssuanceGroup> = Vec::new();
    for (name, backend) in domains {
        match groups.iter_mut().find(|g| g.backend_id == backend) {
            Some(group) => group.domains.push(name.to_string()),
            None => groups.push(IssuanceGroup {
                backend_id: backend.to_string(),
                domains: vec![name.to_string()],
            }),
        }
    }
    groups
}

/// Result of one group's issuance request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IssuanceStatus {
    Issued,
    /// Not requested because the run is a dry run
    Skipped,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupOutcome {
    pub backend_id: String,
    pub domains: Vec<String>,
    #[serde(flatten)]
    pub status: IssuanceStatus,
}

impl GroupOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, IssuanceStatus::Failed { .. })
    }
}

/// Drives the issuance client for every backend group that needs it.
pub struct IssuanceBatcher<'a> {
    checker: &'a dyn CoverageCheck,
    client: &'a dyn IssuanceClient,
    options: IssuanceOptions,
    dry_run: bool,
}

impl<'a> IssuanceBatcher<'a> {
    pub fn new(
        checker: &'a dyn CoverageCheck,
        client: &'a dyn IssuanceClient,
        options: IssuanceOptions,
    ) -> Self {
        Self {
            checker,
            client,
            options,
            dry_run: false,
        }
    }

    /// Log intended requests instead of running the client
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Domains of `registry` that need a certificate, grouped by backend.
    pub async fn needed_groups(&self, registry: &DomainRegistry) -> Vec<IssuanceGroup> {
        let mut needed = Vec::new();
        for domain in registry {
            if self.checker.needs_certificate(&domain.name).await {
                info!(
                    domain = %domain.name,
                    backend = %domain.backend_id,
                    "Domain needs a certificate"
                );
                needed.push((domain.name.as_str(), domain.backend_id.as_str()));
            }
        }
        group_by_backend(needed)
    }

    /// Request certificates for every group of uncovered domains.
    pub async fn request_for_needed(&self, registry: &DomainRegistry) -> Vec<GroupOutcome> {
        let groups = self.needed_groups(registry).await;
        if groups.is_empty() {
            info!("All resolving domains are covered, nothing to issue");
            return Vec::new();
        }

        let mut outcomes = Vec::with_capacity(groups.len());
        for group in groups {
            let status = self.request(&group).await;
            outcomes.push(GroupOutcome {
                backend_id: group.backend_id,
                domains: group.domains,
                status,
            });
        }

        let failed = outcomes.iter().filter(|o| o.is_failed()).count();
        if failed > 0 {
            warn!(
                groups = outcomes.len(),
                failed, "Some certificate requests failed, they will be retried on the next run"
            );
        }

        outcomes
    }

    async fn request(&self, group: &IssuanceGroup) -> IssuanceStatus {
        if self.dry_run {
            info!(
                backend = %group.backend_id,
                domains = ?group.domains,
                "Dry run: would request certificate"
            );
            return IssuanceStatus::Skipped;
        }

        info!(
            backend = %group.backend_id,
            domains = ?group.domains,
            staging = self.options.staging,
            "Requesting certificate"
        );

        match self.client.issue(&group.domains, &self.options).await {
            Ok(()) => {
                info!(
                    backend = %group.backend_id,
                    domains = ?group.domains,
                    "Certificate issued"
                );
                IssuanceStatus::Issued
            }
            Err(e) => {
                error!(
                    backend = %group.backend_id,
                    domains = ?group.domains,
                    error = %e,
                    "Certificate request failed"
                );
                IssuanceStatus::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
