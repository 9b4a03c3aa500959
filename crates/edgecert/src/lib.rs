//! edgecert
//!
//! Keeps the certificates served by an HAProxy edge in line with the
//! domains it routes. Meant to run periodically from a scheduler.
//!
//! Each run:
//!
//! 1. Loads the backend map ([`edgecert_config::DomainRegistry`])
//! 2. Probes every routed domain: DNS must point at this server and the
//!    edge must present a valid certificate ([`CertificateValidator`])
//! 3. Requests one certificate per backend for the uncovered domains
//!    ([`IssuanceBatcher`], [`CertbotClient`])
//! 4. Removes certificates serving no routed domain and disables their
//!    renewal ([`CertificateJanitor`])
//!
//! # Example
//!
//! ```ignore
//! use edgecert::{CertbotClient, CertificateValidator, Reconciler};
//! use edgecert_config::ReconcileSettings;
//!
//! let settings = ReconcileSettings::new(
//!     "203.0.113.10".parse()?,
//!     "/etc/haproxy/backends.map",
//!     "/etc/haproxy/certs",
//!     "ops@example.com",
//! );
//! let validator = CertificateValidator::from_settings(&settings)?;
//! let issuer = CertbotClient::from_settings(&settings);
//! let summary = Reconciler::new(settings, validator, issuer).run().await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod error;
pub mod issuance;
pub mod janitor;
pub mod reconciler;
pub mod validator;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Errors
pub use error::{CertificateParseError, CleanupError, IssuanceError, ProbeError, SetupError};

// Coverage checks
pub use validator::{CertificateValidator, CoverageCheck, DnsAuthority, TlsContext, TlsProbe};

// Issuance
pub use issuance::{
    group_by_backend, CertbotClient, GroupOutcome, IssuanceBatcher, IssuanceClient, IssuanceGroup,
    IssuanceOptions, IssuanceStatus,
};

// Cleanup
pub use janitor::{extract_served_names, CertificateJanitor, CertificateRecord, CleanupReport};

// Orchestration
pub use reconciler::{Reconciler, RunSummary};
