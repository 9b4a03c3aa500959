//! Certificate coverage checks
//!
//! A domain needs a certificate when it resolves to this server but the
//! edge does not present a valid certificate for it:
//!
//! ```text
//! needs_certificate(d) = resolves_to_self(d) && !serves_valid_cert(d)
//! ```
//!
//! Domains that do not point here yet are never queued, since their HTTP-01
//! challenge could not succeed.

mod dns;
mod tls;

pub use dns::{addresses_match, DnsAuthority};
pub use tls::{TlsContext, TlsProbe};

use async_trait::async_trait;
use tracing::debug;

use edgecert_config::ReconcileSettings;

use crate::error::SetupError;

/// Coverage checks consumed by the issuance batcher.
///
/// Both checks answer with a plain `bool`; every failure mode (lookup
/// error, refused connection, timeout, untrusted chain) means "no".
#[async_trait]
pub trait CoverageCheck: Send + Sync {
    /// Whether DNS resolves `domain` to this server
    async fn resolves_to_self(&self, domain: &str) -> bool;

    /// Whether the edge presents a valid certificate for `domain`
    async fn serves_valid_cert(&self, domain: &str) -> bool;

    /// Whether a certificate must be requested for `domain`
    async fn needs_certificate(&self, domain: &str) -> bool {
        if !self.resolves_to_self(domain).await {
            return false;
        }

        let covered = self.serves_valid_cert(domain).await;
        debug!(domain = %domain, covered, "Checked certificate coverage");
        !covered
    }
}

/// Live DNS and TLS checks against the edge server.
#[derive(Debug)]
pub struct CertificateValidator {
    dns: DnsAuthority,
    tls: TlsProbe,
}

impl CertificateValidator {
    pub fn new(dns: DnsAuthority, tls: TlsProbe) -> Self {
        Self { dns, tls }
    }

    /// Build the resolver and the TLS context from run settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the trust anchors or the system resolver
    /// configuration cannot be loaded.
    pub fn from_settings(settings: &ReconcileSettings) -> Result<Self, SetupError> {
        let context = TlsContext::load(&settings.ca_bundle, settings.extra_trust_anchor())?;
        let tls = TlsProbe::new(context, &settings.edge_address, settings.tls_timeout);
        let dns = DnsAuthority::from_system_conf(settings.server_ip, settings.dns_timeout)?;
        Ok(Self::new(dns, tls))
    }
}

#[async_trait]
impl CoverageCheck for CertificateValidator {
    async fn resolves_to_self(&self, domain: &str) -> bool {
        self.dns.resolves_to_self(domain).await
    }

    async fn serves_valid_cert(&self, domain: &str) -> bool {
        self.tls.serves_valid_cert(domain).await
    }
}
