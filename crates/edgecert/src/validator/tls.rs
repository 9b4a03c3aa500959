//! Live certificate check against the edge HTTPS listener.
//!
//! Connecting to the edge with the domain in SNI and letting rustls verify
//! the chain and hostname reports exactly what clients receive. It covers
//! wildcard certificates and certificates installed by other tooling without
//! inspecting any files.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, trace, warn};

use crate::error::{ProbeError, SetupError};

/// TLS client configuration built once per run and shared by every probe.
#[derive(Clone)]
pub struct TlsContext {
    config: Arc<ClientConfig>,
}

impl TlsContext {
    /// Build a context trusting the system CA bundle, plus `extra_anchor`
    /// when given.
    ///
    /// # Errors
    ///
    /// Fails if either file cannot be read or the bundle yields no usable
    /// certificate. Probing with an empty trust store would report every
    /// domain as uncovered and trigger a mass re-issuance.
    pub fn load(ca_bundle: &Path, extra_anchor: Option<&Path>) -> Result<Self, SetupError> {
        let mut roots = RootCertStore::empty();

        let added = add_anchors(&mut roots, ca_bundle)?;
        if added == 0 {
            return Err(SetupError::EmptyTrustStore(ca_bundle.to_path_buf()));
        }

        if let Some(extra) = extra_anchor {
            let extra_added = add_anchors(&mut roots, extra)?;
            if extra_added == 0 {
                return Err(SetupError::EmptyTrustStore(extra.to_path_buf()));
            }
        }

        info!(
            ca_bundle = %ca_bundle.display(),
            extra_anchor = ?extra_anchor.map(Path::display).map(|d| d.to_string()),
            trust_anchors = roots.len(),
            "Initialized TLS probe context"
        );

        Self::with_roots(roots)
    }

    /// Build a context from an explicit root store.
    pub fn with_roots(roots: RootCertStore) -> Result<Self, SetupError> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
        })
    }

    fn connector(&self) -> TlsConnector {
        TlsConnector::from(Arc::clone(&self.config))
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext").finish_non_exhaustive()
    }
}

/// Read every PEM certificate in `path` into `roots`, returning how many
/// were accepted.
fn add_anchors(roots: &mut RootCertStore, path: &Path) -> Result<usize, SetupError> {
    let io_err = |source| SetupError::TrustAnchors {
        path: PathBuf::from(path),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(io_err)?;

    let (valid, invalid) = roots.add_parsable_certificates(certs);
    if invalid > 0 {
        warn!(
            path = %path.display(),
            invalid,
            "Ignored unparsable trust anchors"
        );
    }
    trace!(path = %path.display(), valid, "Loaded trust anchors");

    Ok(valid)
}

/// Probes the edge listener for a valid certificate per domain.
#[derive(Debug, Clone)]
pub struct TlsProbe {
    context: TlsContext,
    edge_address: String,
    timeout: Duration,
}

impl TlsProbe {
    /// # Arguments
    ///
    /// * `context` - Trust configuration shared by every probe
    /// * `edge_address` - `host:port` of the edge HTTPS listener
    /// * `probe_timeout` - Bound on connect plus handshake
    pub fn new(context: TlsContext, edge_address: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            context,
            edge_address: edge_address.into(),
            timeout: probe_timeout,
        }
    }

    /// Complete a verified handshake with `domain` in SNI.
    pub async fn probe(&self, domain: &str) -> Result<(), ProbeError> {
        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|_| ProbeError::InvalidName(domain.to_string()))?;
        let connector = self.context.connector();

        let handshake = async {
            let stream = TcpStream::connect(self.edge_address.as_str())
                .await
                .map_err(ProbeError::Connect)?;
            let mut tls = connector
                .connect(server_name, stream)
                .await
                .map_err(ProbeError::Handshake)?;
            // Best effort close_notify; the verdict is already in
            let _ = tls.shutdown().await;
            Ok::<(), ProbeError>(())
        };

        timeout(self.timeout, handshake)
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
    }

    /// Whether the edge presents a trusted certificate matching `domain`.
    pub async fn serves_valid_cert(&self, domain: &str) -> bool {
        match self.probe(domain).await {
            Ok(()) => {
                trace!(domain = %domain, "Edge serves a valid certificate");
                true
            }
            Err(e) => {
                debug!(
                    domain = %domain,
                    edge = %self.edge_address,
                    error = %e,
                    "Edge does not serve a valid certificate"
                );
                false
            }
        }
    }
}
