//! Error types for probing, issuance and cleanup.
//!
//! None of these abort a reconciliation run. Probe errors degrade to "not
//! covered", issuance errors are recorded per backend group, and parse or
//! filesystem errors leave the affected certificate in place.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors building the probe context at startup
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Failed to read trust anchors from {}: {source}", .path.display())]
    TrustAnchors {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No usable trust anchors in {}", .0.display())]
    EmptyTrustStore(PathBuf),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Failed to initialize DNS resolver: {0}")]
    Resolver(String),
}

/// Reasons a live probe reports a domain as not covered
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Invalid server name: {0}")]
    InvalidName(String),

    #[error("Connection to edge failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("DNS resolution failed: {0}")]
    Resolve(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}

/// Failure of one issuance client invocation
#[derive(Error, Debug)]
pub enum IssuanceError {
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Issuance client timed out after {0:?}")]
    Timeout(Duration),

    #[error("Issuance client exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Failure to derive served names from a certificate file
#[derive(Error, Debug)]
pub enum CertificateParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid PEM: {0}")]
    Pem(String),

    #[error("No CERTIFICATE block found")]
    NoCertificate,

    #[error("Invalid X509 certificate: {0}")]
    X509(String),

    #[error("Certificate contains neither Subject Alternative Names nor a Common Name")]
    NoNames,
}

/// Filesystem failures during cleanup
#[derive(Error, Debug)]
pub enum CleanupError {
    #[error("Failed to enumerate certificates in {}: {reason}", .dir.display())]
    Enumerate { dir: PathBuf, reason: String },

    #[error("Failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to disable renewal descriptor {}: {source}", .path.display())]
    DisableRenewal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
