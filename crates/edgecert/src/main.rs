//! edgecert - main entry point
//!
//! Reconciles HAProxy certificates with the routed domains. Intended to be
//! run from cron or a systemd timer; runs must never overlap.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use edgecert::{CertbotClient, CertificateValidator, Reconciler};
use edgecert_config::settings::{
    DEFAULT_CA_BUNDLE, DEFAULT_CHALLENGE_PORT, DEFAULT_DNS_TIMEOUT, DEFAULT_EDGE_ADDRESS,
    DEFAULT_ISSUANCE_COMMAND, DEFAULT_ISSUANCE_TIMEOUT, DEFAULT_RENEWAL_DIR, DEFAULT_TLS_TIMEOUT,
};
use edgecert_config::{expand_arg_files, ReconcileSettings};

/// edgecert - issue missing and remove unused HAProxy certificates
#[derive(Parser, Debug)]
#[command(name = "edgecert")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Arguments can be read from a file with @path; every \
    whitespace-separated word in the file becomes one argument.\n\n\
    Schedule runs so that they never overlap.")]
struct Cli {
    /// Public IP address domains must resolve to before a certificate is requested
    #[arg(long = "server-ip", env = "EDGECERT_SERVER_IP")]
    server_ip: IpAddr,

    /// HAProxy backend map listing the routed domains
    #[arg(long = "haproxy-backend-map", env = "EDGECERT_BACKEND_MAP")]
    backend_map: PathBuf,

    /// Directory of certificates served by HAProxy
    #[arg(long = "haproxy-certs-dir", env = "EDGECERT_CERTS_DIR")]
    certs_dir: PathBuf,

    /// Contact address registered with Let's Encrypt
    #[arg(long = "contact-email", env = "EDGECERT_CONTACT_EMAIL")]
    contact_email: String,

    /// Request certificates from the Let's Encrypt staging environment
    #[arg(long = "letsencrypt-use-staging")]
    use_staging: bool,

    /// Additional trust anchor for staging certificates
    #[arg(long = "letsencrypt-fake-cert")]
    fake_cert: Option<PathBuf>,

    /// Directory of certbot renewal descriptors
    #[arg(long = "renewal-dir", default_value = DEFAULT_RENEWAL_DIR)]
    renewal_dir: PathBuf,

    /// System CA bundle used to verify served certificates
    #[arg(long = "ca-bundle", default_value = DEFAULT_CA_BUNDLE)]
    ca_bundle: PathBuf,

    /// Edge HTTPS listener probed for live certificates
    #[arg(long = "edge-address", default_value = DEFAULT_EDGE_ADDRESS)]
    edge_address: String,

    /// Issuance client executable
    #[arg(long = "issuance-command", default_value = DEFAULT_ISSUANCE_COMMAND)]
    issuance_command: String,

    /// Port of the standalone HTTP-01 challenge responder
    #[arg(long = "challenge-port", default_value_t = DEFAULT_CHALLENGE_PORT)]
    challenge_port: u16,

    /// Seconds to wait for a DNS answer
    #[arg(long = "dns-timeout-secs", default_value_t = DEFAULT_DNS_TIMEOUT.as_secs())]
    dns_timeout_secs: u64,

    /// Seconds allowed for connecting to the edge and completing a TLS handshake
    #[arg(long = "tls-timeout-secs", default_value_t = DEFAULT_TLS_TIMEOUT.as_secs())]
    tls_timeout_secs: u64,

    /// Seconds before an issuance client run is killed
    #[arg(long = "issuance-timeout-secs", default_value_t = DEFAULT_ISSUANCE_TIMEOUT.as_secs())]
    issuance_timeout_secs: u64,

    /// Probe and report, but do not request or remove certificates
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Print the run summary to stdout as JSON
    #[arg(long = "summary-json")]
    summary_json: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn settings(&self) -> ReconcileSettings {
        let mut settings = ReconcileSettings::new(
            self.server_ip,
            &self.backend_map,
            &self.certs_dir,
            &self.contact_email,
        );
        settings.use_staging = self.use_staging;
        settings.fake_cert = self.fake_cert.clone();
        settings.renewal_dir = self.renewal_dir.clone();
        settings.ca_bundle = self.ca_bundle.clone();
        settings.edge_address = self.edge_address.clone();
        settings.issuance_command = self.issuance_command.clone();
        settings.challenge_port = self.challenge_port;
        settings.dns_timeout = Duration::from_secs(self.dns_timeout_secs);
        settings.tls_timeout = Duration::from_secs(self.tls_timeout_secs);
        settings.issuance_timeout = Duration::from_secs(self.issuance_timeout_secs);
        settings.dry_run = self.dry_run;
        settings
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse_from(command_line()?);
    init_logging(cli.verbose, cli.log_format);

    let settings = cli.settings();
    settings.validate().context("Invalid configuration")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let summary = runtime.block_on(async {
        let validator = CertificateValidator::from_settings(&settings)
            .context("Failed to initialize certificate probes")?;
        let issuer = CertbotClient::from_settings(&settings);

        Reconciler::new(settings, validator, issuer)
            .run()
            .await
            .context("Reconciliation aborted")
    })?;

    if cli.summary_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize run summary")?
        );
    }

    info!(
        requested = summary.requested_domains().count(),
        removed = summary.cleanup.removed.len(),
        "edgecert run complete"
    );

    Ok(())
}

/// Process arguments with `@file` references expanded. The program name is
/// never expanded.
fn command_line() -> Result<Vec<OsString>> {
    let mut args = std::env::args_os();
    let program = args.next().unwrap_or_else(|| OsString::from("edgecert"));
    let rest = expand_arg_files(args).context("Failed to read argument file")?;
    Ok(std::iter::once(program).chain(rest).collect())
}

/// Logs go to stderr so that `--summary-json` output stays parseable.
fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
