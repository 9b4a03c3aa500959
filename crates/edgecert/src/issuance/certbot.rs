//! certbot issuance client
//!
//! Runs `certbot certonly` with the standalone authenticator. The edge
//! forwards `/.well-known/acme-challenge/` to the challenge port, so the
//! running HAProxy keeps serving traffic during validation. certbot writes
//! the certificate and its renewal descriptor; a deploy hook is expected to
//! install the combined PEM into the HAProxy certificate directory.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

use edgecert_config::ReconcileSettings;

use super::{IssuanceClient, IssuanceOptions};
use crate::error::IssuanceError;

/// Lines of stderr kept in a failure report
const STDERR_TAIL_LINES: usize = 20;

/// Issuance client shelling out to certbot
#[derive(Debug, Clone)]
pub struct CertbotClient {
    program: String,
    timeout: Duration,
}

impl CertbotClient {
    pub fn new(program: impl Into<String>, run_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout: run_timeout,
        }
    }

    pub fn from_settings(settings: &ReconcileSettings) -> Self {
        Self::new(&settings.issuance_command, settings.issuance_timeout)
    }

    /// Command-line arguments requesting one certificate for `domains`.
    pub fn command_args(domains: &[String], options: &IssuanceOptions) -> Vec<String> {
        let mut args: Vec<String> = [
            "certonly",
            "--email",
            options.contact_email.as_str(),
            "--authenticator",
            "standalone",
            "--preferred-challenges",
            "http",
            "--http-01-port",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push(options.challenge_port.to_string());
        args.extend(
            ["--non-interactive", "--agree-tos", "--keep", "--expand"]
                .iter()
                .map(|s| s.to_string()),
        );

        if options.staging {
            args.push("--staging".to_string());
        }

        for domain in domains {
            args.push("-d".to_string());
            args.push(domain.clone());
        }

        args
    }
}

#[async_trait]
impl IssuanceClient for CertbotClient {
    async fn issue(&self, domains: &[String], options: &IssuanceOptions) -> Result<(), IssuanceError> {
        let args = Self::command_args(domains, options);
        debug!(command = %self.program, args = ?args, "Running issuance client");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| IssuanceError::Timeout(self.timeout))?
            .map_err(|source| IssuanceError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        trace!(
            stdout = %String::from_utf8_lossy(&output.stdout),
            "Issuance client output"
        );

        if output.status.success() {
            Ok(())
        } else {
            Err(IssuanceError::Failed {
                status: output.status.to_string(),
                stderr: tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_LINES),
            })
        }
    }
}

/// Last `lines` non-empty lines of `text`, joined with ` | `.
fn tail(text: &str, lines: usize) -> String {
    let kept: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join(" | ")
}
