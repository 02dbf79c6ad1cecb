//! Remote readiness probe.
//!
//! One non-interactive `ssh -T` attempt per host, never retried. The exit
//! status decides first; only when it is non-zero is the transcript handed
//! to [`parse_greeting`], which recognizes a code host's
//! "authenticated, but no shell" reply.

use regex::Regex;
use std::process::Stdio;
use std::sync::LazyLock;
use tether_common::{CommandOutput, HostIdentity, SshOptions, TetherError};
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Authentication succeeded as `principal`.
    Ready { principal: String },
    AuthFailed { transcript: String },
}

impl ProbeOutcome {
    /// Map a failure onto the install-time error.
    pub fn into_result(self, host: &HostIdentity) -> Result<String, TetherError> {
        match self {
            Self::Ready { principal } => Ok(principal),
            Self::AuthFailed { transcript } => Err(TetherError::AuthenticationNotConfigured {
                host: host.destination(),
                detail: transcript
                    .lines()
                    .rev()
                    .find(|line| !line.trim().is_empty())
                    .unwrap_or("no output")
                    .trim()
                    .to_string(),
            }),
        }
    }
}

static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Hi ([A-Za-z0-9][A-Za-z0-9._-]*)(?:/[A-Za-z0-9._-]+)?! You've successfully authenticated")
        .expect("greeting regex is valid")
});

/// Extract the authenticated principal from a code host's greeting.
pub fn parse_greeting(transcript: &str) -> Option<String> {
    GREETING
        .captures(transcript)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Classify a finished probe.
pub fn classify(output: &CommandOutput, host: &HostIdentity) -> ProbeOutcome {
    if output.success() {
        return ProbeOutcome::Ready {
            principal: host.principal.clone(),
        };
    }
    let transcript = output.transcript();
    match parse_greeting(&transcript) {
        Some(principal) => ProbeOutcome::Ready { principal },
        None => ProbeOutcome::AuthFailed { transcript },
    }
}

/// Probe `host` once. `remote_command` is run after login when given;
/// code hosts refuse commands, so they are probed without one.
pub async fn probe(
    options: &SshOptions,
    host: &HostIdentity,
    remote_command: Option<&str>,
) -> Result<ProbeOutcome, TetherError> {
    if !host.has_credentials() {
        return Ok(ProbeOutcome::AuthFailed {
            transcript: format!("identity file {} does not exist", host.identity_file().display()),
        });
    }

    let mut cmd = Command::new("ssh");
    cmd.arg("-T");
    cmd.args(options.args_for(host));
    cmd.arg(host.destination());
    if let Some(command) = remote_command {
        cmd.arg(command);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(host = %host, "probing ssh authentication");
    let output = cmd
        .output()
        .await
        .map_err(|e| TetherError::spawn("ssh", e))?;
    let output = CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    let outcome = classify(&output, host);
    match &outcome {
        ProbeOutcome::Ready { principal } => info!(host = %host, principal, "ssh authentication ok"),
        ProbeOutcome::AuthFailed { transcript } => {
            warn!(host = %host, exit_code = ?output.exit_code, transcript, "ssh authentication failed")
        }
    }
    Ok(outcome)
}
