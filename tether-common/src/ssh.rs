//! Running shell scripts on the local machine or a remote host over SSH.
//!
//! Remote commands go through the system `ssh` client in batch mode, so a
//! missing key fails fast instead of prompting for a password.

use crate::errors::TetherError;
use crate::types::{HostIdentity, HostRole};
use std::borrow::Cow;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Client options applied to every ssh invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    /// Never prompt for passwords or passphrases.
    pub batch_mode: bool,
    /// `StrictHostKeyChecking` value.
    pub host_key_policy: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            batch_mode: true,
            host_key_policy: "accept-new".to_string(),
        }
    }
}

impl SshOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Arguments placed before the destination: `-o ...` options, the
    /// identity file and the port.
    pub fn args_for(&self, host: &HostIdentity) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("BatchMode={}", if self.batch_mode { "yes" } else { "no" }),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.host_key_policy),
        ];
        if !host.identity_file().as_os_str().is_empty() {
            args.push("-i".to_string());
            args.push(host.identity_file().display().to_string());
        }
        if host.ssh_port != 22 {
            args.push("-p".to_string());
            args.push(host.ssh_port.to_string());
        }
        args
    }
}

/// Where a script runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostTarget {
    Local,
    Remote(HostIdentity),
}

impl HostTarget {
    /// Target for a manifest role; `remote` is used for [`HostRole::Remote`].
    pub fn for_role(role: HostRole, remote: &HostIdentity) -> Self {
        match role {
            HostRole::Local => Self::Local,
            HostRole::Remote => Self::Remote(remote.clone()),
        }
    }

    pub fn role(&self) -> HostRole {
        match self {
            Self::Local => HostRole::Local,
            Self::Remote(_) => HostRole::Remote,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Local => "local".to_string(),
            Self::Remote(host) => host.destination(),
        }
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn transcript(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }

    /// Last non-empty stderr line, or stdout's if stderr is empty.
    pub fn last_error_line(&self) -> String {
        let pick = |text: &str| {
            text.lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
        };
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or_else(|| match self.exit_code {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_string(),
            })
    }
}

/// Runs shell scripts on a [`HostTarget`].
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        target: &HostTarget,
        script: &str,
    ) -> impl Future<Output = Result<CommandOutput, TetherError>> + Send;
}

/// [`CommandRunner`] backed by `sh -c` locally and `ssh` remotely.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    options: SshOptions,
}

impl ShellRunner {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    fn command_for(&self, target: &HostTarget, script: &str) -> Command {
        match target {
            HostTarget::Local => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script);
                cmd
            }
            HostTarget::Remote(host) => {
                let mut cmd = Command::new("ssh");
                cmd.args(self.options.args_for(host));
                cmd.arg(host.destination());
                // Login shell so user-local tool paths (ollama, pip) resolve.
                cmd.arg(format!("sh -lc {}", quote(script)));
                cmd
            }
        }
    }
}

impl CommandRunner for ShellRunner {
    async fn run(&self, target: &HostTarget, script: &str) -> Result<CommandOutput, TetherError> {
        let mut cmd = self.command_for(target, script);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(target = %target.label(), script, "running command");
        let program = match target {
            HostTarget::Local => "sh",
            HostTarget::Remote(_) => "ssh",
        };
        let output = cmd
            .output()
            .await
            .map_err(|e| TetherError::spawn(program, e))?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(
            target = %target.label(),
            exit_code = ?result.exit_code,
            "command finished"
        );
        Ok(result)
    }
}

/// Quote a value for inclusion in a POSIX shell script.
pub fn quote(value: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(value)).into_owned()
}

/// Quote a path for inclusion in a POSIX shell script.
pub fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}
