//! Integration verifier.
//!
//! Runs a fixed battery of read-only checks and reports a scorecard. A
//! failing check never stops the ones after it.

use crate::endpoint::{EngineEndpoint, model_listed};
use crate::installer::manifest::shell_path;
use crate::installer::verify_script;
use crate::preflight::{ArtifactKind, required_artifacts};
use crate::probe::{self, ProbeOutcome};
use crate::tunnel::pid_file_path;
use serde::Serialize;
use std::path::PathBuf;
use tether_common::config::TetherConfig;
use tether_common::document::missing_keys;
use tether_common::process;
use tether_common::ssh::{quote, quote_path};
use tether_common::{
    CommandRunner, DependencySpec, HostIdentity, HostRole, HostTarget, InstallMethod, SizeClass,
    SshOptions, TetherError, VerifyMethod,
};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckKind {
    Path { path: PathBuf, kind: ArtifactKind },
    /// Config document exists and has every required key.
    ConfigComplete { path: PathBuf },
    /// `script` exits 0 (and prints `needle`, when set). On failure
    /// `diagnostic` is run and its output kept.
    Command {
        target: HostTarget,
        script: String,
        needle: Option<String>,
        diagnostic: Option<String>,
    },
    SshAuth { host: HostIdentity },
    /// The pid recorded for the tunnel is alive.
    TunnelProcess { pid_file: PathBuf },
    Endpoint { url: String },
    ModelListed { url: String, model: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub kind: CheckKind,
}

impl Check {
    fn new(name: impl Into<String>, kind: CheckKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub outcome: CheckOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl CheckResult {
    fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: CheckOutcome::Pass,
            diagnostic: None,
        }
    }

    fn fail(name: &str, diagnostic: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            outcome: CheckOutcome::Fail,
            diagnostic: Some(diagnostic.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == CheckOutcome::Pass
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scorecard {
    pub results: Vec<CheckResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
    /// `passed * 100 / total`, rounded down.
    pub success_rate: usize,
}

impl Scorecard {
    pub fn from_results(results: Vec<CheckResult>) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed()).count();
        let success_rate = if total == 0 { 100 } else { passed * 100 / total };
        Self {
            results,
            passed,
            failed: total - passed,
            total,
            success_rate,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// The fixed check list for `config`. With `local_only`, checks that need
/// the remote host or the tunnel are left out.
pub fn build_suite(config: &TetherConfig, local_only: bool) -> Result<Vec<Check>, TetherError> {
    let project = &config.project;
    let settings = config.assistant_settings();
    let python = quote_path(&project.venv_python());
    let mut checks = Vec::new();

    let artifacts = required_artifacts(project);
    let (config_file, paths): (Vec<_>, Vec<_>) =
        artifacts.into_iter().partition(|a| a.path == project.config_path());
    let mut paths = paths.into_iter();
    if let Some(venv) = paths.next() {
        checks.push(Check::new(venv.name, CheckKind::Path { path: venv.path, kind: venv.kind }));
    }
    for artifact in config_file {
        checks.push(Check::new(
            "configuration file complete",
            CheckKind::ConfigComplete { path: artifact.path },
        ));
    }
    for artifact in paths {
        checks.push(Check::new(artifact.name, CheckKind::Path { path: artifact.path, kind: artifact.kind }));
    }

    for module in &project.required_modules {
        let spec = DependencySpec {
            name: module.clone(),
            version: None,
            group: "verify".to_string(),
            target: HostRole::Local,
            verify: VerifyMethod::Importable { module: module.clone() },
            install: InstallMethod::Script { command: String::new() },
            size: SizeClass::Small,
        };
        checks.push(Check::new(
            format!("python module {module}"),
            CheckKind::Command {
                target: HostTarget::Local,
                script: verify_script(&spec, project),
                needle: None,
                diagnostic: None,
            },
        ));
    }

    let cache = config.install.speech_model_cache.trim_end_matches('/');
    let whisper = DependencySpec {
        name: settings.whisper_model.clone(),
        version: None,
        group: "verify".to_string(),
        target: HostRole::Local,
        verify: VerifyMethod::FileExists {
            path: format!("{cache}/{}.pt", settings.whisper_model),
        },
        install: InstallMethod::Script { command: String::new() },
        size: SizeClass::Large,
    };
    checks.push(Check::new(
        format!("speech model {} cached", settings.whisper_model),
        CheckKind::Command {
            target: HostTarget::Local,
            script: verify_script(&whisper, project),
            needle: None,
            diagnostic: Some(format!("ls -la {}", shell_path(cache))),
        },
    ));

    checks.push(Check::new(
        "audio input device",
        CheckKind::Command {
            target: HostTarget::Local,
            script: format!(
                "{python} -c {}",
                quote("import sounddevice as sd; print(sd.query_devices(kind='input')['name'])")
            ),
            needle: None,
            diagnostic: Some(format!(
                "{python} -c {}",
                quote("import sounddevice as sd; print(sd.query_devices())")
            )),
        },
    ));

    if local_only {
        return Ok(checks);
    }

    let host = config.remote.host_identity()?;
    checks.push(Check::new(
        format!("ssh authentication to {}", host.destination()),
        CheckKind::SshAuth { host: host.clone() },
    ));
    checks.push(Check::new(
        "remote inference engine running",
        CheckKind::Command {
            target: HostTarget::Remote(host),
            script: "ollama list".to_string(),
            needle: Some("NAME".to_string()),
            diagnostic: Some(
                "systemctl status ollama --no-pager 2>&1 || pgrep -a ollama || echo 'ollama is not running'"
                    .to_string(),
            ),
        },
    ));
    checks.push(Check::new(
        "tunnel process alive",
        CheckKind::TunnelProcess {
            pid_file: pid_file_path(&config.tunnel.state_dir(), config.tunnel.local_port),
        },
    ));
    let url = config.tunnel.status_url();
    checks.push(Check::new("tunnel endpoint answering", CheckKind::Endpoint { url: url.clone() }));
    for model in settings.required_models() {
        checks.push(Check::new(
            format!("model {model} available"),
            CheckKind::ModelListed {
                url: url.clone(),
                model,
            },
        ));
    }

    Ok(checks)
}

pub struct Verifier<'a, R, E> {
    runner: &'a R,
    endpoint: &'a E,
    ssh: SshOptions,
}

impl<'a, R: CommandRunner, E: EngineEndpoint> Verifier<'a, R, E> {
    pub fn new(runner: &'a R, endpoint: &'a E, ssh: SshOptions) -> Self {
        Self { runner, endpoint, ssh }
    }

    /// Run every check in order.
    pub async fn run_suite(&self, checks: &[Check]) -> Scorecard {
        let mut results = Vec::with_capacity(checks.len());
        for check in checks {
            let result = self.run_check(check).await;
            match &result.diagnostic {
                Some(diagnostic) if !result.passed() => {
                    warn!(check = %check.name, diagnostic, "check failed")
                }
                _ => debug!(check = %check.name, "check passed"),
            }
            results.push(result);
        }
        Scorecard::from_results(results)
    }

    async fn run_check(&self, check: &Check) -> CheckResult {
        let name = check.name.as_str();
        match &check.kind {
            CheckKind::Path { path, kind } => {
                let present = match kind {
                    ArtifactKind::Directory => path.is_dir(),
                    ArtifactKind::File => path.is_file(),
                };
                if present {
                    CheckResult::pass(name)
                } else {
                    CheckResult::fail(name, format!("{} not found", path.display()))
                }
            }

            CheckKind::ConfigComplete { path } => match std::fs::read_to_string(path) {
                Err(e) => CheckResult::fail(name, format!("{}: {e}", path.display())),
                Ok(content) => match missing_keys(&content) {
                    Ok(missing) if missing.is_empty() => CheckResult::pass(name),
                    Ok(missing) => CheckResult::fail(name, format!("missing keys: {}", missing.join(", "))),
                    Err(e) => CheckResult::fail(name, e.to_string()),
                },
            },

            CheckKind::Command {
                target,
                script,
                needle,
                diagnostic,
            } => {
                let ok = match self.runner.run(target, script).await {
                    Ok(output) => {
                        output.success()
                            && needle.as_deref().is_none_or(|n| output.stdout.contains(n))
                    }
                    Err(e) => return CheckResult::fail(name, e.to_string()),
                };
                if ok {
                    return CheckResult::pass(name);
                }
                let rerun = diagnostic.as_deref().unwrap_or(script);
                let detail = match self.runner.run(target, rerun).await {
                    Ok(output) => output.transcript().trim().to_string(),
                    Err(e) => e.to_string(),
                };
                CheckResult::fail(name, if detail.is_empty() { "no output".to_string() } else { detail })
            }

            CheckKind::SshAuth { host } => match probe::probe(&self.ssh, host, Some("true")).await {
                Ok(ProbeOutcome::Ready { .. }) => CheckResult::pass(name),
                Ok(ProbeOutcome::AuthFailed { transcript }) => CheckResult::fail(name, transcript.trim()),
                Err(e) => CheckResult::fail(name, e.to_string()),
            },

            CheckKind::TunnelProcess { pid_file } => match process::read_pid_file(pid_file) {
                Some(pid) if process::is_process_alive(pid) => CheckResult::pass(name),
                Some(pid) => CheckResult::fail(name, format!("recorded forward {pid} is not running")),
                None => CheckResult::fail(
                    name,
                    format!("no tunnel recorded at {} (is `tether run` active?)", pid_file.display()),
                ),
            },

            CheckKind::Endpoint { url } => match self.endpoint.status(url).await {
                Ok(()) => CheckResult::pass(name),
                Err(e) => CheckResult::fail(name, format!("{url}: {e}")),
            },

            CheckKind::ModelListed { url, model } => match self.endpoint.models(url).await {
                Ok(models) if model_listed(&models, model) => CheckResult::pass(name),
                Ok(models) => CheckResult::fail(name, format!("available: {}", models.join(", "))),
                Err(e) => CheckResult::fail(name, format!("{url}: {e}")),
            },
        }
    }
}
