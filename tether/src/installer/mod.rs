//! Dependency installer.
//!
//! Every spec is checked before anything is installed, so an interrupted
//! install resumes where it stopped. Large artifacts are downloaded under
//! the bounded retry policy; everything else gets a single attempt.

pub mod manifest;

pub use manifest::{default_manifest, install_script, verify_script};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tether_common::config::ProjectConfig;
use tether_common::{
    CommandRunner, DependencySpec, HostIdentity, HostRole, HostTarget, RetryPolicy, SizeClass,
    TetherError, VerifyMethod, run_with_retry,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DependencyOutcome {
    AlreadyPresent,
    Installed { attempts: u32 },
    /// Dry run: missing and would be installed.
    WouldInstall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Absent,
    Downloading,
    Present,
    DownloadFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyResult {
    pub name: String,
    pub group: String,
    pub target: HostRole,
    #[serde(flatten)]
    pub outcome: DependencyOutcome,
}

/// A large downloaded artifact and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelArtifact {
    pub identifier: String,
    pub size: SizeClass,
    pub target: HostRole,
    /// Cache path for local files, otherwise the host whose catalog lists it.
    pub location: String,
    pub state: ModelState,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub results: Vec<DependencyResult>,
    pub models: Vec<ModelArtifact>,
    /// Models the remote engine listed after installation.
    pub remote_catalog: Vec<String>,
}

impl InstallReport {
    pub fn count(&self, pred: impl Fn(&DependencyOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// `<state_dir>/remote-models.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub host: String,
    pub recorded_at: DateTime<Utc>,
    pub models: Vec<String>,
}

pub const CATALOG_FILE: &str = "remote-models.json";

pub struct Installer<'a, R> {
    runner: &'a R,
    remote: HostIdentity,
    project: &'a ProjectConfig,
    download: RetryPolicy,
    dry_run: bool,
    state_dir: PathBuf,
}

impl<'a, R: CommandRunner> Installer<'a, R> {
    pub fn new(
        runner: &'a R,
        remote: HostIdentity,
        project: &'a ProjectConfig,
        download: RetryPolicy,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            runner,
            remote,
            project,
            download,
            dry_run: false,
            state_dir,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Bring every spec to present, in order. The first failure aborts.
    pub async fn install(&self, specs: &[DependencySpec]) -> Result<InstallReport, TetherError> {
        for spec in specs {
            spec.check_version_support().map_err(TetherError::Config)?;
        }
        let mut report = InstallReport::default();
        let mut group = "";

        for spec in specs {
            if spec.group != group {
                group = &spec.group;
                info!(group, "checking dependency group");
            }
            let target = HostTarget::for_role(spec.target, &self.remote);
            let mut model = spec.is_model().then(|| ModelArtifact {
                identifier: spec.name.clone(),
                size: spec.size,
                target: spec.target,
                location: match &spec.verify {
                    VerifyMethod::FileExists { path } => path.clone(),
                    _ => target.label(),
                },
                state: ModelState::Absent,
            });

            let outcome = if self.is_present(spec, &target).await? {
                debug!(name = %spec.name, target = %target.label(), "already present");
                DependencyOutcome::AlreadyPresent
            } else if self.dry_run {
                info!(name = %spec.name, target = %target.label(), "would install");
                DependencyOutcome::WouldInstall
            } else {
                if let Some(model) = model.as_mut() {
                    model.state = ModelState::Downloading;
                }
                match self.install_one(spec, &target).await {
                    Ok(attempts) => DependencyOutcome::Installed { attempts },
                    Err(err) => {
                        if let Some(model) = model.as_mut() {
                            model.state = ModelState::DownloadFailed;
                            report.models.push(model.clone());
                        }
                        return Err(err);
                    }
                }
            };

            if let Some(mut model) = model {
                if outcome != DependencyOutcome::WouldInstall {
                    model.state = ModelState::Present;
                }
                report.models.push(model);
            }
            report.results.push(DependencyResult {
                name: spec.name.clone(),
                group: spec.group.clone(),
                target: spec.target,
                outcome,
            });
        }

        if specs.iter().any(|s| s.target == HostRole::Remote) {
            report.remote_catalog = self.record_catalog().await;
        }
        Ok(report)
    }

    async fn is_present(&self, spec: &DependencySpec, target: &HostTarget) -> Result<bool, TetherError> {
        let output = self
            .runner
            .run(target, &verify_script(spec, self.project))
            .await?;
        Ok(match &spec.verify {
            VerifyMethod::Listed { needle, .. } => output.success() && output.stdout.contains(needle.as_str()),
            _ => output.success(),
        })
    }

    /// Install and re-verify. Returns the attempts the install took.
    async fn install_one(&self, spec: &DependencySpec, target: &HostTarget) -> Result<u32, TetherError> {
        let script = install_script(spec, self.project);
        let policy = match spec.size {
            SizeClass::Small => RetryPolicy::once(),
            SizeClass::Large => self.download,
        };
        info!(name = %spec.name, target = %target.label(), attempts = policy.max_attempts(), "installing");

        let phase = format!("install:{}", spec.name);
        let attempts = run_with_retry(&phase, &policy, |attempt| {
            let script = script.as_str();
            async move {
                let output = self.runner.run(target, script).await.map_err(|e| e.to_string())?;
                if output.success() {
                    Ok(attempt)
                } else {
                    Err(output.last_error_line())
                }
            }
        })
        .await
        .map_err(|exhausted| TetherError::DependencyInstallFailed {
            artifact: spec.name.clone(),
            message: exhausted.to_string(),
        })?;

        if !self.is_present(spec, target).await? {
            return Err(TetherError::DependencyInstallFailed {
                artifact: spec.name.clone(),
                message: "install finished but the dependency is still not detected".to_string(),
            });
        }
        info!(name = %spec.name, attempts, "installed");
        Ok(attempts)
    }

    /// List the remote engine's models and record them. A failed listing
    /// is logged and yields an empty catalog.
    async fn record_catalog(&self) -> Vec<String> {
        let target = HostTarget::Remote(self.remote.clone());
        let models = match self.runner.run(&target, "ollama list").await {
            Ok(output) if output.success() => parse_ollama_list(&output.stdout),
            Ok(output) => {
                warn!(error = %output.last_error_line(), "could not list remote models");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "could not list remote models");
                return Vec::new();
            }
        };

        if self.dry_run {
            return models;
        }
        let record = CatalogRecord {
            host: self.remote.destination(),
            recorded_at: Utc::now(),
            models: models.clone(),
        };
        match write_catalog(&self.state_dir, &record) {
            Ok(path) => debug!(path = %path.display(), count = models.len(), "recorded remote catalog"),
            Err(e) => warn!(error = %e, "failed to record remote catalog"),
        }
        models
    }
}

/// Model names from `ollama list` output.
pub fn parse_ollama_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| !line.trim_start().starts_with("NAME"))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

pub fn write_catalog(state_dir: &Path, record: &CatalogRecord) -> std::io::Result<PathBuf> {
    fs::create_dir_all(state_dir)?;
    let path = state_dir.join(CATALOG_FILE);
    let mut tmp = tempfile::NamedTempFile::new_in(state_dir)?;
    serde_json::to_writer_pretty(&mut tmp, record)?;
    tmp.write_all(b"\n")?;
    tmp.persist(&path).map_err(|e| e.error)?;
    Ok(path)
}
