//! `tether install`: credentials, readiness probes, dependencies and the
//! assistant config document, in that order.

use super::helpers::{humanize_duration, ssh_options};
use crate::credentials::{self, FixedAnswer, OperatorPrompt, TerminalPrompt, TrustAuthority};
use crate::installer::{DependencyOutcome, Installer, default_manifest};
use crate::output::OutputContext;
use crate::probe;
use anyhow::Context;
use std::time::Instant;
use tether_common::config::TetherConfig;
use tether_common::document::materialize;
use tether_common::{ShellRunner, TetherError};
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    pub dry_run: bool,
    pub skip_credentials: bool,
    pub skip_deps: bool,
    /// Answer every operator prompt with yes.
    pub yes: bool,
}

/// Where the public key has to be registered.
pub fn trust_authorities(config: &TetherConfig) -> anyhow::Result<Vec<TrustAuthority>> {
    let host = config.remote.host_identity()?;
    let public_key = credentials::public_key_path(host.identity_file());
    let mut authorities = vec![TrustAuthority {
        name: host.destination(),
        instruction: format!("ssh-copy-id -i {} {}", public_key.display(), host.destination()),
    }];
    if config.git.enabled {
        authorities.push(TrustAuthority {
            name: config.git.host.clone(),
            instruction: format!("add it at {}", config.git.keys_url),
        });
    }
    Ok(authorities)
}

pub async fn install(config: &TetherConfig, opts: InstallOptions, ctx: &OutputContext) -> anyhow::Result<()> {
    let started = Instant::now();
    let host = config.remote.host_identity()?;
    let ssh = ssh_options(config);

    ctx.header("SSH credentials");
    if opts.skip_credentials {
        ctx.info("Skipped (--skip-credentials)");
    } else if opts.dry_run {
        if host.has_credentials() {
            ctx.success(&format!("SSH key {} exists", host.identity_file().display()));
        } else {
            ctx.info(&format!("Would generate SSH key {}", host.identity_file().display()));
        }
    } else {
        let prompt: Box<dyn OperatorPrompt> = if opts.yes {
            Box::new(FixedAnswer(true))
        } else {
            Box::new(TerminalPrompt)
        };
        let comment = format!("{}@tether", config.remote.resolve_user());
        credentials::provision(
            host.identity_file(),
            &comment,
            &trust_authorities(config)?,
            prompt.as_ref(),
            ctx,
        )
        .await?;
    }

    ctx.header("Remote readiness");
    let principal = probe::probe(&ssh, &host, Some("true"))
        .await?
        .into_result(&host)?;
    ctx.success(&format!("Authenticated to {} as {principal}", host.address));

    if config.git.enabled {
        let git = config.git.host_identity(host.identity_file());
        let git_principal = probe::probe(&ssh, &git, None).await?.into_result(&git)?;
        ctx.success(&format!("Authenticated to {} as {git_principal}", git.address));
        match &config.git.owner {
            Some(owner) => ctx.info(&format!("Repository owner: {owner}")),
            None => {
                info!(owner = %git_principal, "using detected repository owner");
                ctx.info(&format!("Repository owner: {git_principal} (detected)"));
            }
        }
    }

    ctx.header("Dependencies");
    if opts.skip_deps {
        ctx.info("Skipped (--skip-deps)");
    } else {
        let manifest = config
            .install
            .dependencies
            .clone()
            .unwrap_or_else(|| default_manifest(config));
        let runner = ShellRunner::new(ssh.clone());
        let report = Installer::new(
            &runner,
            host.clone(),
            &config.project,
            config.install.download_policy(),
            config.tunnel.state_dir(),
        )
        .dry_run(opts.dry_run)
        .install(&manifest)
        .await?;

        for result in &report.results {
            let label = format!("{} ({}, {})", result.name, result.group, result.target);
            match result.outcome {
                DependencyOutcome::AlreadyPresent => ctx.success(&format!("{label} already present")),
                DependencyOutcome::Installed { attempts: 1 } => ctx.success(&format!("{label} installed")),
                DependencyOutcome::Installed { attempts } => {
                    ctx.success(&format!("{label} installed after {attempts} attempts"))
                }
                DependencyOutcome::WouldInstall => ctx.warning(&format!("{label} would be installed")),
            }
        }
        ctx.info(&format!(
            "{} installed, {} already present",
            report.count(|o| matches!(o, DependencyOutcome::Installed { .. })),
            report.count(|o| *o == DependencyOutcome::AlreadyPresent),
        ));
        if !report.remote_catalog.is_empty() {
            ctx.info(&format!("Remote models: {}", report.remote_catalog.join(", ")));
        }
    }

    ctx.header("Assistant configuration");
    let path = config.project.config_path();
    if opts.dry_run {
        ctx.info(&format!("Would write {}", path.display()));
    } else {
        let settings = config.assistant_settings();
        materialize(&settings, &path)
            .map_err(|e| TetherError::ConfigWriteFailed {
                path: path.clone(),
                message: e.to_string(),
            })
            .with_context(|| format!("materializing {}", path.display()))?;
        ctx.success(&format!("Wrote {}", path.display()));
    }

    ctx.header(&format!(
        "Install finished in {}",
        humanize_duration(started.elapsed().as_secs())
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_authorities() {
        let mut config = TetherConfig::default();
        config.remote.host = "gpu-box".into();
        config.remote.user = Some("ada".into());
        config.remote.identity_file = "/home/ada/.ssh/id_ed25519".into();

        let authorities = trust_authorities(&config).unwrap();
        assert_eq!(authorities.len(), 2);
        assert_eq!(authorities[0].name, "ada@gpu-box");
        assert_eq!(
            authorities[0].instruction,
            "ssh-copy-id -i /home/ada/.ssh/id_ed25519.pub ada@gpu-box"
        );
        assert!(authorities[1].instruction.contains("github.com/settings/keys"));

        config.git.enabled = false;
        assert_eq!(trust_authorities(&config).unwrap().len(), 1);
    }
}
