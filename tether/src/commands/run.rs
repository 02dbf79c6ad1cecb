//! `tether run`: preflight, tunnel, assistant, release.

use super::helpers::{humanize_duration, ssh_options};
use crate::endpoint::{EngineEndpoint, HttpEndpoint};
use crate::output::OutputContext;
use crate::preflight::check_local_readiness;
use crate::tunnel::{ForwardLauncher, ForwardSpec, PortControl, SshForwardLauncher, SystemPorts, TunnelSupervisor};
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_common::TetherError;
use tether_common::config::TetherConfig;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A received termination signal: its name and the exit status to report.
pub type Interrupt = (&'static str, i32);

/// Resolves on the first SIGINT, SIGTERM or SIGHUP.
#[cfg(unix)]
pub async fn shutdown_signal() -> Interrupt {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut term, mut hup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(term), Ok(hup)) => (term, hup),
        _ => {
            warn!("cannot listen for SIGTERM/SIGHUP, only Ctrl-C is handled");
            let _ = tokio::signal::ctrl_c().await;
            return ("SIGINT", 130);
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => ("SIGINT", 130),
        _ = term.recv() => ("SIGTERM", 143),
        _ = hup.recv() => ("SIGHUP", 129),
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> Interrupt {
    let _ = tokio::signal::ctrl_c().await;
    ("SIGINT", 130)
}

pub async fn run(config: &TetherConfig, args: &[String], ctx: &OutputContext) -> anyhow::Result<i32> {
    let endpoint = HttpEndpoint::new(Duration::from_secs(5))?;
    run_app(
        config,
        args,
        SshForwardLauncher,
        endpoint,
        Arc::new(SystemPorts),
        shutdown_signal(),
        ctx,
    )
    .await
}

/// The session flow with its collaborators injected. Returns the exit
/// status to report: the assistant's, or the signal's.
pub async fn run_app<L, E, S>(
    config: &TetherConfig,
    args: &[String],
    launcher: L,
    endpoint: E,
    ports: Arc<dyn PortControl>,
    shutdown: S,
    ctx: &OutputContext,
) -> anyhow::Result<i32>
where
    L: ForwardLauncher,
    E: EngineEndpoint,
    S: Future<Output = Interrupt>,
{
    let project = &config.project;
    check_local_readiness(project)?;
    ctx.success("Local environment ready");

    let host = config.remote.host_identity()?;
    if !host.has_credentials() {
        return Err(TetherError::AuthenticationNotConfigured {
            host: host.destination(),
            detail: format!(
                "identity file {} does not exist (run `tether install`)",
                host.identity_file().display()
            ),
        }
        .into());
    }

    let supervisor = TunnelSupervisor::new(launcher, endpoint, ports, &config.tunnel);
    let spec = ForwardSpec::from_config(host, &config.tunnel, ssh_options(config));
    tokio::pin!(shutdown);

    let mut guard = tokio::select! {
        guard = supervisor.acquire(&spec) => guard?,
        (signal, code) = &mut shutdown => {
            warn!(signal, "interrupted while establishing the tunnel");
            return Ok(code);
        }
    };
    debug!(pid = ?guard.pid(), pid_file = %guard.pid_file().display(), "session acquired");
    ctx.success(&format!(
        "Tunnel ready on 127.0.0.1:{} -> {}:{}",
        guard.local_port(),
        spec.host.address,
        spec.remote_port
    ));

    let started = Instant::now();
    let mut child = Command::new(project.venv_python())
        .arg(project.entry_path())
        .args(args)
        .current_dir(project.root())
        .env("OLLAMA_HOST", format!("http://127.0.0.1:{}", guard.local_port()))
        .stdin(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TetherError::spawn(project.venv_python().display().to_string(), e))?;
    info!(pid = child.id(), entry = %project.entry_path().display(), "assistant started");

    let code = tokio::select! {
        status = child.wait() => {
            let status = status?;
            info!(%status, "assistant exited");
            status.code().unwrap_or(1)
        }
        (signal, code) = &mut shutdown => {
            warn!(signal, "interrupted, stopping assistant");
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "failed to signal assistant");
            }
            let _ = child.wait().await;
            code
        }
    };

    if !guard.is_forward_alive() {
        warn!(port = guard.local_port(), "tunnel dropped before the session ended");
    }
    let guard = guard.release_blocking().await?;
    debug!(state = ?guard.state(), "session closed");
    ctx.info(&format!(
        "Session ended after {}",
        humanize_duration(started.elapsed().as_secs())
    ));
    Ok(code)
}
