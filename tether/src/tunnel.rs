//! Port-forward session supervision.
//!
//! [`TunnelSupervisor::acquire`] walks a session through
//! `Unbound → PortReserved → ForwardStarting → ForwardReady` and hands back
//! a [`TunnelGuard`]. The guard owns the forwarding process; releasing it
//! (explicitly or on drop) kills and reaps the process, removes the pid
//! file and makes sure the local port is free again.
//!
//! The pid file `<state_dir>/tunnel-<port>.pid` is only a recovery record
//! for sessions whose owner died without releasing.

use crate::endpoint::EngineEndpoint;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tether_common::config::TunnelConfig;
use tether_common::process::{self, Signal};
use tether_common::{HostIdentity, RetryPolicy, SshOptions, TetherError, poll_until, run_with_retry_if};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long a forward gets to exit after SIGTERM.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    PortReserved,
    ForwardStarting,
    ForwardReady,
    Released,
    Failed,
}

/// What to forward, and through which host.
#[derive(Debug, Clone)]
pub struct ForwardSpec {
    pub host: HostIdentity,
    pub local_port: u16,
    pub remote_port: u16,
    /// Address the remote sshd connects to.
    pub remote_bind: String,
    pub ssh: SshOptions,
}

impl ForwardSpec {
    pub fn from_config(host: HostIdentity, tunnel: &TunnelConfig, ssh: SshOptions) -> Self {
        Self {
            host,
            local_port: tunnel.local_port,
            remote_port: tunnel.remote_port,
            remote_bind: tunnel.remote_bind.clone(),
            ssh,
        }
    }

    /// Arguments for `ssh` running the forward in the foreground.
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-N".to_string(),
            "-L".to_string(),
            format!(
                "127.0.0.1:{}:{}:{}",
                self.local_port, self.remote_bind, self.remote_port
            ),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
        ];
        args.extend(self.ssh.args_for(&self.host));
        args.push(self.host.destination());
        args
    }
}

/// Starts the forwarding process.
pub trait ForwardLauncher: Send + Sync {
    /// Spawn the forward; its stderr goes to `log`.
    fn launch(&self, spec: &ForwardSpec, log: &Path) -> Result<Child, TetherError>;
}

/// Runs the system `ssh` client.
pub struct SshForwardLauncher;

impl ForwardLauncher for SshForwardLauncher {
    fn launch(&self, spec: &ForwardSpec, log: &Path) -> Result<Child, TetherError> {
        let stderr = File::create(log)?;
        Command::new("ssh")
            .args(spec.ssh_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .spawn()
            .map_err(|e| TetherError::spawn("ssh", e))
    }
}

/// Inspects and frees the local port.
pub trait PortControl: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
    fn holders(&self, port: u16) -> Vec<u32>;
    /// Forcibly stop a holder.
    fn evict(&self, pid: u32) -> bool;
}

pub struct SystemPorts;

impl PortControl for SystemPorts {
    fn is_free(&self, port: u16) -> bool {
        process::port_is_free(port)
    }

    fn holders(&self, port: u16) -> Vec<u32> {
        process::find_port_holders(port)
    }

    fn evict(&self, pid: u32) -> bool {
        process::send_signal(pid, Signal::Kill).is_ok()
    }
}

/// Kill whatever holds `port`, except this process. Returns the holders.
fn evict_holders(ports: &dyn PortControl, port: u16) -> Vec<u32> {
    let own = std::process::id();
    let holders: Vec<u32> = ports.holders(port).into_iter().filter(|pid| *pid != own).collect();
    for pid in &holders {
        let killed = ports.evict(*pid);
        warn!(port, pid, killed, "evicting port holder");
    }
    holders
}

pub fn pid_file_path(state_dir: &Path, port: u16) -> PathBuf {
    state_dir.join(format!("tunnel-{port}.pid"))
}

pub fn log_file_path(state_dir: &Path, port: u16) -> PathBuf {
    state_dir.join(format!("tunnel-{port}.log"))
}

fn lock(active: &Mutex<HashSet<u16>>) -> MutexGuard<'_, HashSet<u16>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Error)]
enum Liveness {
    #[error("{0}")]
    Unreachable(String),
    #[error("forward process exited ({0})")]
    ForwardExited(String),
}

pub struct TunnelSupervisor<L, E> {
    launcher: L,
    endpoint: E,
    ports: Arc<dyn PortControl>,
    state_dir: PathBuf,
    poll: RetryPolicy,
    status_path: String,
    active: Arc<Mutex<HashSet<u16>>>,
}

impl<L: ForwardLauncher, E: EngineEndpoint> TunnelSupervisor<L, E> {
    pub fn new(launcher: L, endpoint: E, ports: Arc<dyn PortControl>, tunnel: &TunnelConfig) -> Self {
        Self {
            launcher,
            endpoint,
            ports,
            state_dir: tunnel.state_dir(),
            poll: tunnel.poll_policy(),
            status_path: tunnel.status_path.clone(),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Establish a forward for `spec` and wait until it answers.
    pub async fn acquire(&self, spec: &ForwardSpec) -> Result<TunnelGuard, TetherError> {
        let port = spec.local_port;
        if !lock(&self.active).insert(port) {
            return Err(TetherError::SessionAlreadyActive { port });
        }

        // From here on every early return drops the guard, which releases.
        let mut guard = TunnelGuard {
            port,
            child: None,
            pid: None,
            pid_file: pid_file_path(&self.state_dir, port),
            state: SessionState::Unbound,
            reserved: false,
            released: false,
            ports: Arc::clone(&self.ports),
            active: Arc::clone(&self.active),
        };

        fs::create_dir_all(&self.state_dir)?;
        if release_recorded(&self.state_dir, port, self.ports.as_ref())? {
            info!(port, "cleaned up a session left behind by a previous run");
        }

        let mut holders_seen = Vec::new();
        let ports = Arc::clone(&self.ports);
        let reserved = poll_until("port-reserve", &self.poll, |attempt| {
            let free = ports.is_free(port);
            if !free {
                holders_seen = evict_holders(ports.as_ref(), port);
                debug!(port, attempt, holders = ?holders_seen, "port busy");
            }
            async move { free }
        })
        .await;
        if reserved.is_none() {
            guard.state = SessionState::Failed;
            return Err(TetherError::PortUnavailable {
                port,
                attempts: self.poll.max_attempts(),
                holders: holders_seen,
            });
        }
        guard.reserved = true;
        guard.state = SessionState::PortReserved;
        debug!(port, "port reserved");

        guard.state = SessionState::ForwardStarting;
        let log = log_file_path(&self.state_dir, port);
        let child = self.launcher.launch(spec, &log)?;
        let pid = child.id();
        guard.pid = Some(pid);
        guard.child = Some(child);
        process::write_pid_file(&guard.pid_file, pid)?;
        info!(port, pid, remote = %spec.host, "forward started");

        let url = format!("http://127.0.0.1:{port}{}", self.status_path);
        let endpoint = &self.endpoint;
        let liveness = run_with_retry_if(
            "tunnel-liveness",
            &self.poll,
            |_| {
                let exited = guard.forward_exit();
                let url = url.clone();
                async move {
                    if let Some(status) = exited {
                        return Err(Liveness::ForwardExited(status));
                    }
                    endpoint.status(&url).await.map_err(Liveness::Unreachable)
                }
            },
            |err| matches!(err, Liveness::Unreachable(_)),
        )
        .await;

        match liveness {
            Ok(()) => {
                guard.state = SessionState::ForwardReady;
                info!(port, pid, "tunnel ready");
                Ok(guard)
            }
            Err(exhausted) => {
                let reason = match exhausted.last {
                    Liveness::ForwardExited(status) => {
                        let tail = log_tail(&log);
                        if tail.is_empty() {
                            format!("forward process exited ({status})")
                        } else {
                            format!("forward process exited ({status}): {tail}")
                        }
                    }
                    Liveness::Unreachable(reason) => reason,
                };
                guard.state = SessionState::Failed;
                guard.release();
                Err(TetherError::TunnelUnreachable {
                    url,
                    attempts: exhausted.attempts,
                    reason,
                })
            }
        }
    }
}

fn log_tail(path: &Path) -> String {
    fs::read_to_string(path)
        .ok()
        .and_then(|text| {
            text.lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
        })
        .unwrap_or_default()
}

/// An acquired session. Released exactly once, at the latest on drop.
pub struct TunnelGuard {
    port: u16,
    child: Option<Child>,
    pid: Option<u32>,
    pid_file: PathBuf,
    state: SessionState,
    reserved: bool,
    released: bool,
    ports: Arc<dyn PortControl>,
    active: Arc<Mutex<HashSet<u16>>>,
}

impl TunnelGuard {
    pub fn local_port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Exit status of the forward if it has already exited.
    fn forward_exit(&mut self) -> Option<String> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(e.to_string()),
        }
    }

    pub fn is_forward_alive(&mut self) -> bool {
        self.child.is_some() && self.forward_exit().is_none()
    }

    /// Tear the session down. Safe to call more than once.
    ///
    /// Blocks for up to the termination grace period while the forward
    /// exits; async callers should use [`release_blocking`](Self::release_blocking).
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(mut child) = self.child.take() {
            let pid = child.id();
            if matches!(child.try_wait(), Ok(None)) && !process::terminate(pid, TERMINATE_GRACE) {
                let _ = child.kill();
            }
            match child.wait() {
                Ok(status) => debug!(pid, %status, "forward reaped"),
                Err(e) => warn!(pid, error = %e, "failed to reap forward"),
            }
        }

        // A newer session may have taken over the port and rewritten the
        // record; its file and its listener are not ours to clean up.
        let owned = match process::read_pid_file(&self.pid_file) {
            Some(recorded) if Some(recorded) != self.pid && process::is_process_alive(recorded) => {
                debug!(port = self.port, recorded, "pid file belongs to another session, leaving it");
                false
            }
            _ => true,
        };

        if owned {
            match fs::remove_file(&self.pid_file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %self.pid_file.display(), error = %e, "failed to remove pid file"),
            }
            if self.reserved && !self.ports.is_free(self.port) {
                evict_holders(self.ports.as_ref(), self.port);
            }
        }

        lock(&self.active).remove(&self.port);
        if self.state != SessionState::Failed {
            self.state = SessionState::Released;
        }
        info!(port = self.port, "tunnel released");
    }

    /// [`release`](Self::release) on the blocking pool, so the runtime keeps
    /// driving other tasks while the forward is terminated.
    pub async fn release_blocking(mut self) -> Result<Self, tokio::task::JoinError> {
        tokio::task::spawn_blocking(move || {
            self.release();
            self
        })
        .await
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Release a session known only from its pid file.
///
/// Returns whether anything was recorded for `port`.
pub fn release_recorded(state_dir: &Path, port: u16, ports: &dyn PortControl) -> Result<bool, TetherError> {
    let path = pid_file_path(state_dir, port);
    if !path.exists() {
        return Ok(false);
    }

    match process::read_pid_file(&path) {
        Some(pid) if process::is_process_alive(pid) => {
            let gone = process::terminate(pid, TERMINATE_GRACE);
            info!(port, pid, gone, "stopped recorded forward");
        }
        Some(pid) => debug!(port, pid, "recorded forward already gone"),
        None => warn!(path = %path.display(), "unreadable pid file"),
    }

    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if !ports.is_free(port) {
        evict_holders(ports, port);
    }
    Ok(true)
}
