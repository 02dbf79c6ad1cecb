//! Process, pid file and local port utilities.
//!
//! Signals go through the `kill` command and port holders are found with
//! `lsof`, which keeps the crate free of `unsafe` libc calls.

use std::fs;
use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

impl Signal {
    fn as_arg(self) -> &'static str {
        match self {
            Self::Term => "-TERM",
            Self::Kill => "-KILL",
        }
    }
}

/// Check if a process is alive. Zombies count as dead.
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    if cfg!(target_os = "linux") {
        return match fs::read_to_string(format!("/proc/{pid}/stat")) {
            // Field 3 is the state; the command name before it may contain spaces.
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X"),
            Err(_) => false,
        };
    }

    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Send a signal to a process.
pub fn send_signal(pid: u32, signal: Signal) -> Result<(), String> {
    let status = Command::new("kill")
        .arg(signal.as_arg())
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| format!("failed to spawn kill: {e}"))?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("kill {} {pid} exited with {status}", signal.as_arg()))
    }
}

/// SIGTERM, then SIGKILL if the process outlives `grace`.
/// Returns true once the process is gone. Sleeps on the calling thread
/// while it waits; run it on a blocking pool from async code.
pub fn terminate(pid: u32, grace: Duration) -> bool {
    if !is_process_alive(pid) {
        return true;
    }
    if let Err(e) = send_signal(pid, Signal::Term) {
        debug!(pid, error = %e, "SIGTERM failed");
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    warn!(pid, "process ignored SIGTERM, sending SIGKILL");
    if let Err(e) = send_signal(pid, Signal::Kill) {
        debug!(pid, error = %e, "SIGKILL failed");
    }
    std::thread::sleep(Duration::from_millis(100));
    !is_process_alive(pid)
}

/// Whether a listener can bind `127.0.0.1:<port>` right now.
pub fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Pids of processes listening on a local TCP port.
///
/// Returns an empty list when `lsof` is unavailable.
pub fn find_port_holders(port: u16) -> Vec<u32> {
    let output = Command::new("lsof")
        .arg("-t")
        .arg(format!("-iTCP:{port}"))
        .arg("-sTCP:LISTEN")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();

    match output {
        Ok(output) => parse_pid_list(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            warn!(port, error = %e, "lsof unavailable, cannot identify port holders");
            Vec::new()
        }
    }
}

fn parse_pid_list(text: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = text
        .split_whitespace()
        .filter_map(|token| token.parse().ok())
        .filter(|pid| *pid != 0)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Read a pid file. Missing or malformed files yield `None`.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse().ok())
}

/// Write `pid` to `path`, creating the parent directory.
pub fn write_pid_file(path: &Path, pid: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    writeln!(file, "{pid}")?;
    file.sync_all()
}
