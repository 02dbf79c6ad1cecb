use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// An assistant project directory with its own `tether.toml` and state dir.
pub struct TestProject {
    pub dir: TempDir,
    pub config: PathBuf,
}

impl TestProject {
    pub fn new() -> Self {
        crate::test_log!("FIXTURE: Creating empty assistant project");

        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = dir.path().join("tether.toml");
        let root = dir.path().display();
        fs::write(
            &config,
            format!(
                r#"[project]
root = "{root}"

[remote]
host = "127.0.0.1"
user = "nobody"
identity_file = "{root}/keys/id_ed25519"

[tunnel]
local_port = 21099
poll_attempts = 1
poll_interval_ms = 10
state_dir = "{root}/state"
"#
            ),
        )
        .expect("Failed to write tether.toml");

        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root().join("state")
    }

    /// Run the tether binary against this project with a clean `TETHER_*`
    /// environment.
    pub fn tether(&self, args: &[&str]) -> Output {
        self.tether_with_env(args, &[])
    }

    pub fn tether_with_env(&self, args: &[&str], env: &[(&str, &str)]) -> Output {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tether"));
        for (key, _) in std::env::vars() {
            if key.starts_with("TETHER_") {
                cmd.env_remove(key);
            }
        }
        cmd.arg("--config")
            .arg(&self.config)
            .args(args)
            .envs(env.iter().copied())
            .env("NO_COLOR", "1")
            .current_dir(self.root())
            .output()
            .expect("Failed to run tether")
    }
}
