//! `tether.toml` loading.
//!
//! Lookup order: an explicit `--config` path, `./tether.toml`, then
//! `$XDG_CONFIG_HOME/tether/config.toml`. Missing files fall back to
//! defaults; an explicit path that does not exist is an error.

use super::env::EnvParser;
use super::source::ConfigSource;
use crate::document::AssistantSettings;
use crate::errors::TetherError;
use crate::manifest::DependencySpec;
use crate::retry::RetryPolicy;
use crate::types::HostIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const PROJECT_FILE: &str = "tether.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TetherConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default)]
    pub assistant: AssistantSettings,
}

/// Local application layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Application directory; other project paths are relative to it.
    pub root: String,
    pub venv: String,
    pub config_file: String,
    pub entry_point: String,
    /// Interpreter used to create the virtual environment.
    pub python: String,
    /// Python modules the application imports at startup.
    pub required_modules: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
            venv: "venv".to_string(),
            config_file: "config/config.env".to_string(),
            entry_point: "main.py".to_string(),
            python: "python3".to_string(),
            required_modules: [
                "numpy",
                "sounddevice",
                "whisper",
                "speech_recognition",
                "gtts",
                "playsound",
                "dotenv",
                "langchain",
                "interpreter",
                "requests",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl ProjectConfig {
    pub fn root(&self) -> PathBuf {
        expand_path(&self.root)
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.root().join(expand_path(&self.venv))
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join(expand_path(&self.config_file))
    }

    pub fn entry_path(&self) -> PathBuf {
        self.root().join(expand_path(&self.entry_point))
    }

    /// Interpreter inside the virtual environment.
    pub fn venv_python(&self) -> PathBuf {
        self.venv_dir().join("bin").join("python")
    }
}

/// The host serving the inference engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    /// Login user; detected from the local account when unset.
    pub user: Option<String>,
    pub identity_file: String,
    pub ssh_port: u16,
    pub connect_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: None,
            identity_file: "~/.ssh/id_ed25519".to_string(),
            ssh_port: 22,
            connect_timeout_secs: 10,
        }
    }
}

impl RemoteConfig {
    pub fn identity_path(&self) -> PathBuf {
        expand_path(&self.identity_file)
    }

    /// Configured user, or the local login name.
    pub fn resolve_user(&self) -> String {
        if let Some(user) = self.user.as_ref().filter(|u| !u.trim().is_empty()) {
            return user.trim().to_string();
        }
        local_username()
    }

    pub fn host_identity(&self) -> Result<HostIdentity, TetherError> {
        if self.host.trim().is_empty() {
            return Err(TetherError::Config(
                "remote.host is not set (tether.toml [remote] host or TETHER_REMOTE_HOST)".into(),
            ));
        }
        Ok(
            HostIdentity::remote(self.host.trim(), self.resolve_user(), self.identity_path())
                .with_port(self.ssh_port),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// The code-hosting SSH endpoint the key is also registered with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub enabled: bool,
    pub host: String,
    pub user: String,
    /// Repository owner; detected from the SSH greeting when unset.
    pub owner: Option<String>,
    /// Page where the operator registers a public key.
    pub keys_url: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "github.com".to_string(),
            user: "git".to_string(),
            owner: None,
            keys_url: "https://github.com/settings/keys".to_string(),
        }
    }
}

impl GitConfig {
    pub fn host_identity(&self, identity_file: &Path) -> HostIdentity {
        HostIdentity::remote(self.host.clone(), self.user.clone(), identity_file)
    }
}

/// Port-forward parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub local_port: u16,
    pub remote_port: u16,
    /// Address the remote end of the forward connects to.
    pub remote_bind: String,
    /// Path probed over HTTP to decide the forward is ready.
    pub status_path: String,
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    /// Where tunnel pid files and install records live.
    pub state_dir: Option<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            local_port: 11434,
            remote_port: 11434,
            remote_bind: "localhost".to_string(),
            status_path: "/api/tags".to_string(),
            poll_attempts: 5,
            poll_interval_ms: 2000,
            state_dir: None,
        }
    }
}

impl TunnelConfig {
    pub fn poll_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.poll_attempts, Duration::from_millis(self.poll_interval_ms))
    }

    pub fn state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => expand_path(dir),
            None => dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .unwrap_or_else(std::env::temp_dir)
                .join("tether"),
        }
    }

    pub fn status_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.local_port, self.status_path)
    }
}

/// Dependency installation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    pub download_attempts: u32,
    pub download_delay_secs: u64,
    /// Cache directory of the speech-recognition model.
    pub speech_model_cache: String,
    /// Replaces the built-in manifest when present.
    pub dependencies: Option<Vec<DependencySpec>>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            download_attempts: 3,
            download_delay_secs: 10,
            speech_model_cache: "~/.cache/whisper".to_string(),
            dependencies: None,
        }
    }
}

impl InstallConfig {
    pub fn download_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.download_attempts,
            Duration::from_secs(self.download_delay_secs),
        )
    }
}

/// A configuration plus where each overridable value came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: TetherConfig,
    pub file: Option<PathBuf>,
    pub sources: BTreeMap<&'static str, ConfigSource>,
}

/// Keys tracked for `config show`, as `(section, key, dotted name)`.
const TRACKED: &[(&str, &str, &str)] = &[
    ("project", "root", "project.root"),
    ("remote", "host", "remote.host"),
    ("remote", "user", "remote.user"),
    ("remote", "identity_file", "remote.identity_file"),
    ("tunnel", "local_port", "tunnel.local_port"),
    ("tunnel", "remote_port", "tunnel.remote_port"),
    ("tunnel", "poll_attempts", "tunnel.poll_attempts"),
    ("tunnel", "poll_interval_ms", "tunnel.poll_interval_ms"),
    ("tunnel", "state_dir", "tunnel.state_dir"),
    ("git", "enabled", "git.enabled"),
];

impl TetherConfig {
    /// Load configuration and apply `TETHER_*` overrides.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, TetherError> {
        let file = match explicit {
            Some(path) if !path.exists() => {
                return Err(TetherError::ConfigNotFound {
                    path: path.to_path_buf(),
                });
            }
            Some(path) => Some(path.to_path_buf()),
            None => discover_config_file(),
        };

        let mut sources = BTreeMap::new();
        let mut config = match &file {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                let table: toml::Table =
                    toml::from_str(&content).map_err(|e| TetherError::ConfigParse {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                for (section, key, name) in TRACKED {
                    let present = table
                        .get(*section)
                        .and_then(|s| s.as_table())
                        .is_some_and(|s| s.contains_key(*key));
                    let source = if present {
                        ConfigSource::File(path.clone())
                    } else {
                        ConfigSource::Default
                    };
                    sources.insert(*name, source);
                }
                debug!(path = %path.display(), "loaded tether config");
                toml::from_str(&content).map_err(|e| TetherError::ConfigParse {
                    path: path.clone(),
                    message: e.to_string(),
                })?
            }
            None => {
                for (_, _, name) in TRACKED {
                    sources.insert(*name, ConfigSource::Default);
                }
                debug!("no tether config file found, using defaults");
                TetherConfig::default()
            }
        };

        let mut parser = EnvParser::new();
        config.apply_env(&mut parser, &mut sources);
        if parser.has_errors() {
            let messages: Vec<String> = parser.take_errors().iter().map(|e| e.to_string()).collect();
            return Err(TetherError::ConfigEnv(messages.join("; ")));
        }

        config.validate()?;
        Ok(LoadedConfig {
            config,
            file,
            sources,
        })
    }

    /// Overlay environment variables onto the loaded values.
    pub fn apply_env(
        &mut self,
        parser: &mut EnvParser,
        sources: &mut BTreeMap<&'static str, ConfigSource>,
    ) {
        let mut record = |key: &'static str, source: ConfigSource| {
            if matches!(source, ConfigSource::Env(_)) {
                sources.insert(key, source);
            }
        };

        let root = parser.get_path("PROJECT_ROOT");
        if let Some(path) = root.value {
            self.project.root = path.to_string_lossy().into_owned();
            record("project.root", root.source);
        }

        let host = parser.get_optional_string("REMOTE_HOST");
        if let Some(value) = host.value {
            self.remote.host = value;
            record("remote.host", host.source);
        }

        let user = parser.get_optional_string("REMOTE_USER");
        if let Some(value) = user.value {
            self.remote.user = Some(value);
            record("remote.user", user.source);
        }

        let identity = parser.get_path("IDENTITY_FILE");
        if let Some(path) = identity.value {
            self.remote.identity_file = path.to_string_lossy().into_owned();
            record("remote.identity_file", identity.source);
        }

        let local_port = parser.get_u16_range("LOCAL_PORT", self.tunnel.local_port, 1, u16::MAX);
        if local_port.is_from_env() {
            self.tunnel.local_port = local_port.value;
            record("tunnel.local_port", local_port.source);
        }

        let remote_port = parser.get_u16_range("REMOTE_PORT", self.tunnel.remote_port, 1, u16::MAX);
        if remote_port.is_from_env() {
            self.tunnel.remote_port = remote_port.value;
            record("tunnel.remote_port", remote_port.source);
        }

        let attempts = parser.get_u32_range("POLL_ATTEMPTS", self.tunnel.poll_attempts, 1, 100);
        if attempts.is_from_env() {
            self.tunnel.poll_attempts = attempts.value;
            record("tunnel.poll_attempts", attempts.source);
        }

        let interval = parser.get_duration(
            "POLL_INTERVAL",
            Duration::from_millis(self.tunnel.poll_interval_ms),
        );
        if interval.is_from_env() {
            self.tunnel.poll_interval_ms = interval.value.as_millis() as u64;
            record("tunnel.poll_interval_ms", interval.source);
        }

        let state_dir = parser.get_path("STATE_DIR");
        if let Some(path) = state_dir.value {
            self.tunnel.state_dir = Some(path.to_string_lossy().into_owned());
            record("tunnel.state_dir", state_dir.source);
        }

        let git = parser.get_bool("GIT_ENABLED", self.git.enabled);
        if git.is_from_env() {
            self.git.enabled = git.value;
            record("git.enabled", git.source);
        }
    }

    pub fn validate(&self) -> Result<(), TetherError> {
        if self.tunnel.local_port == 0 || self.tunnel.remote_port == 0 {
            return Err(TetherError::Config("tunnel ports must be non-zero".into()));
        }
        if self.tunnel.poll_attempts == 0 {
            return Err(TetherError::Config(
                "tunnel.poll_attempts must be at least 1".into(),
            ));
        }
        if !self.tunnel.status_path.starts_with('/') {
            return Err(TetherError::Config(format!(
                "tunnel.status_path must start with '/': {}",
                self.tunnel.status_path
            )));
        }
        if self.install.download_attempts == 0 {
            return Err(TetherError::Config(
                "install.download_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Assistant settings with the remote endpoint filled in from `[remote]`.
    pub fn assistant_settings(&self) -> AssistantSettings {
        let mut settings = self.assistant.clone();
        if settings.remote_host.is_empty() {
            settings.remote_host = self.remote.host.clone();
        }
        if settings.remote_user.is_empty() {
            settings.remote_user = self.remote.resolve_user();
        }
        settings.ollama_config.port = self.tunnel.local_port;
        settings
    }
}

fn discover_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(PROJECT_FILE);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("tether").join("config.toml"))
        .filter(|path| path.is_file())
}

/// Expand `~` and environment variables; fall back to the raw text.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(raw),
    }
}

fn local_username() -> String {
    #[cfg(unix)]
    {
        whoami::username().unwrap_or_else(|_| fallback_username())
    }
    #[cfg(not(unix))]
    {
        fallback_username()
    }
}

fn fallback_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = TetherConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tunnel.local_port, 11434);
        assert_eq!(config.tunnel.poll_policy().attempts, 5);
        assert_eq!(config.tunnel.poll_policy().delay, Duration::from_secs(2));
        assert_eq!(config.install.download_policy().attempts, 3);
        assert_eq!(config.tunnel.status_url(), "http://127.0.0.1:11434/api/tags");
    }

    #[test]
    fn test_project_paths_are_relative_to_root() {
        let project = ProjectConfig {
            root: "/srv/assistant".to_string(),
            ..ProjectConfig::default()
        };
        assert_eq!(project.venv_dir(), PathBuf::from("/srv/assistant/venv"));
        assert_eq!(
            project.config_path(),
            PathBuf::from("/srv/assistant/config/config.env")
        );
        assert_eq!(
            project.venv_python(),
            PathBuf::from("/srv/assistant/venv/bin/python")
        );
    }

    #[test]
    fn test_remote_identity_requires_host() {
        let remote = RemoteConfig::default();
        assert!(matches!(remote.host_identity(), Err(TetherError::Config(_))));

        let remote = RemoteConfig {
            host: "gpu-box".to_string(),
            user: Some("ada".to_string()),
            identity_file: "/keys/id".to_string(),
            ..RemoteConfig::default()
        };
        let identity = remote.host_identity().unwrap();
        assert_eq!(identity.destination(), "ada@gpu-box");
        assert_eq!(identity.identity_file(), Path::new("/keys/id"));
    }

    #[test]
    fn test_blank_user_falls_back_to_local_account() {
        let remote = RemoteConfig {
            user: Some("  ".to_string()),
            ..RemoteConfig::default()
        };
        assert!(!remote.resolve_user().trim().is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = TetherConfig::default();
        config.tunnel.poll_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = TetherConfig::default();
        config.tunnel.status_path = "api/tags".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_explicit_file_and_env_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(
            &path,
            r#"
[remote]
host = "gpu-box"
user = "ada"

[tunnel]
local_port = 18080
"#,
        )
        .unwrap();

        // SAFETY: serialized with other environment tests.
        unsafe { std::env::set_var("TETHER_REMOTE_PORT", "21434") };
        let loaded = TetherConfig::load(Some(&path)).unwrap();
        // SAFETY: serialized with other environment tests.
        unsafe { std::env::remove_var("TETHER_REMOTE_PORT") };

        assert_eq!(loaded.config.remote.host, "gpu-box");
        assert_eq!(loaded.config.tunnel.local_port, 18080);
        assert_eq!(loaded.config.tunnel.remote_port, 21434);
        assert_eq!(
            loaded.sources["tunnel.local_port"],
            ConfigSource::File(path.clone())
        );
        assert_eq!(
            loaded.sources["tunnel.remote_port"],
            ConfigSource::Env("TETHER_REMOTE_PORT".to_string())
        );
        assert_eq!(loaded.sources["tunnel.state_dir"], ConfigSource::Default);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let err = TetherConfig::load(Some(Path::new("/no/such/tether.toml"))).unwrap_err();
        assert!(matches!(err, TetherError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_assistant_settings_take_remote_and_port() {
        let mut config = TetherConfig::default();
        config.remote.host = "gpu-box".to_string();
        config.remote.user = Some("ada".to_string());
        config.tunnel.local_port = 18080;

        let settings = config.assistant_settings();
        assert_eq!(settings.remote_host, "gpu-box");
        assert_eq!(settings.remote_user, "ada");
        assert_eq!(settings.ollama_config.port, 18080);
    }
}
