//! Dependency manifest types.
//!
//! A manifest is an ordered list of [`DependencySpec`]s. Order is meaningful:
//! later groups may assume earlier ones are installed (audio and numeric
//! libraries before the ML libraries that import them).

use crate::types::HostRole;
use serde::{Deserialize, Serialize};

/// How big an artifact is, which decides its retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    /// Packages: one install attempt.
    #[default]
    Small,
    /// Models: bounded retry with a fixed delay.
    Large,
}

/// How to decide whether a dependency is already present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerifyMethod {
    /// `python -c "import <module>"` succeeds in the virtual environment.
    Importable { module: String },
    /// Output of `command` contains `needle`.
    Listed { command: String, needle: String },
    /// `binary` resolves on PATH.
    PresentOnPath { binary: String },
    /// `path` exists (`~` is expanded by the shell).
    FileExists { path: String },
}

/// How to install a dependency that failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstallMethod {
    /// `apt-get install -y <package>`.
    Apt { package: String },
    /// `pip install <package><version>` inside the virtual environment.
    Pip { package: String },
    /// `ollama pull <model>` on the target host.
    OllamaPull { model: String },
    /// Arbitrary shell command.
    Script { command: String },
}

/// One entry of the deployment's requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    /// Version requirement in pip syntax (`==2.1.0`, `>=1.26,<2`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Install group; groups run in manifest order.
    #[serde(default = "default_group")]
    pub group: String,
    pub target: HostRole,
    pub verify: VerifyMethod,
    pub install: InstallMethod,
    #[serde(default)]
    pub size: SizeClass,
}

fn default_group() -> String {
    "default".to_string()
}

impl DependencySpec {
    /// Whether this spec is a model artifact tracked through its own lifecycle.
    pub fn is_model(&self) -> bool {
        self.size == SizeClass::Large
    }

    /// A version requirement is only enforceable for a pip package verified
    /// by import; anywhere else it would be silently ignored.
    pub fn check_version_support(&self) -> Result<(), String> {
        let Some(version) = &self.version else {
            return Ok(());
        };
        match (&self.verify, &self.install) {
            (VerifyMethod::Importable { .. }, InstallMethod::Pip { .. }) => Ok(()),
            _ => Err(format!(
                "{}: version requirement {version} is only supported for pip packages verified by import",
                self.name
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_toml() {
        let spec: DependencySpec = toml::from_str(
            r#"
name = "numpy"
version = ">=1.26,<2"
group = "numeric"
target = "local"
verify = { kind = "importable", module = "numpy" }
install = { kind = "pip", package = "numpy" }
"#,
        )
        .unwrap();

        assert_eq!(spec.target, HostRole::Local);
        assert_eq!(spec.size, SizeClass::Small);
        assert_eq!(
            spec.verify,
            VerifyMethod::Importable {
                module: "numpy".into()
            }
        );
        assert_eq!(spec.version.as_deref(), Some(">=1.26,<2"));
        assert!(!spec.is_model());
    }

    #[test]
    fn test_version_rejected_for_apt_packages() {
        let spec: DependencySpec = toml::from_str(
            r#"
name = "ffmpeg"
version = ">=6"
target = "local"
verify = { kind = "present_on_path", binary = "ffmpeg" }
install = { kind = "apt", package = "ffmpeg" }
"#,
        )
        .unwrap();
        let err = spec.check_version_support().unwrap_err();
        assert!(err.contains("ffmpeg"));

        let unpinned = DependencySpec {
            version: None,
            ..spec
        };
        assert!(unpinned.check_version_support().is_ok());
    }

    #[test]
    fn test_large_remote_model() {
        let spec: DependencySpec = toml::from_str(
            r#"
name = "codellama:7b-instruct-q4_K_M"
target = "remote"
size = "large"
verify = { kind = "listed", command = "ollama list", needle = "codellama:7b-instruct-q4_K_M" }
install = { kind = "ollama_pull", model = "codellama:7b-instruct-q4_K_M" }
"#,
        )
        .unwrap();
        assert!(spec.is_model());
        assert_eq!(spec.group, "default");
    }
}
