//! Stable error codes with operator-facing remediation.
//!
//! | Range      | Category | Covers                                |
//! |------------|----------|---------------------------------------|
//! | E001-E099  | Config   | tether.toml, config.env, local files  |
//! | E100-E199  | Network  | SSH credentials, auth, tunnel         |
//! | E200-E299  | Install  | Dependencies and models               |
//! | E500-E599  | Internal | Unexpected I/O and process failures   |

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    ConfigNotFound,
    ConfigParseError,
    ConfigValidationError,
    ConfigEnvError,
    ConfigWriteFailed,
    /// Virtual environment, config document or entry point is missing.
    MissingLocalArtifact,

    AuthenticationNotConfigured,
    CredentialGenerationFailed,
    PortUnavailable,
    TunnelUnreachable,
    SessionAlreadyActive,

    DependencyInstallFailed,

    InternalIo,
    InternalProcess,
}

type Details = (u16, &'static str, &'static [&'static str]);

impl ErrorCode {
    pub const ALL: [ErrorCode; 14] = [
        Self::ConfigNotFound,
        Self::ConfigParseError,
        Self::ConfigValidationError,
        Self::ConfigEnvError,
        Self::ConfigWriteFailed,
        Self::MissingLocalArtifact,
        Self::AuthenticationNotConfigured,
        Self::CredentialGenerationFailed,
        Self::PortUnavailable,
        Self::TunnelUnreachable,
        Self::SessionAlreadyActive,
        Self::DependencyInstallFailed,
        Self::InternalIo,
        Self::InternalProcess,
    ];

    /// Number, message and remediation steps, in one place per code.
    const fn details(self) -> Details {
        match self {
            Self::ConfigNotFound => (
                1,
                "Configuration file not found",
                &[
                    "Create tether.toml in the project directory",
                    "Or pass --config <path> to point at an existing file",
                ],
            ),
            Self::ConfigParseError => (
                2,
                "Configuration file could not be parsed",
                &[
                    "Check the file for TOML / dotenv syntax errors",
                    "Re-run `tether install` to regenerate config/config.env",
                ],
            ),
            Self::ConfigValidationError => (
                3,
                "Configuration contains invalid values",
                &[
                    "Run `tether config show` to see effective values and their sources",
                    "Fix the reported field in tether.toml",
                ],
            ),
            Self::ConfigEnvError => (
                4,
                "Environment variable has an invalid value",
                &["Unset or correct the reported TETHER_* environment variable"],
            ),
            Self::ConfigWriteFailed => (
                5,
                "Failed to write the assistant configuration",
                &["Check that the config directory is writable", "Re-run `tether install`"],
            ),
            Self::MissingLocalArtifact => (
                10,
                "A required local artifact is missing",
                &[
                    "Re-run `tether install` to recreate the environment",
                    "Check [project] paths in tether.toml",
                ],
            ),
            Self::AuthenticationNotConfigured => (
                100,
                "SSH authentication is not configured",
                &[
                    "Add the public key printed by `tether install` to the remote host",
                    "For the remote host: ssh-copy-id -i <key>.pub <user>@<host>",
                    "Test manually: ssh -o BatchMode=yes <user>@<host> true",
                ],
            ),
            Self::CredentialGenerationFailed => (
                101,
                "Failed to generate an SSH keypair",
                &[
                    "Make sure ssh-keygen is installed and on PATH",
                    "Check that the key directory (usually ~/.ssh) is writable",
                ],
            ),
            Self::PortUnavailable => (
                110,
                "Local tunnel port is held by another process",
                &[
                    "Find the holder: lsof -iTCP:<port> -sTCP:LISTEN",
                    "Stop it, or run `tether release` if it is a stale tunnel",
                    "Or choose another [tunnel] local_port",
                ],
            ),
            Self::TunnelUnreachable => (
                111,
                "Forwarded inference endpoint did not become ready",
                &[
                    "Check the inference service on the remote host: systemctl status ollama",
                    "Verify [tunnel] remote_port matches the service port",
                    "Run `tether verify` for a full readiness report",
                ],
            ),
            Self::SessionAlreadyActive => (
                112,
                "A tunnel session already owns this port",
                &["Stop the other session first, or run `tether release`"],
            ),
            Self::DependencyInstallFailed => (
                200,
                "Dependency installation failed",
                &[
                    "Inspect the diagnostic output above",
                    "Re-run `tether install`; already installed dependencies are skipped",
                ],
            ),
            Self::InternalIo => (
                500,
                "Unexpected I/O error",
                &["Re-run with --verbose and inspect the log output"],
            ),
            Self::InternalProcess => (
                501,
                "Failed to run a helper process",
                &["Make sure the reported program is installed and on PATH"],
            ),
        }
    }

    pub const fn code_number(self) -> u16 {
        self.details().0
    }

    /// "TETHER-E001" style.
    pub fn code_string(self) -> String {
        format!("TETHER-E{:03}", self.code_number())
    }

    pub const fn message(self) -> &'static str {
        self.details().1
    }

    pub const fn remediation(self) -> &'static [&'static str] {
        self.details().2
    }

    pub const fn category(self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Network,
            200..=299 => ErrorCategory::Install,
            _ => ErrorCategory::Internal,
        }
    }

    pub fn entry(self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self.remediation().iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Config,
    Network,
    Install,
    Internal,
}

/// A resolved catalog entry, ready to print or serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Code and message, then the numbered remediation steps.
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);
        if !self.remediation.is_empty() {
            output.push_str("\nNext steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }
        output
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numbers_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::ALL {
            assert!(
                seen.insert(code.code_number()),
                "duplicate code number for {:?}",
                code
            );
        }
    }

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.code_string(), "TETHER-E001");
        assert_eq!(ErrorCode::PortUnavailable.code_string(), "TETHER-E110");
        assert_eq!(ErrorCode::InternalIo.code_string(), "TETHER-E500");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(ErrorCode::MissingLocalArtifact.category(), ErrorCategory::Config);
        assert_eq!(ErrorCode::TunnelUnreachable.category(), ErrorCategory::Network);
        assert_eq!(ErrorCode::DependencyInstallFailed.category(), ErrorCategory::Install);
        assert_eq!(ErrorCode::InternalProcess.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_all_errors_have_remediation() {
        for code in ErrorCode::ALL {
            assert!(!code.message().is_empty());
            assert!(
                !code.remediation().is_empty(),
                "{:?} has no remediation steps",
                code
            );
        }
    }

    #[test]
    fn test_format_full_numbers_steps() {
        let entry = ErrorCode::AuthenticationNotConfigured.entry();
        let text = entry.format_full();
        assert!(text.starts_with("[TETHER-E100] SSH authentication is not configured"));
        assert!(text.contains("  1. Add the public key"));
        assert!(text.contains("  3. Test manually"));
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::PortUnavailable).unwrap();
        assert_eq!(json, "\"PORT_UNAVAILABLE\"");
    }
}
