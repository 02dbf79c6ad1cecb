//! Error types for tether.
//!
//! [`TetherError`] is the failure taxonomy of the bootstrap and session
//! lifecycle. Each variant maps onto an [`ErrorCode`] from the catalog so the
//! CLI can print remediation steps for it.

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TetherError {
    #[error("missing {name}: {} not found", path.display())]
    MissingLocalArtifact { name: String, path: PathBuf },

    #[error("SSH authentication to {host} is not configured: {detail}")]
    AuthenticationNotConfigured { host: String, detail: String },

    #[error("failed to generate SSH keypair at {}: {message}", path.display())]
    CredentialGenerationFailed { path: PathBuf, message: String },

    #[error("port {port} still bound after {attempts} attempts (holders: {holders:?})")]
    PortUnavailable {
        port: u16,
        attempts: u32,
        holders: Vec<u32>,
    },

    #[error("tunnel endpoint {url} unreachable after {attempts} attempts: {reason}")]
    TunnelUnreachable {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("a tunnel session already owns local port {port}")]
    SessionAlreadyActive { port: u16 },

    #[error("failed to install {artifact}: {message}")]
    DependencyInstallFailed { artifact: String, message: String },

    #[error("failed to write config document {}: {message}", path.display())]
    ConfigWriteFailed { path: PathBuf, message: String },

    #[error("config file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("failed to parse {}: {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid environment override: {0}")]
    ConfigEnv(String),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TetherError {
    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingLocalArtifact { .. } => ErrorCode::MissingLocalArtifact,
            Self::AuthenticationNotConfigured { .. } => ErrorCode::AuthenticationNotConfigured,
            Self::CredentialGenerationFailed { .. } => ErrorCode::CredentialGenerationFailed,
            Self::PortUnavailable { .. } => ErrorCode::PortUnavailable,
            Self::TunnelUnreachable { .. } => ErrorCode::TunnelUnreachable,
            Self::SessionAlreadyActive { .. } => ErrorCode::SessionAlreadyActive,
            Self::DependencyInstallFailed { .. } => ErrorCode::DependencyInstallFailed,
            Self::ConfigWriteFailed { .. } => ErrorCode::ConfigWriteFailed,
            Self::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Self::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Self::Config(_) => ErrorCode::ConfigValidationError,
            Self::ConfigEnv(_) => ErrorCode::ConfigEnvError,
            Self::Spawn { .. } => ErrorCode::InternalProcess,
            Self::Io(_) => ErrorCode::InternalIo,
        }
    }

    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }
}

pub type Result<T, E = TetherError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants_map_to_codes() {
        let err = TetherError::PortUnavailable {
            port: 11434,
            attempts: 5,
            holders: vec![4242],
        };
        assert_eq!(err.code(), ErrorCode::PortUnavailable);
        assert!(err.to_string().contains("11434"));
        assert!(err.to_string().contains("4242"));

        let err = TetherError::MissingLocalArtifact {
            name: "virtual environment".into(),
            path: PathBuf::from("/srv/app/venv"),
        };
        assert_eq!(err.code(), ErrorCode::MissingLocalArtifact);
        assert_eq!(
            err.to_string(),
            "missing virtual environment: /srv/app/venv not found"
        );
    }

    #[test]
    fn test_io_error_is_internal() {
        let err: TetherError = std::io::Error::other("boom").into();
        assert_eq!(err.code().category(), ErrorCategory::Internal);
    }
}
