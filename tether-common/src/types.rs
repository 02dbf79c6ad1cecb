//! Common types used across tether components.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which side of the deployment a host or dependency belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    /// The machine running tether and the assistant.
    Local,
    /// The machine serving the inference engine.
    Remote,
}

impl std::fmt::Display for HostRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// A host tether talks to, together with the credentials used to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    pub role: HostRole,
    /// Hostname or IP address.
    pub address: String,
    /// Login principal (SSH user).
    pub principal: String,
    /// Private key used for authentication.
    pub identity_file: PathBuf,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

impl HostIdentity {
    pub fn remote(
        address: impl Into<String>,
        principal: impl Into<String>,
        identity_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            role: HostRole::Remote,
            address: address.into(),
            principal: principal.into(),
            identity_file: identity_file.into(),
            ssh_port: default_ssh_port(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    /// `user@host` destination for ssh.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.principal, self.address)
    }

    pub fn identity_file(&self) -> &Path {
        &self.identity_file
    }

    /// Whether the authentication material this identity points at exists.
    pub fn has_credentials(&self) -> bool {
        self.identity_file.is_file()
    }
}

impl std::fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ssh_port == 22 {
            write!(f, "{}", self.destination())
        } else {
            write!(f, "{}:{}", self.destination(), self.ssh_port)
        }
    }
}
