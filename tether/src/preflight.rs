//! Local readiness check run before every session.
//!
//! Artifacts are checked in a fixed order and the first missing one is
//! reported; nothing after it is looked at.

use std::path::PathBuf;
use tether_common::TetherError;
use tether_common::config::ProjectConfig;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Directory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    pub name: &'static str,
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

impl LocalArtifact {
    pub fn exists(&self) -> bool {
        match self.kind {
            ArtifactKind::Directory => self.path.is_dir(),
            ArtifactKind::File => self.path.is_file(),
        }
    }
}

/// Artifacts a session needs, in check order.
pub fn required_artifacts(project: &ProjectConfig) -> Vec<LocalArtifact> {
    vec![
        LocalArtifact {
            name: "virtual environment",
            path: project.venv_dir(),
            kind: ArtifactKind::Directory,
        },
        LocalArtifact {
            name: "configuration file",
            path: project.config_path(),
            kind: ArtifactKind::File,
        },
        LocalArtifact {
            name: "application entry point",
            path: project.entry_path(),
            kind: ArtifactKind::File,
        },
    ]
}

pub fn check_local_readiness(project: &ProjectConfig) -> Result<(), TetherError> {
    for artifact in required_artifacts(project) {
        if !artifact.exists() {
            return Err(TetherError::MissingLocalArtifact {
                name: artifact.name.to_string(),
                path: artifact.path,
            });
        }
        debug!(artifact = artifact.name, path = %artifact.path.display(), "present");
    }
    Ok(())
}
