//! SSH credential provisioning.
//!
//! An existing private key is never touched. A new ed25519 key is generated
//! without a passphrase, added to the agent when one is running, and the
//! operator is shown where to register the public half before continuing.

use crate::output::OutputContext;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tether_common::TetherError;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
    /// Contents of the public key file, trimmed.
    pub public_text: String,
    /// Whether this run generated the key.
    pub created: bool,
}

/// Somewhere the public key has to be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAuthority {
    pub name: String,
    pub instruction: String,
}

/// Blocking operator confirmation.
pub trait OperatorPrompt {
    fn confirm(&self, message: &str) -> anyhow::Result<bool>;
}

/// Asks on the controlling terminal.
pub struct TerminalPrompt;

impl OperatorPrompt for TerminalPrompt {
    fn confirm(&self, message: &str) -> anyhow::Result<bool> {
        let answer = dialoguer::Confirm::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt(message)
            .default(true)
            .interact_on(&console::Term::stderr())?;
        Ok(answer)
    }
}

/// Answers every prompt with a fixed value (`--yes`, tests).
pub struct FixedAnswer(pub bool);

impl OperatorPrompt for FixedAnswer {
    fn confirm(&self, _message: &str) -> anyhow::Result<bool> {
        Ok(self.0)
    }
}

pub fn public_key_path(private_key: &Path) -> PathBuf {
    let mut name = private_key.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

/// Reuse the key at `path` or generate one.
pub async fn ensure_keypair(path: &Path, comment: &str) -> Result<KeyPair, TetherError> {
    let public_key = public_key_path(path);

    if path.is_file() {
        debug!(path = %path.display(), "reusing existing ssh key");
        if !public_key.is_file() {
            derive_public_key(path, &public_key).await?;
        }
        return Ok(KeyPair {
            private_key: path.to_path_buf(),
            public_text: read_public(&public_key)?,
            public_key,
            created: false,
        });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TetherError::CredentialGenerationFailed {
            path: path.to_path_buf(),
            message: format!("cannot create {}: {e}", parent.display()),
        })?;
    }

    let keygen = which::which("ssh-keygen").map_err(|_| TetherError::CredentialGenerationFailed {
        path: path.to_path_buf(),
        message: "ssh-keygen not found on PATH".to_string(),
    })?;
    info!(path = %path.display(), keygen = %keygen.display(), "generating ed25519 ssh key");
    let output = Command::new(keygen)
        .args(["-q", "-t", "ed25519", "-N", "", "-C", comment, "-f"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| TetherError::CredentialGenerationFailed {
            path: path.to_path_buf(),
            message: format!("failed to run ssh-keygen: {e}"),
        })?;

    if !output.status.success() || !path.is_file() {
        return Err(TetherError::CredentialGenerationFailed {
            path: path.to_path_buf(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(KeyPair {
        private_key: path.to_path_buf(),
        public_text: read_public(&public_key)?,
        public_key,
        created: true,
    })
}

async fn derive_public_key(private_key: &Path, public_key: &Path) -> Result<(), TetherError> {
    warn!(path = %public_key.display(), "public key missing, deriving it from the private key");
    let fail = |message: String| TetherError::CredentialGenerationFailed {
        path: public_key.to_path_buf(),
        message,
    };

    let output = Command::new("ssh-keygen")
        .arg("-y")
        .arg("-f")
        .arg(private_key)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| fail(format!("failed to run ssh-keygen: {e}")))?;
    if !output.status.success() {
        return Err(fail(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }
    std::fs::write(public_key, &output.stdout).map_err(|e| fail(e.to_string()))
}

fn read_public(path: &Path) -> Result<String, TetherError> {
    std::fs::read_to_string(path)
        .map(|text| text.trim().to_string())
        .map_err(|e| TetherError::CredentialGenerationFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Register the key with the running agent. Failure only means the key
/// has to be passed with `-i`, which tether always does.
pub async fn add_to_agent(private_key: &Path) -> bool {
    if std::env::var_os("SSH_AUTH_SOCK").is_none() {
        debug!("no ssh agent running, skipping ssh-add");
        return false;
    }
    match Command::new("ssh-add")
        .arg(private_key)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
    {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            warn!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "ssh-add failed"
            );
            false
        }
        Err(e) => {
            warn!(error = %e, "ssh-add unavailable");
            false
        }
    }
}

/// Ensure a keypair and, when it is new, walk the operator through
/// registering it with every authority.
pub async fn provision(
    path: &Path,
    comment: &str,
    authorities: &[TrustAuthority],
    prompt: &dyn OperatorPrompt,
    ctx: &OutputContext,
) -> anyhow::Result<KeyPair> {
    let keypair = ensure_keypair(path, comment).await?;
    if !keypair.created {
        ctx.success(&format!("Using existing SSH key {}", keypair.private_key.display()));
        return Ok(keypair);
    }

    ctx.success(&format!("Generated SSH key {}", keypair.private_key.display()));
    if add_to_agent(&keypair.private_key).await {
        ctx.success("Added key to ssh-agent");
    } else {
        ctx.warning("Key not added to ssh-agent; tether passes it explicitly");
    }

    ctx.header("Register this public key:");
    ctx.plain(&keypair.public_text);
    for authority in authorities {
        ctx.info(&format!("{}: {}", authority.name, authority.instruction));
    }

    if !prompt.confirm("Have you registered the public key everywhere listed above?")? {
        return Err(TetherError::AuthenticationNotConfigured {
            host: authorities
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            detail: "public key registration was not confirmed".to_string(),
        }
        .into());
    }
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_existing_key_is_reused_untouched() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("id_ed25519");
        std::fs::write(&key, "PRIVATE KEY MATERIAL\n").unwrap();
        std::fs::write(public_key_path(&key), "ssh-ed25519 AAAA test@host\n").unwrap();
        let before = std::fs::metadata(&key).unwrap().modified().unwrap();

        let pair = ensure_keypair(&key, "tether").await.unwrap();

        assert!(!pair.created);
        assert_eq!(pair.public_text, "ssh-ed25519 AAAA test@host");
        assert_eq!(std::fs::read_to_string(&key).unwrap(), "PRIVATE KEY MATERIAL\n");
        assert_eq!(std::fs::metadata(&key).unwrap().modified().unwrap(), before);
    }

    #[tokio::test]
    async fn test_generates_key_when_absent() {
        if which::which("ssh-keygen").is_err() {
            eprintln!("ssh-keygen not installed, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("keys").join("id_ed25519");

        let pair = ensure_keypair(&key, "tether-test").await.unwrap();
        assert!(pair.created);
        assert!(pair.public_text.starts_with("ssh-ed25519 "));
        assert!(pair.public_text.ends_with("tether-test"));

        // A second run keeps the first key.
        let again = ensure_keypair(&key, "tether-test").await.unwrap();
        assert!(!again.created);
        assert_eq!(again.public_text, pair.public_text);
    }

    #[tokio::test]
    async fn test_declined_registration_is_an_error() {
        if which::which("ssh-keygen").is_err() {
            eprintln!("ssh-keygen not installed, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("id_ed25519");
        let authorities = vec![TrustAuthority {
            name: "ada@gpu-box".into(),
            instruction: "ssh-copy-id -i key ada@gpu-box".into(),
        }];

        let err = provision(&key, "t", &authorities, &FixedAnswer(false), &OutputContext::new(true))
            .await
            .unwrap_err();
        let err = err.downcast::<TetherError>().unwrap();
        assert!(matches!(err, TetherError::AuthenticationNotConfigured { .. }));
        // The key stays for the next attempt.
        assert!(key.is_file());
    }

    #[test]
    fn test_public_key_path() {
        assert_eq!(
            public_key_path(Path::new("/home/ada/.ssh/id_ed25519")),
            PathBuf::from("/home/ada/.ssh/id_ed25519.pub")
        );
    }
}
