//! Shared types and utilities for tether.
//!
//! Everything the `tether` binary needs that is not a lifecycle step of its
//! own lives here: configuration, the error catalog, logging setup, the
//! bounded retry loop, command execution on local/remote hosts, process and
//! port utilities, and the assistant configuration document.

pub mod config;
pub mod document;
pub mod errors;
pub mod logging;
pub mod manifest;
pub mod process;
pub mod retry;
pub mod ssh;
pub mod types;

pub use config::{ConfigSource, EnvParser, Sourced, TetherConfig};
pub use document::{AssistantSettings, ConfigDocument, ModelParams, OllamaConfig};
pub use errors::{ErrorCategory, ErrorCode, ErrorEntry, TetherError};
pub use logging::{LogConfig, LogFormat, LoggingError, LoggingGuards, init_logging};
pub use manifest::{DependencySpec, InstallMethod, SizeClass, VerifyMethod};
pub use retry::{RetryExhausted, RetryPolicy, poll_until, run_with_retry, run_with_retry_if};
pub use ssh::{CommandOutput, CommandRunner, HostTarget, ShellRunner, SshOptions};
pub use types::{HostIdentity, HostRole};
