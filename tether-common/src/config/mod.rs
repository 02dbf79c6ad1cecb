//! Configuration system for tether.
//!
//! - `tether.toml` (project directory first, then the user config directory)
//! - `TETHER_*` environment overrides with type checking
//! - source tracking so `tether config show` can explain every value

pub mod env;
pub mod file;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use file::{
    GitConfig, InstallConfig, LoadedConfig, ProjectConfig, RemoteConfig, TetherConfig,
    TunnelConfig,
};
pub use source::{ConfigSource, Sourced};
