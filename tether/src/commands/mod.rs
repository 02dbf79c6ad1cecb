//! Subcommand implementations.

pub mod config_show;
pub mod helpers;
pub mod install;
pub mod release;
pub mod run;
pub mod verify;

pub use install::{InstallOptions, install};
pub use release::release;
pub use run::run;
pub use verify::verify;
