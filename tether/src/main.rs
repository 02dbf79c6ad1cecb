//! Tether - bootstrap and session supervisor for a voice assistant whose
//! language models run on a remote inference host.
//!
//! `install` provisions credentials, dependencies and the assistant config;
//! `run` holds an SSH port forward open for exactly as long as the assistant
//! runs; `verify` reports whether everything is in place.

#![forbid(unsafe_code)]

mod commands;
mod credentials;
mod endpoint;
mod installer;
mod output;
mod preflight;
mod probe;
mod tunnel;
mod verifier;

use clap::{Parser, Subcommand};
use output::OutputContext;
use std::path::PathBuf;
use tether_common::{LogConfig, LogFormat, TetherConfig, TetherError, init_logging};
use tracing::debug;

#[derive(Parser)]
#[command(name = "tether")]
#[command(
    author,
    version,
    about = "Tether - environment bootstrap and tunnel session supervisor for a remote-inference voice assistant"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to tether.toml (default: ./tether.toml, then the user config dir)
    #[arg(long, global = true, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format: pretty or json
    #[arg(long, global = true, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision SSH credentials, dependencies and the assistant config
    Install {
        /// Report what would be installed without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Do not generate or register an SSH key
        #[arg(long)]
        skip_credentials: bool,

        /// Do not check or install dependencies
        #[arg(long)]
        skip_deps: bool,

        /// Assume yes for operator confirmations
        #[arg(short, long)]
        yes: bool,
    },

    /// Open the tunnel, run the assistant and tear the tunnel down on exit
    Run {
        /// Arguments passed through to the assistant
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run the integration checks and print a scorecard
    Verify {
        /// Skip checks that need the remote host or the tunnel
        #[arg(long)]
        local_only: bool,

        /// Print the scorecard as JSON
        #[arg(long)]
        json: bool,
    },

    /// Release a tunnel left behind by a previous run
    Release {
        /// Local port of the tunnel (default: tunnel.local_port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration and where each value came from
    Show {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    LogFormat::parse(value).ok_or_else(|| format!("unknown log format '{value}' (expected pretty or json)"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    let logging_guards = match init_logging(&log_config) {
        Ok(guards) => Some(guards),
        Err(e) => {
            eprintln!("warning: logging disabled: {e}");
            None
        }
    };

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report(&err);
            1
        }
    };
    // Flush buffered log lines before exiting.
    drop(logging_guards);
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let loaded = TetherConfig::load(cli.config.as_deref())?;
    debug!(file = ?loaded.file, "configuration loaded");
    let config = &loaded.config;

    match cli.command {
        Commands::Install {
            dry_run,
            skip_credentials,
            skip_deps,
            yes,
        } => {
            let opts = commands::InstallOptions {
                dry_run,
                skip_credentials,
                skip_deps,
                yes,
            };
            commands::install(config, opts, &OutputContext::new(false)).await?;
            Ok(0)
        }
        Commands::Run { args } => commands::run(config, &args, &OutputContext::new(false)).await,
        Commands::Verify { local_only, json } => {
            commands::verify(config, local_only, &OutputContext::new(json)).await
        }
        Commands::Release { port } => {
            commands::release(config, port, &OutputContext::new(false))?;
            Ok(0)
        }
        Commands::Config {
            action: ConfigAction::Show { json },
        } => {
            commands::config_show::show(&loaded, &OutputContext::new(json))?;
            Ok(0)
        }
    }
}

/// Print an error with its catalog code and remediation steps.
fn report(err: &anyhow::Error) {
    match err.downcast_ref::<TetherError>() {
        Some(tether) => {
            eprintln!("error: {err:#}");
            eprintln!();
            eprint!("{}", tether.code().entry().format_full());
        }
        None => eprintln!("error: {err:#}"),
    }
}
