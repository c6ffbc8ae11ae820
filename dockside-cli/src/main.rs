//! dockside: keeps a rootless Docker (or Lima VM) install converged.
//!
//! # Usage
//!
//! ```text
//! dockside update [--dry-run] [--force] [--lima-recreate] [-v]
//! dockside check
//! dockside context sync [--direction host-to-sandbox|sandbox-to-host|both] [--dry-run]
//! dockside context watch start [--foreground] | stop [--pid N] | status [--json]
//! dockside config path | get <key>
//! ```

mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    check::CheckArgs, config::ConfigCommand, context::ContextCommand, update::UpdateArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "dockside",
    version,
    about = "Reconcile a rootless Docker or Lima install and mirror its CLI contexts",
    long_about = None,
)]
struct Cli {
    /// Log progress at info level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Converge the service unit, context, bundle and VM to their expected state.
    Update(UpdateArgs),

    /// Print an advisory when a newer docker bundle is available.
    Check(CheckArgs),

    /// Mirror docker CLI contexts between the host and the sandbox.
    Context {
        #[command(subcommand)]
        command: ContextCommand,
    },

    /// Inspect the dockside configuration file.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    // The foreground watcher installs its own subscriber with an info default.
    let foreground_watch = matches!(
        &cli.command,
        Commands::Context { command } if command.is_foreground_watch()
    );
    if !foreground_watch {
        init_tracing(cli.verbose);
    }

    match dispatch(cli.command) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn dispatch(command: Commands) -> Result<u8> {
    match command {
        Commands::Update(args) => args.run(),
        Commands::Check(args) => args.run(),
        Commands::Context { command } => commands::context::run(command),
        Commands::Config { command } => commands::config::run(command),
    }
}
