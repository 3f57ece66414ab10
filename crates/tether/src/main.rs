#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Command-line interface for replaying Git history into a centralized
//! changeset store via the libtether crate.

/// CLI argument definitions.
mod args;
/// Command implementations.
mod commands;
/// Progress rendering for the terminal.
mod progress;
/// Output construction helpers.
mod ui;

use std::{
    env,
    io::{self, IsTerminal, Write},
    path::PathBuf,
    process,
    sync::Arc,
};

use anyhow::{Context, Result};
use args::{Cli, Commands};
use clap::Parser;
use commands::{
    checkin::{CheckinInvocation, checkin_command},
    configure::configure_command,
    shelve::shelve_command,
};
use libtether::{TetherError, git};
use tether_term::Output;
use tracing_subscriber::EnvFilter;

/// Expand a leading `~` in a filesystem path using the `HOME` environment variable.
fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~")
        && let Ok(home) = env::var("HOME")
    {
        return PathBuf::from(path.replacen("~", &home, 1));
    }
    PathBuf::from(path)
}

/// Resolve the repository root for this invocation.
fn resolve_repo(repo_dir: Option<&str>) -> Result<PathBuf> {
    let start = match repo_dir {
        Some(dir) => expand_tilde(dir),
        None => env::current_dir().context("Failed to get current directory")?,
    };
    git::find_root(&start).context("Not in a git repository")
}

/// CLI entrypoint.
fn main() -> Result<()> {
    let cli = Cli::parse();

    // Internal diagnostics go to stderr, filtered by RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let color = ui::color_choice(cli.color, cli.no_color);
    let output = ui::build_output(cli.quiet, color);

    if let Err(e) = run(cli, &output) {
        // Reset any existing colors only if color was enabled and stdout is a TTY
        if color && io::stdout().is_terminal() {
            print!("\x1b[0m");
            if let Err(flush_err) = io::stdout().flush() {
                eprintln!("Failed to flush stdout while resetting colors: {flush_err}");
            }
        }

        if let Err(display_err) = output.fail(&format!("{e:#}")) {
            eprintln!("Failed to report error via output handler: {display_err:#}");
        }
        if let Err(finish_err) = output.finish() {
            eprintln!("Failed to flush output handler: {finish_err:#}");
        }

        let exit_code = match e.downcast_ref::<TetherError>() {
            Some(err) => err.exit_code(),
            None => 1,
        };
        process::exit(exit_code);
    }
    Ok(())
}

/// Execute the selected CLI command using the provided output implementation.
fn run(cli: Cli, output: &Arc<dyn Output>) -> Result<()> {
    let repo_dir = resolve_repo(cli.repo_dir.as_deref())?;

    match cli.command {
        Commands::Configure {
            store,
            server_path,
            deep,
            depth,
        } => {
            configure_command(&repo_dir, output.as_ref(), &store, &server_path, deep, depth)?;
        }
        Commands::Checkin {
            deep,
            shallow,
            depth,
            no_lock,
            autosquash,
            squash,
            work_items,
            bypass_gate,
            message,
        } => {
            checkin_command(
                &repo_dir,
                output.as_ref(),
                cli.quiet,
                CheckinInvocation {
                    deep,
                    shallow,
                    depth,
                    no_lock,
                    autosquash,
                    squash,
                    work_items,
                    bypass_gate,
                    message,
                },
            )?;
        }
        Commands::Shelve {
            replace,
            work_items,
            name,
        } => {
            shelve_command(
                &repo_dir,
                output.as_ref(),
                cli.quiet,
                &name,
                replace,
                &work_items,
            )?;
        }
    }

    output.finish()?;
    Ok(())
}
