//! CLI command dispatch and execution

use anyhow::Result;
use clap::{Parser, Subcommand};
use ralph_admin_core::Registry;
use ralph_admin_core::config::load_config;

mod cleanup;
mod control;
mod list;
mod show;
mod tail;

/// ralph-admin - Monitor and control ralph agent loops
#[derive(Parser, Debug)]
#[command(
    name = "ralph-admin",
    version,
    about = "Monitor and control ralph agent loops",
    long_about = "Lists ralph sessions from the shared registry directory \
                  ($RALPH_REGISTRY_DIR or $TMPDIR/ralph-sessions) and sends \
                  stop, pause, and resume signals to their workers"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List sessions, newest and most active first
    List(list::ListArgs),

    /// Show every field of one session
    Show(show::ShowArgs),

    /// Ask a session's worker to stop (SIGTERM)
    Stop(control::ControlArgs),

    /// Freeze a session's worker and its children (SIGSTOP)
    Pause(control::ControlArgs),

    /// Thaw a paused session (SIGCONT)
    Resume(control::ControlArgs),

    /// Pause a running session or resume a paused one
    Toggle(control::ControlArgs),

    /// Print the tail of a session's live log
    Log(tail::LogArgs),

    /// Print the tail of a session's progress notes
    Progress(tail::ProgressArgs),

    /// Remove corrupt and expired descriptors
    Cleanup(cleanup::CleanupArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        let registry = Registry::from_config(load_config());

        if self.command.sweeps_on_startup() {
            startup_sweep(&registry);
        }

        match self.command {
            Commands::List(args) => list::execute(&registry, args),
            Commands::Show(args) => show::execute(&registry, args),
            Commands::Stop(args) => control::stop(&registry, args),
            Commands::Pause(args) => control::pause(&registry, args),
            Commands::Resume(args) => control::resume(&registry, args),
            Commands::Toggle(args) => control::toggle(&registry, args),
            Commands::Log(args) => tail::log(&registry, args),
            Commands::Progress(args) => tail::progress(&registry, args),
            Commands::Cleanup(args) => cleanup::execute(&registry, args),
        }
    }
}

impl Commands {
    /// `cleanup` sweeps by itself, and a dry run must not delete anything.
    fn sweeps_on_startup(&self) -> bool {
        match self {
            Commands::Cleanup(_) => false,
            Commands::List(args) => !args.dry_run,
            _ => true,
        }
    }
}

/// Drop expired and corrupt descriptors before doing anything else.
fn startup_sweep(registry: &Registry) {
    match registry.cleanup_expired() {
        Ok(0) => {}
        Ok(n) => tracing::debug!("Startup sweep removed {n} descriptor(s)"),
        Err(e) => eprintln!("Warning: startup cleanup failed: {e}"),
    }
}
