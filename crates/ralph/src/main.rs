//! ralph-admin - Monitor and control ralph agent loops
//!
//! A thin CLI over the shared session registry directory: lists live
//! sessions, shows their logs and progress notes, and stops, pauses, or
//! resumes the worker processes.

use clap::Parser;

mod commands;

use commands::Cli;

fn main() {
    ralph_admin_core::logging::init();
    let cli = Cli::parse();

    if let Err(e) = cli.execute() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
