//! Cleanup command implementation - remove corrupt and expired descriptors

use anyhow::Result;
use clap::Args;
use ralph_admin_core::Registry;

/// Remove corrupt and expired session descriptors
#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Show what would be cleaned without modifying
    #[arg(long)]
    dry_run: bool,
}

/// Execute the cleanup command
pub fn execute(registry: &Registry, args: CleanupArgs) -> Result<()> {
    let dir = registry.dir().display();
    if args.dry_run {
        let count = registry.cleanup_expired_dry_run()?;
        println!("DRY RUN - would remove {count} descriptor(s) from {dir}");
    } else {
        let count = registry.cleanup_expired()?;
        println!("Removed {count} descriptor(s) from {dir}");
    }
    Ok(())
}
