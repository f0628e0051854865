//! Armada: campaign reconciliation CLI.
//!
//! # Usage
//!
//! ```text
//! armada apply <bundle.yaml> [--dry-run] [--json]
//! armada status [--campaign <name>] [--json]
//! armada counts <campaign> [--days N] [--json]
//! armada retry <changeset-id>
//! armada reconcile --simulate [--serve] [--workers N] [--max-attempts N] [--json]
//! armada patch <file> <diff>
//! armada id encode <kind> <id>
//! armada id decode <opaque>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    apply::ApplyArgs, counts::CountsArgs, id::IdCommand, patch::PatchArgs,
    reconcile::ReconcileArgs, retry::RetryArgs, status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "armada",
    version,
    about = "Apply campaigns and reconcile their changesets across repositories",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create specs from a campaign bundle and apply (or preview) them.
    Apply(ApplyArgs),

    /// Show changesets and their reconciler, publication and host state.
    Status(StatusArgs),

    /// Daily changeset counts for a campaign.
    Counts(CountsArgs),

    /// Re-enqueue a failed changeset.
    Retry(RetryArgs),

    /// Drain the reconciler queue once, or serve until ctrl-c.
    Reconcile(ReconcileArgs),

    /// Apply a unified diff to a file and print the result.
    Patch(PatchArgs),

    /// Encode or decode opaque IDs.
    Id {
        #[command(subcommand)]
        command: IdCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Apply(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Counts(args) => args.run(),
        Commands::Retry(args) => args.run(),
        Commands::Reconcile(args) => args.run(),
        Commands::Patch(args) => args.run(),
        Commands::Id { command } => commands::id::run(command),
    }
}

/// Logs go to stderr so `--json` output stays clean.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
