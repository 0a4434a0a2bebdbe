use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "isodb")]
#[command(about = "Local one-way mirror of the NIST ISODB")]
pub struct Cli {
    /// Raise log verbosity to debug (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create mirror.json and an empty store.
    Init { mirror_path: String },
    Sync {
        mirror_path: String,
        #[arg(long)]
        dry_run: bool,
        /// Apply even when the deletion guard trips.
        #[arg(long)]
        force: bool,
        /// Comma separated subset, e.g. `materials,gases`.
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        #[arg(long)]
        skip_isotherm_counts: bool,
    },
    Status { mirror_path: String },
    Backfill {
        mirror_path: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        resume: bool,
        #[arg(long)]
        force_refetch: bool,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    Backup { mirror_path: String },
    Restore {
        mirror_path: String,
        /// Snapshot file name in the backups dir, or a path.
        snapshot: String,
    },
    ListBackups { mirror_path: String },
}
