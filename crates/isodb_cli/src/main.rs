mod cli;
mod commands {
    pub mod backfill;
    pub mod backup;
    pub mod mirror;
    pub mod status;
    pub mod sync;
}

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.cmd {
        Command::Init { mirror_path } => commands::mirror::run_init(&mirror_path, now_ms()),
        Command::Sync {
            mirror_path,
            dry_run,
            force,
            tables,
            skip_isotherm_counts,
        } => commands::sync::run_sync(
            &mirror_path,
            commands::sync::SyncArgs {
                dry_run,
                force,
                tables,
                skip_isotherm_counts,
                verbose: cli.verbose,
            },
            now_ms(),
        ),
        Command::Status { mirror_path } => commands::status::run_status(&mirror_path, cli.verbose),
        Command::Backfill {
            mirror_path,
            limit,
            resume,
            force_refetch,
            batch_size,
        } => commands::backfill::run_backfill(
            &mirror_path,
            limit,
            resume,
            force_refetch,
            batch_size,
            now_ms(),
        ),
        Command::Backup { mirror_path } => commands::backup::run_backup(&mirror_path, now_ms()),
        Command::Restore {
            mirror_path,
            snapshot,
        } => commands::backup::run_restore(&mirror_path, &snapshot),
        Command::ListBackups { mirror_path } => commands::backup::run_list(&mirror_path),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("{}: {}", err.code, err.message);
            std::process::exit(1);
        }
    }
}
