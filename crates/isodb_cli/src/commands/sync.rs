use isodb_core::app_error::AppResult;
use isodb_core::db::open_db;
use isodb_core::mirror::mirror_open;
use isodb_core::snapshot::SnapshotManager;
use isodb_core::sync::{run_sync as run_mirror_sync, SyncOptions, SyncRunReport};
use isodb_core::types::Collection;
use isodb_fetch::open_source;
use std::path::Path;

pub struct SyncArgs {
    pub dry_run: bool,
    pub force: bool,
    pub tables: Vec<String>,
    pub skip_isotherm_counts: bool,
    pub verbose: bool,
}

pub fn run_sync(mirror_path: &str, args: SyncArgs, now_ms: i64) -> AppResult<bool> {
    let root = Path::new(mirror_path);
    let mirror = mirror_open(root)?;
    let paths = mirror.paths(root);

    let mut options = SyncOptions::from_config(&mirror.sync);
    options.dry_run = args.dry_run;
    options.force = args.force;
    options.skip_isotherm_counts = args.skip_isotherm_counts;
    options.tables = args
        .tables
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| Collection::parse(t.trim()))
        .collect::<AppResult<Vec<_>>>()?;

    let conn = open_db(&paths.db)?;
    let mut source = open_source(&mirror.source)?;
    tracing::info!(source = %source.describe(), dry_run = options.dry_run, "starting sync");
    let snapshots = SnapshotManager::new(paths.db.clone(), paths.backups_dir.clone());

    let report = run_mirror_sync(&conn, source.as_mut(), &snapshots, &options, now_ms)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
    );
    if args.dry_run || args.verbose {
        print_breakdown(&report);
    }
    if let Some(error) = &report.error {
        eprintln!("sync {}: {}", report.state.as_str(), error);
    }
    Ok(report.succeeded())
}

fn print_breakdown(report: &SyncRunReport) {
    println!();
    println!("sync {}{}", report.state.as_str(), if report.dry_run { " (dry run)" } else { "" });
    for outcome in &report.collections {
        let Some(changes) = &outcome.changes else {
            println!("  {:<13} {:?}", outcome.collection.as_str(), outcome.status);
            continue;
        };
        println!(
            "  {:<13} +{} ~{} -{} ={}",
            outcome.collection.as_str(),
            changes.new,
            changes.modified,
            changes.deleted,
            changes.unchanged
        );
        if let Some(preview) = &outcome.preview {
            for (label, keys) in [
                ("new", &preview.new),
                ("modified", &preview.modified),
                ("deleted", &preview.deleted),
            ] {
                if !keys.is_empty() {
                    println!("    {label}: {}", keys.join(", "));
                }
            }
        }
        if let Some(warning) = &outcome.warning {
            println!("    warning: {warning}");
        }
    }
}
