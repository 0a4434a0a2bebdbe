use isodb_core::app_error::AppResult;
use isodb_core::mirror::mirror_paths;
use isodb_core::snapshot::SnapshotManager;
use std::path::Path;

fn manager(mirror_path: &str) -> AppResult<SnapshotManager> {
    let paths = mirror_paths(Path::new(mirror_path))?;
    Ok(SnapshotManager::new(paths.db, paths.backups_dir))
}

pub fn run_backup(mirror_path: &str, now_ms: i64) -> AppResult<bool> {
    let handle = manager(mirror_path)?.snapshot(now_ms)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&handle).unwrap_or_else(|_| "{}".to_string())
    );
    Ok(true)
}

pub fn run_restore(mirror_path: &str, snapshot: &str) -> AppResult<bool> {
    let snapshots = manager(mirror_path)?;
    let handle = snapshots.resolve(snapshot)?;
    snapshots.restore(&handle)?;
    println!("restored {} from {}", snapshots.db_path.display(), handle.name);
    Ok(true)
}

pub fn run_list(mirror_path: &str) -> AppResult<bool> {
    let handles = manager(mirror_path)?.list()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&handles).unwrap_or_else(|_| "[]".to_string())
    );
    Ok(true)
}
