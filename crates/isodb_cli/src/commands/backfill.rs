use isodb_core::app_error::AppResult;
use isodb_core::backfill::{backfill, BackfillOptions};
use isodb_core::db::open_db;
use isodb_core::mirror::mirror_open;
use isodb_fetch::open_source;
use std::path::Path;

pub fn run_backfill(
    mirror_path: &str,
    limit: Option<usize>,
    resume: bool,
    force_refetch: bool,
    batch_size: Option<usize>,
    now_ms: i64,
) -> AppResult<bool> {
    let root = Path::new(mirror_path);
    let mirror = mirror_open(root)?;
    let conn = open_db(&mirror.paths(root).db)?;
    let mut source = open_source(&mirror.source)?;

    let options = BackfillOptions {
        limit,
        resume,
        force_refetch,
        batch_size: batch_size.unwrap_or(mirror.backfill.batch_size),
    };
    let report = backfill(&conn, source.as_mut(), &options, now_ms)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
    );
    Ok(true)
}
