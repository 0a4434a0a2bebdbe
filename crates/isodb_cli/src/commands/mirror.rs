use isodb_core::app_error::AppResult;
use isodb_core::db::{open_db, schema_version};
use isodb_core::mirror::mirror_init;
use std::path::Path;

pub fn run_init(mirror_path: &str, now_ms: i64) -> AppResult<bool> {
    let root = Path::new(mirror_path);
    let mirror = mirror_init(root, now_ms)?;
    let paths = mirror.paths(root);
    let conn = open_db(&paths.db)?;
    let version = schema_version(&conn)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "mirror_id": mirror.mirror_id,
            "db": paths.db,
            "backups_dir": paths.backups_dir,
            "schema_version": version,
            "source": mirror.source.effective_base_url(),
        }))
        .unwrap_or_else(|_| "{}".to_string())
    );
    Ok(true)
}
