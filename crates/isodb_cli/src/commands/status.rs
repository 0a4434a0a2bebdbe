use chrono::{DateTime, Utc};
use isodb_core::app_error::AppResult;
use isodb_core::audit::{count_audit, recent_audit, verify_audit_chain};
use isodb_core::backfill::read_checkpoint;
use isodb_core::db::{open_db, schema_version};
use isodb_core::mirror::mirror_open;
use isodb_core::store;
use isodb_core::types::Collection;
use serde_json::{json, Map, Value};
use std::path::Path;

const RECENT_AUDIT: usize = 20;

pub fn run_status(mirror_path: &str, verbose: bool) -> AppResult<bool> {
    let root = Path::new(mirror_path);
    let mirror = mirror_open(root)?;
    let paths = mirror.paths(root);
    let conn = open_db(&paths.db)?;

    let mut counts = Map::new();
    let mut collection_syncs = Map::new();
    for collection in Collection::ALL {
        counts.insert(
            collection.as_str().to_string(),
            json!(store::get_count(&conn, collection)?),
        );
        collection_syncs.insert(
            collection.as_str().to_string(),
            json!(store::get_collection_sync_marker(&conn, collection)?),
        );
    }
    counts.insert(
        "isotherm_data_points".to_string(),
        json!(store::count_all_child_rows(&conn)?),
    );

    let last_sync_ms = store::get_last_sync_marker(&conn)?;
    let last_sync = last_sync_ms
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339());

    let mut status = json!({
        "mirror_id": mirror.mirror_id,
        "source": mirror.source.effective_base_url(),
        "schema_version": schema_version(&conn)?,
        "counts": Value::Object(counts),
        "last_sync_ms": last_sync_ms,
        "last_sync": last_sync,
        "collection_last_sync_ms": Value::Object(collection_syncs),
        "backfill": store::backfill_progress(&conn)?,
        "backfill_checkpoint": read_checkpoint(&conn)?,
        "audit_entries": count_audit(&conn)?,
    });

    if verbose {
        status["recent_audit"] = json!(recent_audit(&conn, RECENT_AUDIT)?);
        status["audit_chain"] = match verify_audit_chain(&conn) {
            Ok(chain) => json!({ "ok": true, "entries": chain.entries, "head": chain.head }),
            Err(err) => json!({ "ok": false, "error": err }),
        };
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&status).unwrap_or_else(|_| "{}".to_string())
    );
    Ok(true)
}
