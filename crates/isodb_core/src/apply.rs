use crate::app_error::{AppError, AppResult};
use crate::audit::{AuditAction, AuditWriter};
use crate::reconcile::ChangeSet;
use crate::store;
use crate::types::Record;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub child_rows_written: usize,
    pub child_rows_deleted: usize,
    pub audit_entries: usize,
}

fn apply_error(message: &str, details: serde_json::Value) -> AppError {
    AppError::new("ISO_APPLY_FAILED", "apply", message, false, details)
}

/// Applies one collection's change set in a single transaction. On error
/// nothing from this change set is left in the store.
pub fn apply(conn: &Connection, change_set: &ChangeSet, now_ms: i64) -> AppResult<ApplyReport> {
    let collection = change_set.collection;
    let tx = conn.unchecked_transaction().map_err(|e| {
        apply_error(
            "failed to begin apply transaction",
            serde_json::json!({ "error": e.to_string(), "collection": collection.as_str() }),
        )
    })?;

    let mut report = ApplyReport::default();
    let mut audit = AuditWriter::new(&tx, now_ms)?;
    let has_children = collection.child_relation().is_some();

    let mut deleted_keys = Vec::with_capacity(change_set.deleted.len());
    for old in &change_set.deleted {
        let key = old.key();
        if has_children {
            report.child_rows_deleted += store::delete_child_rows(&tx, key)?;
            store::delete_fetch_state(&tx, key)?;
        }
        audit.append(collection, AuditAction::Delete, key, Some(&old.to_snapshot()?), None)?;
        deleted_keys.push(key.to_string());
    }
    store::delete_many(&tx, collection, &deleted_keys)?;
    report.deleted = deleted_keys.len();

    let mut stamped: Vec<Record> =
        Vec::with_capacity(change_set.new.len() + change_set.modified.len());
    for record in &change_set.new {
        let mut record = record.clone();
        record.set_local_updated_ms(now_ms);
        audit.append(collection, AuditAction::Insert, record.key(), None, Some(&record.to_snapshot()?))?;
        stamped.push(record);
    }
    report.inserted = change_set.new.len();
    for modified in &change_set.modified {
        let mut record = modified.new.clone();
        record.set_local_updated_ms(now_ms);
        audit.append(
            collection,
            AuditAction::Update,
            record.key(),
            Some(&modified.old.to_snapshot()?),
            Some(&record.to_snapshot()?),
        )?;
        stamped.push(record);
    }
    report.updated = change_set.modified.len();
    store::upsert_many(&tx, &stamped)?;

    if has_children {
        for record in &stamped {
            let key = record.key();
            match change_set.child_rows.as_ref().and_then(|rows| rows.get(key)) {
                Some(points) => {
                    report.child_rows_deleted += store::count_child_rows(&tx, key)?;
                    report.child_rows_written += store::replace_child_rows(&tx, key, points)?;
                    store::mark_points_fetched(&tx, key, points.len(), now_ms)?;
                }
                None => {
                    report.child_rows_deleted += store::delete_child_rows(&tx, key)?;
                    store::mark_points_pending(&tx, key, now_ms)?;
                }
            }
        }
    }

    report.audit_entries = audit.written();
    drop(audit);

    tx.commit().map_err(|e| {
        apply_error(
            "failed to commit apply transaction",
            serde_json::json!({ "error": e.to_string(), "collection": collection.as_str() }),
        )
    })?;

    tracing::info!(
        collection = collection.as_str(),
        inserted = report.inserted,
        updated = report.updated,
        deleted = report.deleted,
        child_rows_written = report.child_rows_written,
        "applied change set"
    );
    Ok(report)
}
