use crate::app_error::{AppError, AppResult};
use crate::source::RecordSource;
use crate::store::{self, CandidateScope, META_BACKFILL_CHECKPOINT};
use crate::types::{Collection, MeasurementPoint};
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillOptions {
    pub limit: Option<usize>,
    pub resume: bool,
    pub force_refetch: bool,
    pub batch_size: usize,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            limit: None,
            resume: false,
            force_refetch: false,
            batch_size: 50,
        }
    }
}

impl BackfillOptions {
    fn scope(&self) -> CandidateScope {
        if self.force_refetch {
            CandidateScope::All
        } else if self.resume {
            CandidateScope::Unfetched
        } else {
            CandidateScope::Pending
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub candidates: usize,
    pub processed: usize,
    pub fetched: usize,
    pub failed: usize,
    pub skipped: usize,
    pub points_written: usize,
    pub batches_committed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillCheckpoint {
    pub last_key: String,
    pub processed: usize,
    pub fetched: usize,
    pub failed: usize,
    pub at_ms: i64,
}

fn backfill_error(code: &str, message: &str, details: serde_json::Value) -> AppError {
    AppError::new(code, "backfill", message, false, details)
}

pub fn read_checkpoint(conn: &Connection) -> AppResult<Option<BackfillCheckpoint>> {
    match store::read_meta(conn, META_BACKFILL_CHECKPOINT)? {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
            backfill_error(
                "ISO_BACKFILL_CHECKPOINT_INVALID",
                "failed parsing backfill checkpoint",
                serde_json::json!({ "error": e.to_string() }),
            )
        }),
    }
}

fn write_checkpoint(conn: &Connection, checkpoint: &BackfillCheckpoint) -> AppResult<()> {
    let raw = serde_json::to_string(checkpoint).map_err(|e| {
        backfill_error(
            "ISO_BACKFILL_CHECKPOINT_INVALID",
            "failed encoding backfill checkpoint",
            serde_json::json!({ "error": e.to_string() }),
        )
    })?;
    store::write_meta(conn, META_BACKFILL_CHECKPOINT, &raw, checkpoint.at_ms)
}

fn item_error_text(err: &AppError) -> String {
    match err.details.get("error").and_then(|v| v.as_str()) {
        Some(cause) => format!("{}: {} ({cause})", err.code, err.message),
        None => format!("{}: {}", err.code, err.message),
    }
}

/// Replaces one parent's points inside a savepoint, so a row the store
/// rejects leaves the parent's previous rows and the rest of the batch intact.
fn store_points(
    tx: &mut Transaction<'_>,
    filename: &str,
    points: &[MeasurementPoint],
    now_ms: i64,
) -> AppResult<usize> {
    let savepoint_error = |e: rusqlite::Error| {
        backfill_error(
            "ISO_BACKFILL_FAILED",
            "backfill savepoint failed",
            serde_json::json!({ "error": e.to_string(), "filename": filename }),
        )
    };
    let sp = tx.savepoint().map_err(savepoint_error)?;
    let written = store::replace_child_rows(&sp, filename, points)?;
    store::mark_points_fetched(&sp, filename, points.len(), now_ms)?;
    sp.commit().map_err(savepoint_error)?;
    Ok(written)
}

/// Fetches measurement points parent by parent, committing every
/// `batch_size` items. A failed fetch or a rejected write is recorded against
/// its parent and the batch moves on.
pub fn backfill(
    conn: &Connection,
    source: &mut dyn RecordSource,
    options: &BackfillOptions,
    now_ms: i64,
) -> AppResult<BackfillReport> {
    if options.batch_size == 0 {
        return Err(backfill_error(
            "ISO_BACKFILL_OPTIONS_INVALID",
            "batch_size must be positive",
            serde_json::json!({ "batch_size": options.batch_size }),
        ));
    }

    let parents = store::get_count(conn, Collection::Isotherms)?;
    let mut candidates = store::backfill_candidates(conn, options.scope())?;
    let mut report = BackfillReport {
        candidates: candidates.len(),
        skipped: parents.saturating_sub(candidates.len()),
        ..BackfillReport::default()
    };
    if let Some(limit) = options.limit {
        candidates.truncate(limit);
    }
    tracing::info!(
        parents,
        candidates = report.candidates,
        selected = candidates.len(),
        resume = options.resume,
        force_refetch = options.force_refetch,
        "starting measurement point backfill"
    );

    for batch in candidates.chunks(options.batch_size) {
        let mut tx = conn.unchecked_transaction().map_err(|e| {
            backfill_error(
                "ISO_BACKFILL_FAILED",
                "failed to begin backfill batch",
                serde_json::json!({ "error": e.to_string() }),
            )
        })?;

        for filename in batch {
            report.processed += 1;
            let stored = source
                .fetch_isotherm_points(filename)
                .and_then(|points| store_points(&mut tx, filename, &points, now_ms));
            match stored {
                Ok(written) => {
                    report.points_written += written;
                    report.fetched += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        filename = %filename,
                        code = %err.code,
                        error = %err.message,
                        "measurement point backfill failed"
                    );
                    store::record_points_failure(&tx, filename, &item_error_text(&err), now_ms)?;
                    report.failed += 1;
                }
            }
        }

        if let Some(last_key) = batch.last() {
            write_checkpoint(
                &tx,
                &BackfillCheckpoint {
                    last_key: last_key.clone(),
                    processed: report.processed,
                    fetched: report.fetched,
                    failed: report.failed,
                    at_ms: now_ms,
                },
            )?;
        }
        tx.commit().map_err(|e| {
            backfill_error(
                "ISO_BACKFILL_FAILED",
                "failed to commit backfill batch",
                serde_json::json!({ "error": e.to_string() }),
            )
        })?;
        report.batches_committed += 1;
        tracing::debug!(
            processed = report.processed,
            fetched = report.fetched,
            failed = report.failed,
            "backfill batch committed"
        );
    }

    tracing::info!(
        processed = report.processed,
        fetched = report.fetched,
        failed = report.failed,
        points = report.points_written,
        "backfill finished"
    );
    Ok(report)
}
