use crate::app_error::{AppError, AppResult};
use crate::apply::{apply, ApplyReport};
use crate::db::apply_migrations;
use crate::guard::{self, DeletionWarning, DEFAULT_DELETION_THRESHOLD};
use crate::mirror::MirrorSyncConfig;
use crate::reconcile::{reconcile, ChangeSet, ChangeSummary};
use crate::snapshot::{SnapshotHandle, SnapshotManager};
use crate::source::{FetchedCollection, RecordSource};
use crate::store;
use crate::types::{Collection, Record};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

const PREVIEW_KEYS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Init,
    Fetching,
    Reconciling,
    Guarding,
    Blocked,
    DryRunStop,
    Snapshotting,
    Applying,
    Done,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Init => "init",
            SyncState::Fetching => "fetching",
            SyncState::Reconciling => "reconciling",
            SyncState::Guarding => "guarding",
            SyncState::Blocked => "blocked",
            SyncState::DryRunStop => "dry_run_stop",
            SyncState::Snapshotting => "snapshotting",
            SyncState::Applying => "applying",
            SyncState::Done => "done",
            SyncState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub force: bool,
    /// Empty selects every collection.
    pub tables: Vec<Collection>,
    pub skip_isotherm_counts: bool,
    pub deletion_threshold: f64,
    pub reject_duplicate_keys: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            tables: Vec::new(),
            skip_isotherm_counts: false,
            deletion_threshold: DEFAULT_DELETION_THRESHOLD,
            reject_duplicate_keys: false,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &MirrorSyncConfig) -> Self {
        Self {
            deletion_threshold: config.deletion_threshold,
            reject_duplicate_keys: config.reject_duplicate_keys,
            ..Self::default()
        }
    }

    /// Selected collections in apply order.
    pub fn selected(&self) -> Vec<Collection> {
        Collection::ALL
            .into_iter()
            .filter(|c| self.tables.is_empty() || self.tables.contains(c))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Pending,
    FetchFailed,
    ReconcileFailed,
    Unchanged,
    Planned,
    Held,
    Applied,
    ApplyFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangePreview {
    pub new: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangePreview {
    fn of(change_set: &ChangeSet) -> Self {
        let take = |keys: Vec<&str>| -> Vec<String> {
            keys.into_iter().take(PREVIEW_KEYS).map(str::to_string).collect()
        };
        Self {
            new: take(change_set.new_keys()),
            modified: take(change_set.modified_keys()),
            deleted: take(change_set.deleted_keys()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionOutcome {
    pub collection: Collection,
    pub status: CollectionStatus,
    pub fetched: usize,
    pub local_count: usize,
    pub changes: Option<ChangeSummary>,
    pub preview: Option<ChangePreview>,
    pub warning: Option<DeletionWarning>,
    pub apply: Option<ApplyReport>,
    pub error: Option<AppError>,
}

impl CollectionOutcome {
    fn pending(collection: Collection) -> Self {
        Self {
            collection,
            status: CollectionStatus::Pending,
            fetched: 0,
            local_count: 0,
            changes: None,
            preview: None,
            warning: None,
            apply: None,
            error: None,
        }
    }

    fn fail(&mut self, status: CollectionStatus, err: AppError) {
        tracing::warn!(
            collection = self.collection.as_str(),
            code = %err.code,
            error = %err.message,
            "collection failed"
        );
        self.status = status;
        self.error = Some(err);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRunReport {
    pub state: SyncState,
    pub dry_run: bool,
    pub forced: bool,
    pub phase_trace: Vec<String>,
    pub collections: Vec<CollectionOutcome>,
    pub warnings: Vec<String>,
    pub snapshot: Option<SnapshotHandle>,
    pub last_sync_ms: Option<i64>,
    pub error: Option<String>,
}

impl SyncRunReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.state, SyncState::Done | SyncState::DryRunStop)
    }

    fn enter(&mut self, state: SyncState, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::info!(phase = state.as_str(), "{detail}");
        self.phase_trace.push(format!("{}: {}", state.as_str(), detail));
        self.state = state;
    }

    fn failed_collections(&self) -> Vec<&'static str> {
        self.collections
            .iter()
            .filter(|o| o.error.is_some())
            .map(|o| o.collection.as_str())
            .collect()
    }

    fn finish_failed(&mut self) {
        let failed = self.failed_collections();
        let message = format!("sync failed for: {}", failed.join(", "));
        self.enter(SyncState::Failed, message.clone());
        self.error = Some(message);
    }
}

/// Carries isotherm counts onto fetched materials and refreshes their
/// fingerprints. Without fresh counts, known materials keep their stored
/// count and new ones get zero.
fn enrich_materials(
    records: &mut [Record],
    counts: Option<&BTreeMap<String, i64>>,
    local: &BTreeMap<String, Record>,
) -> AppResult<()> {
    for record in records.iter_mut() {
        if let Record::Material(material) = record {
            material.isotherm_count = match counts {
                Some(counts) => counts.get(&material.material_id).copied().unwrap_or(0),
                None => match local.get(&material.material_id) {
                    Some(Record::Material(stored)) => stored.isotherm_count,
                    _ => 0,
                },
            };
        }
        record.refresh_fingerprint()?;
    }
    Ok(())
}

fn plan_collection(
    conn: &Connection,
    fetched: FetchedCollection,
    options: &SyncOptions,
    counts: Option<&BTreeMap<String, i64>>,
    outcome: &mut CollectionOutcome,
) -> AppResult<ChangeSet> {
    let collection = fetched.collection;
    let local_checksums = store::get_checksums(conn, collection)?;
    let local_records = store::get_all_by_key(conn, collection)?;
    outcome.local_count = local_checksums.len();

    let mut records = fetched.records;
    if collection == Collection::Materials {
        enrich_materials(&mut records, counts, &local_records)?;
    }

    let mut change_set = reconcile(collection, &records, &local_checksums, &local_records)?;
    if let Some(rows) = fetched.child_rows {
        change_set.attach_children(rows);
    }

    if change_set.rejected_empty_keys > 0 {
        tracing::warn!(
            collection = collection.as_str(),
            count = change_set.rejected_empty_keys,
            "fetched records without identity key were skipped"
        );
    }
    if !change_set.duplicates.is_empty() {
        let keys: Vec<&str> = change_set.duplicates.iter().map(|d| d.key.as_str()).collect();
        tracing::warn!(
            collection = collection.as_str(),
            count = keys.len(),
            keys = ?keys.iter().take(PREVIEW_KEYS).collect::<Vec<_>>(),
            "duplicate identity keys in fetch; keeping the last occurrence"
        );
        if options.reject_duplicate_keys {
            return Err(AppError::new(
                "ISO_SYNC_DUPLICATE_KEYS",
                "sync",
                "fetched collection contains duplicate identity keys",
                false,
                serde_json::json!({
                    "collection": collection.as_str(),
                    "duplicates": change_set.duplicates
                }),
            ));
        }
    }

    Ok(change_set)
}

/// Runs one full mirror pass over the selected collections.
///
/// Per-collection fetch, reconcile and apply failures are recorded in the
/// report and leave sibling collections running; the returned error is
/// reserved for failures outside any single collection.
pub fn run_sync(
    conn: &Connection,
    source: &mut dyn RecordSource,
    snapshots: &SnapshotManager,
    options: &SyncOptions,
    now_ms: i64,
) -> AppResult<SyncRunReport> {
    let selected = options.selected();
    let mut report = SyncRunReport {
        state: SyncState::Init,
        dry_run: options.dry_run,
        forced: options.force,
        phase_trace: Vec::new(),
        collections: selected.iter().map(|c| CollectionOutcome::pending(*c)).collect(),
        warnings: Vec::new(),
        snapshot: None,
        last_sync_ms: None,
        error: None,
    };

    report.enter(SyncState::Init, format!("source {}", source.describe()));
    apply_migrations(conn)?;

    report.enter(
        SyncState::Fetching,
        format!(
            "collections {}",
            selected.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(",")
        ),
    );
    let mut fetched: Vec<Option<FetchedCollection>> = Vec::with_capacity(selected.len());
    for (idx, collection) in selected.iter().enumerate() {
        match source.fetch_collection(*collection) {
            Ok(batch) => {
                tracing::info!(
                    collection = collection.as_str(),
                    records = batch.records.len(),
                    "fetched collection"
                );
                report.collections[idx].fetched = batch.records.len();
                fetched.push(Some(batch));
            }
            Err(err) => {
                report.collections[idx].fail(CollectionStatus::FetchFailed, err);
                fetched.push(None);
            }
        }
    }

    let materials_fetched = selected
        .iter()
        .zip(&fetched)
        .any(|(c, f)| *c == Collection::Materials && f.is_some());
    let counts = if !materials_fetched || options.skip_isotherm_counts {
        None
    } else {
        match source.fetch_isotherm_counts() {
            Ok(counts) => Some(counts),
            Err(err) => {
                let message = format!(
                    "isotherm count enrichment failed ({}); keeping stored counts",
                    err.message
                );
                tracing::warn!(code = %err.code, "{message}");
                report.warnings.push(message);
                None
            }
        }
    };

    report.enter(SyncState::Reconciling, "classifying fetched records");
    let mut plans: Vec<Option<ChangeSet>> = Vec::with_capacity(selected.len());
    for (idx, batch) in fetched.into_iter().enumerate() {
        let Some(batch) = batch else {
            plans.push(None);
            continue;
        };
        let outcome = &mut report.collections[idx];
        match plan_collection(conn, batch, options, counts.as_ref(), outcome) {
            Ok(change_set) => {
                let summary = change_set.summary();
                tracing::info!(
                    collection = outcome.collection.as_str(),
                    new = summary.new,
                    modified = summary.modified,
                    deleted = summary.deleted,
                    unchanged = summary.unchanged,
                    "reconciled collection"
                );
                outcome.status = if change_set.is_empty() {
                    CollectionStatus::Unchanged
                } else {
                    CollectionStatus::Planned
                };
                outcome.changes = Some(summary);
                outcome.preview = Some(ChangePreview::of(&change_set));
                plans.push(Some(change_set));
            }
            Err(err) => {
                outcome.fail(CollectionStatus::ReconcileFailed, err);
                plans.push(None);
            }
        }
    }

    report.enter(
        SyncState::Guarding,
        format!("deletion threshold {:.2}", options.deletion_threshold),
    );
    let mut tripped: Vec<String> = Vec::new();
    for (idx, plan) in plans.iter().enumerate() {
        let Some(change_set) = plan else {
            continue;
        };
        let outcome = &mut report.collections[idx];
        if let Some(warning) = guard::check(change_set, outcome.local_count, options.deletion_threshold) {
            tracing::warn!(
                collection = warning.collection.as_str(),
                deleted = warning.deleted,
                local_count = warning.local_count,
                ratio = warning.ratio,
                "mass deletion guard tripped"
            );
            tripped.push(warning.to_string());
            outcome.warning = Some(warning);
        }
    }
    if !tripped.is_empty() {
        report.warnings.extend(tripped.iter().cloned());
        if !options.force {
            for outcome in report.collections.iter_mut() {
                if outcome.status == CollectionStatus::Planned {
                    outcome.status = CollectionStatus::Held;
                }
            }
            let message = tripped.join("; ");
            report.enter(SyncState::Blocked, "mass deletion guard tripped; rerun with force to apply");
            report.error = Some(message);
            return Ok(report);
        }
        tracing::warn!("deletion guard overridden by force");
        report.phase_trace.push("guarding: overridden by force".to_string());
    }

    if options.dry_run {
        if report.failed_collections().is_empty() {
            report.enter(SyncState::DryRunStop, "change sets computed; nothing applied");
        } else {
            report.finish_failed();
        }
        return Ok(report);
    }

    let pending: Vec<usize> = plans
        .iter()
        .enumerate()
        .filter(|(_, p)| p.as_ref().map(|cs| !cs.is_empty()).unwrap_or(false))
        .map(|(idx, _)| idx)
        .collect();

    if !pending.is_empty() {
        report.enter(SyncState::Snapshotting, format!("{} collection(s) to apply", pending.len()));
        match snapshots.snapshot(now_ms) {
            Ok(handle) => report.snapshot = Some(handle),
            Err(err) => {
                let message = format!("snapshot failed before apply: {}", err.message);
                for idx in &pending {
                    report.collections[*idx].status = CollectionStatus::Held;
                }
                report.enter(SyncState::Failed, message.clone());
                report.error = Some(message);
                return Ok(report);
            }
        }

        report.enter(SyncState::Applying, "applying in fixed collection order");
        for idx in pending {
            let Some(change_set) = plans[idx].as_ref() else {
                continue;
            };
            let outcome = &mut report.collections[idx];
            match apply(conn, change_set, now_ms) {
                Ok(applied) => {
                    outcome.status = CollectionStatus::Applied;
                    outcome.apply = Some(applied);
                }
                Err(err) => outcome.fail(CollectionStatus::ApplyFailed, err),
            }
        }
    }

    if !report.failed_collections().is_empty() {
        report.finish_failed();
        return Ok(report);
    }

    for collection in &selected {
        store::set_collection_sync_marker(conn, *collection, now_ms)?;
    }
    if selected.len() == Collection::ALL.len() {
        store::set_last_sync_marker(conn, now_ms)?;
        report.last_sync_ms = Some(now_ms);
        report.enter(SyncState::Done, "last_sync recorded");
    } else {
        report.enter(SyncState::Done, "collection markers recorded; mirror-wide last_sync unchanged");
    }
    Ok(report)
}
