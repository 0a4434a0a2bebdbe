use crate::app_error::{AppError, AppResult};
use crate::types::{Collection, MeasurementPoint, Record};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// A known record whose fingerprint changed, paired with its stored form.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifiedRecord {
    pub new: Record,
    pub old: Record,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateKey {
    pub key: String,
    pub occurrences: usize,
}

/// One reconciliation pass for one collection. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub collection: Collection,
    pub new: Vec<Record>,
    pub modified: Vec<ModifiedRecord>,
    pub deleted: Vec<Record>,
    pub unchanged: usize,
    pub duplicates: Vec<DuplicateKey>,
    pub rejected_empty_keys: usize,
    /// Child rows for New and Modified parents, keyed by parent identity.
    /// `None` when the source supplied no child data for this pass.
    pub child_rows: Option<BTreeMap<String, Vec<MeasurementPoint>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub new: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub duplicates: usize,
    pub rejected_empty_keys: usize,
}

impl ChangeSet {
    pub fn empty(collection: Collection) -> Self {
        Self {
            collection,
            new: Vec::new(),
            modified: Vec::new(),
            deleted: Vec::new(),
            unchanged: 0,
            duplicates: Vec::new(),
            rejected_empty_keys: 0,
            child_rows: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            new: self.new.len(),
            modified: self.modified.len(),
            deleted: self.deleted.len(),
            unchanged: self.unchanged,
            duplicates: self.duplicates.len(),
            rejected_empty_keys: self.rejected_empty_keys,
        }
    }

    pub fn new_keys(&self) -> Vec<&str> {
        self.new.iter().map(|r| r.key()).collect()
    }

    pub fn modified_keys(&self) -> Vec<&str> {
        self.modified.iter().map(|m| m.new.key()).collect()
    }

    pub fn deleted_keys(&self) -> Vec<&str> {
        self.deleted.iter().map(|r| r.key()).collect()
    }

    /// Keeps only the child rows whose parent is New or Modified.
    pub fn attach_children(&mut self, mut rows: BTreeMap<String, Vec<MeasurementPoint>>) {
        let mut kept = BTreeMap::new();
        let parents = self
            .new
            .iter()
            .map(|r| r.key())
            .chain(self.modified.iter().map(|m| m.new.key()));
        for key in parents {
            if let Some(points) = rows.remove(key) {
                kept.insert(key.to_string(), points);
            }
        }
        self.child_rows = Some(kept);
    }
}

fn reconcile_error(message: &str, details: serde_json::Value) -> AppError {
    AppError::new("ISO_RECONCILE_FAILED", "reconcile", message, false, details)
}

/// Partitions `fetched` against local state by identity key.
///
/// New and Modified keep fetch order; Deleted follows the key order of
/// `local_checksums`. A key fetched more than once keeps its last value at the
/// position of its first occurrence and is reported in `duplicates`.
pub fn reconcile(
    collection: Collection,
    fetched: &[Record],
    local_checksums: &BTreeMap<String, String>,
    local_records: &BTreeMap<String, Record>,
) -> AppResult<ChangeSet> {
    let mut change_set = ChangeSet::empty(collection);

    let mut order: Vec<&Record> = Vec::with_capacity(fetched.len());
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(fetched.len());
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for record in fetched {
        if record.collection() != collection {
            return Err(reconcile_error(
                "fetched record belongs to a different collection",
                serde_json::json!({
                    "expected": collection.as_str(),
                    "actual": record.collection().as_str(),
                    "key": record.key()
                }),
            ));
        }
        let key = record.key();
        if key.trim().is_empty() {
            change_set.rejected_empty_keys += 1;
            continue;
        }
        match index.get(key) {
            Some(&pos) => {
                order[pos] = record;
                *seen.entry(key).or_insert(1) += 1;
            }
            None => {
                index.insert(key, order.len());
                order.push(record);
            }
        }
    }

    for record in order {
        let key = record.key();
        match local_checksums.get(key) {
            None => change_set.new.push(record.clone()),
            Some(local_fp) if local_fp == record.fingerprint() => change_set.unchanged += 1,
            Some(_) => {
                let old = local_records.get(key).ok_or_else(|| {
                    reconcile_error(
                        "local checksum has no matching local record",
                        serde_json::json!({ "collection": collection.as_str(), "key": key }),
                    )
                })?;
                change_set.modified.push(ModifiedRecord {
                    new: record.clone(),
                    old: old.clone(),
                });
            }
        }
    }

    for key in local_checksums.keys() {
        if index.contains_key(key.as_str()) {
            continue;
        }
        let old = local_records.get(key).ok_or_else(|| {
            reconcile_error(
                "local checksum has no matching local record",
                serde_json::json!({ "collection": collection.as_str(), "key": key }),
            )
        })?;
        change_set.deleted.push(old.clone());
    }

    let mut duplicates: Vec<DuplicateKey> = seen
        .into_iter()
        .map(|(key, occurrences)| DuplicateKey {
            key: key.to_string(),
            occurrences,
        })
        .collect();
    duplicates.sort_by(|a, b| a.key.cmp(&b.key));
    change_set.duplicates = duplicates;

    Ok(change_set)
}
