use crate::reconcile::ChangeSet;
use crate::types::Collection;
use serde::Serialize;

pub const DEFAULT_DELETION_THRESHOLD: f64 = 0.10;

/// A deletion ratio above the threshold for one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletionWarning {
    pub collection: Collection,
    pub deleted: usize,
    pub local_count: usize,
    pub ratio: f64,
    pub threshold: f64,
}

impl std::fmt::Display for DeletionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} of {} local records would be deleted ({:.1}% > {:.1}% threshold)",
            self.collection,
            self.deleted,
            self.local_count,
            self.ratio * 100.0,
            self.threshold * 100.0
        )
    }
}

/// Per-collection mass-deletion check. An empty local baseline never warns.
pub fn check(change_set: &ChangeSet, local_count: usize, threshold: f64) -> Option<DeletionWarning> {
    if local_count == 0 {
        return None;
    }
    let deleted = change_set.deleted.len();
    let ratio = deleted as f64 / local_count as f64;
    if ratio > threshold {
        Some(DeletionWarning {
            collection: change_set.collection,
            deleted,
            local_count,
            ratio,
            threshold,
        })
    } else {
        None
    }
}
