mod common;

use common::material;
use isodb_core::guard::{check, DEFAULT_DELETION_THRESHOLD};
use isodb_core::reconcile::ChangeSet;
use isodb_core::types::Collection;

fn with_deletions(n: usize) -> ChangeSet {
    let mut cs = ChangeSet::empty(Collection::Materials);
    cs.deleted = (0..n).map(|i| material(&format!("m{i}"), "gone")).collect();
    cs
}

#[test]
fn guard_warns_above_threshold() {
    let warning = check(&with_deletions(11), 100, DEFAULT_DELETION_THRESHOLD).expect("must warn");
    assert_eq!(warning.deleted, 11);
    assert_eq!(warning.local_count, 100);
    assert!((warning.ratio - 0.11).abs() < 1e-9);
    assert_eq!(warning.threshold, DEFAULT_DELETION_THRESHOLD);
    assert!(warning.to_string().contains("materials"));
}

#[test]
fn guard_allows_ratio_equal_to_threshold() {
    assert!(check(&with_deletions(10), 100, DEFAULT_DELETION_THRESHOLD).is_none());
}

#[test]
fn guard_never_warns_on_empty_baseline() {
    assert!(check(&with_deletions(0), 0, DEFAULT_DELETION_THRESHOLD).is_none());
    assert!(check(&with_deletions(500), 0, 0.0).is_none());
}

#[test]
fn guard_full_outage_warns() {
    let warning = check(&with_deletions(50), 50, DEFAULT_DELETION_THRESHOLD).expect("must warn");
    assert_eq!(warning.ratio, 1.0);
}

#[test]
fn guard_respects_custom_threshold() {
    assert!(check(&with_deletions(30), 100, 0.5).is_none());
    assert!(check(&with_deletions(60), 100, 0.5).is_some());
}
