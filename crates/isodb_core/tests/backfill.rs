mod common;

use common::{isotherm, points, FixtureSource, Scratch};
use isodb_core::backfill::{backfill, read_checkpoint, BackfillOptions};
use isodb_core::store;
use isodb_core::types::Record;
use std::collections::BTreeMap;

const NOW: i64 = 1_700_000_000_000;

fn seed_parents(conn: &rusqlite::Connection, n: usize) -> Vec<String> {
    let keys: Vec<String> = (0..n).map(|i| format!("iso-{i:04}")).collect();
    let records: Vec<Record> = keys
        .iter()
        .map(|k| {
            let mut r = isotherm(k, "m1");
            r.set_local_updated_ms(1);
            r
        })
        .collect();
    store::upsert_many(conn, &records).expect("seed parents");
    keys
}

fn source_for(keys: &[String]) -> FixtureSource {
    FixtureSource {
        points: keys.iter().map(|k| (k.clone(), points(2, 1.0))).collect(),
        ..FixtureSource::default()
    }
}

#[test]
fn backfill_resumes_after_a_failed_item() {
    let scratch = Scratch::new();
    let conn = scratch.open();
    let keys = seed_parents(&conn, 1000);
    let mut source = source_for(&keys);
    // Item #500 fails on three runs before it comes back.
    source.failing_points = BTreeMap::from([("iso-0499".to_string(), 3)]);

    let first = backfill(
        &conn,
        &mut source,
        &BackfillOptions {
            limit: Some(500),
            batch_size: 50,
            ..BackfillOptions::default()
        },
        NOW,
    )
    .expect("first backfill");
    assert_eq!(first.candidates, 1000);
    assert_eq!(first.processed, 500);
    assert_eq!(first.fetched, 499);
    assert_eq!(first.failed, 1);
    assert_eq!(first.batches_committed, 10);
    assert_eq!(first.points_written, 998);

    let failed = store::get_fetch_state(&conn, "iso-0499").expect("state").expect("tracked");
    assert!(!failed.points_fetched);
    assert_eq!(failed.error_count, 1);
    assert!(failed.last_error.is_some());

    let checkpoint = read_checkpoint(&conn).expect("checkpoint").expect("written");
    assert_eq!(checkpoint.last_key, "iso-0499");
    assert_eq!(checkpoint.processed, 500);

    // Two more resume passes that only reach the failing parent.
    for attempt in 2..=3 {
        let retry = backfill(
            &conn,
            &mut source,
            &BackfillOptions {
                limit: Some(1),
                resume: true,
                batch_size: 50,
                ..BackfillOptions::default()
            },
            NOW + attempt,
        )
        .expect("retry pass");
        assert_eq!((retry.processed, retry.failed), (1, 1));
        let state = store::get_fetch_state(&conn, "iso-0499").expect("state").expect("tracked");
        assert_eq!(state.error_count, attempt);
        assert!(!state.points_fetched);
    }

    source.point_calls.clear();
    let second = backfill(
        &conn,
        &mut source,
        &BackfillOptions {
            resume: true,
            batch_size: 50,
            ..BackfillOptions::default()
        },
        NOW + 4,
    )
    .expect("resumed backfill");
    assert_eq!(second.skipped, 499);
    assert_eq!(second.processed, 501);
    assert_eq!(second.failed, 0);
    assert_eq!(source.point_calls.first().map(String::as_str), Some("iso-0499"));
    assert!(source.point_calls.iter().all(|k| k.as_str() >= "iso-0499"));

    let progress = store::backfill_progress(&conn).expect("progress");
    assert_eq!((progress.fetched, progress.failed, progress.pending), (1000, 0, 0));
    assert_eq!(store::count_all_child_rows(&conn).expect("rows"), 2000);
    let recovered = store::get_fetch_state(&conn, "iso-0499").expect("state").expect("tracked");
    assert!(recovered.points_fetched);
    assert_eq!(recovered.error_count, 3);
    assert!(recovered.last_error.is_none());
}

#[test]
fn rejected_points_fail_only_their_parent() {
    let scratch = Scratch::new();
    let conn = scratch.open();
    let keys = seed_parents(&conn, 4);
    let mut source = source_for(&keys);
    backfill(&conn, &mut source, &BackfillOptions::default(), NOW).expect("first");

    // A NaN pressure binds as NULL and trips the NOT NULL constraint.
    let mut bad = points(3, 9.0);
    bad[1].pressure = f64::NAN;
    source.points.insert("iso-0002".to_string(), bad);

    let report = backfill(
        &conn,
        &mut source,
        &BackfillOptions {
            force_refetch: true,
            ..BackfillOptions::default()
        },
        NOW + 1,
    )
    .expect("bad row must not abort the batch");
    assert_eq!(report.processed, 4);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.batches_committed, 1);

    // The parent keeps its earlier rows; siblings are committed.
    assert_eq!(store::count_child_rows(&conn, "iso-0002").expect("count"), 2);
    assert_eq!(store::count_all_child_rows(&conn).expect("rows"), 8);
    let state = store::get_fetch_state(&conn, "iso-0002").expect("state").expect("tracked");
    assert_eq!(state.error_count, 1);
    assert!(state
        .last_error
        .as_deref()
        .expect("last error")
        .contains("ISO_STORE_FAILED"));

    let checkpoint = read_checkpoint(&conn).expect("checkpoint").expect("written");
    assert_eq!(checkpoint.last_key, "iso-0003");
    assert_eq!(checkpoint.failed, 1);
}

#[test]
fn default_mode_skips_previously_failed_parents() {
    let scratch = Scratch::new();
    let conn = scratch.open();
    let keys = seed_parents(&conn, 5);
    let mut source = source_for(&keys);
    source.failing_points = BTreeMap::from([("iso-0001".to_string(), 5)]);

    let first = backfill(&conn, &mut source, &BackfillOptions::default(), NOW).expect("first");
    assert_eq!((first.fetched, first.failed), (4, 1));

    source.point_calls.clear();
    let second = backfill(&conn, &mut source, &BackfillOptions::default(), NOW + 1).expect("second");
    assert_eq!(second.candidates, 0);
    assert_eq!(second.skipped, 5);
    assert!(source.point_calls.is_empty());

    let third = backfill(
        &conn,
        &mut source,
        &BackfillOptions {
            resume: true,
            ..BackfillOptions::default()
        },
        NOW + 2,
    )
    .expect("third");
    assert_eq!((third.processed, third.failed), (1, 1));
    let state = store::get_fetch_state(&conn, "iso-0001").expect("state").expect("tracked");
    assert_eq!(state.error_count, 2);
}

#[test]
fn force_refetch_replaces_existing_points() {
    let scratch = Scratch::new();
    let conn = scratch.open();
    let keys = seed_parents(&conn, 3);
    let mut source = source_for(&keys);
    backfill(&conn, &mut source, &BackfillOptions::default(), NOW).expect("first");

    source.points.insert("iso-0000".to_string(), points(6, 3.0));
    let forced = backfill(
        &conn,
        &mut source,
        &BackfillOptions {
            force_refetch: true,
            batch_size: 2,
            ..BackfillOptions::default()
        },
        NOW + 1,
    )
    .expect("forced");
    assert_eq!(forced.processed, 3);
    assert_eq!(forced.batches_committed, 2);
    assert_eq!(store::count_child_rows(&conn, "iso-0000").expect("count"), 6);
    assert_eq!(store::count_all_child_rows(&conn).expect("rows"), 10);
}

#[test]
fn backfill_rejects_zero_batch_size() {
    let scratch = Scratch::new();
    let conn = scratch.open();
    let err = backfill(
        &conn,
        &mut FixtureSource::default(),
        &BackfillOptions {
            batch_size: 0,
            ..BackfillOptions::default()
        },
        NOW,
    )
    .expect_err("zero batch");
    assert_eq!(err.code, "ISO_BACKFILL_OPTIONS_INVALID");
}
