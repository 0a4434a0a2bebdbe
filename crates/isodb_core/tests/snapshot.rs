mod common;

use common::{material, Scratch};
use isodb_core::store;
use isodb_core::types::Collection;

// 2024-03-05T10:20:30Z
const T0: i64 = 1_709_634_030_000;

fn materials_in(path: &std::path::Path) -> usize {
    let conn = rusqlite::Connection::open(path).expect("open snapshot");
    store::get_count(&conn, Collection::Materials).expect("count")
}

fn seed_materials(conn: &rusqlite::Connection, keys: &[&str]) {
    let records: Vec<_> = keys
        .iter()
        .map(|k| {
            let mut m = material(k, "seeded");
            m.set_local_updated_ms(1);
            m
        })
        .collect();
    store::upsert_many(conn, &records).expect("seed");
}

fn enable_wal(conn: &rusqlite::Connection) {
    let mode: String = conn
        .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
        .expect("journal_mode");
    assert_eq!(mode, "wal");
}

#[test]
fn snapshot_name_is_sortable_utc_stamp() {
    let scratch = Scratch::new();
    let name = scratch.snapshots().snapshot_name(T0).expect("name");
    assert_eq!(name, "isodb_20240305_102030.sqlite");
}

#[test]
fn snapshot_and_restore_round_trip() {
    let scratch = Scratch::new();
    let manager = scratch.snapshots();
    {
        let conn = scratch.open();
        let mut a = material("A", "alpha");
        a.set_local_updated_ms(1);
        store::upsert_many(&conn, &[a]).expect("seed");
    }

    let handle = manager.snapshot(T0).expect("snapshot");
    assert!(handle.path.exists());
    assert_eq!(materials_in(&handle.path), 1);
    let leftovers: Vec<_> = std::fs::read_dir(&scratch.backups_dir)
        .expect("backups dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty());

    {
        let conn = scratch.open();
        store::delete_many(&conn, Collection::Materials, &["A".to_string()]).expect("delete");
        assert_eq!(store::get_count(&conn, Collection::Materials).expect("count"), 0);
    }

    manager.restore(&handle).expect("restore");
    let conn = scratch.open();
    assert_eq!(store::get_count(&conn, Collection::Materials).expect("count"), 1);
}

#[test]
fn snapshot_same_second_reuses_capture() {
    let scratch = Scratch::new();
    drop(scratch.open());
    let manager = scratch.snapshots();
    let first = manager.snapshot(T0).expect("first");
    let second = manager.snapshot(T0 + 400).expect("second");
    assert_eq!(first.path, second.path);
    assert_eq!(manager.list().expect("list").len(), 1);
}

#[test]
fn list_is_newest_first_and_ignores_foreign_files() {
    let scratch = Scratch::new();
    drop(scratch.open());
    let manager = scratch.snapshots();
    manager.snapshot(T0).expect("older");
    manager.snapshot(T0 + 86_400_000).expect("newer");
    std::fs::write(scratch.backups_dir.join("notes.txt"), b"hello").expect("foreign file");

    let names: Vec<String> = manager.list().expect("list").into_iter().map(|h| h.name).collect();
    assert_eq!(
        names,
        vec![
            "isodb_20240306_102030.sqlite".to_string(),
            "isodb_20240305_102030.sqlite".to_string()
        ]
    );
}

#[test]
fn restore_rejects_non_sqlite_file() {
    let scratch = Scratch::new();
    drop(scratch.open());
    let manager = scratch.snapshots();
    let bogus = scratch.root().join("bogus.sqlite");
    std::fs::write(&bogus, b"definitely not sqlite").expect("write bogus");
    let handle = manager.resolve(bogus.to_str().expect("utf8 path")).expect("resolve");
    let err = manager.restore(&handle).expect_err("must reject");
    assert_eq!(err.code, "ISO_SNAPSHOT_INVALID");
}

#[test]
fn snapshot_requires_existing_store() {
    let scratch = Scratch::new();
    let err = scratch.snapshots().snapshot(T0).expect_err("no store yet");
    assert_eq!(err.code, "ISO_SNAPSHOT_SOURCE_MISSING");
}

#[test]
fn resolve_unknown_snapshot_fails() {
    let scratch = Scratch::new();
    let err = scratch.snapshots().resolve("isodb_19990101_000000.sqlite").expect_err("missing");
    assert_eq!(err.code, "ISO_SNAPSHOT_NOT_FOUND");
}

#[test]
fn snapshot_includes_pages_still_in_the_wal() {
    let scratch = Scratch::new();
    let manager = scratch.snapshots();
    let conn = scratch.open();
    enable_wal(&conn);
    seed_materials(&conn, &["A", "B"]);
    assert!(scratch.db_path.with_file_name("isodb.sqlite-wal").exists());

    // The writer stays open, so nothing has been checkpointed yet.
    let handle = manager.snapshot(T0).expect("snapshot");
    assert_eq!(store::get_count(&conn, Collection::Materials).expect("live"), 2);
    assert_eq!(materials_in(&handle.path), 2);
}

#[test]
fn restore_over_a_wal_store() {
    let scratch = Scratch::new();
    let manager = scratch.snapshots();
    let handle = {
        let conn = scratch.open();
        enable_wal(&conn);
        seed_materials(&conn, &["A", "B", "C"]);
        let handle = manager.snapshot(T0).expect("snapshot");
        store::delete_many(&conn, Collection::Materials, &["A".to_string(), "B".to_string()])
            .expect("delete");
        assert_eq!(store::get_count(&conn, Collection::Materials).expect("count"), 1);
        handle
    };

    manager.restore(&handle).expect("restore");
    let conn = scratch.open();
    assert_eq!(store::get_count(&conn, Collection::Materials).expect("count"), 3);
}
