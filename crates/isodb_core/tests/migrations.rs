use isodb_core::db::{apply_migrations, open_db, schema_version, LATEST_SCHEMA_VERSION};

#[test]
fn migrations_apply_latest_schema() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("db/isodb.sqlite");

    let conn = open_db(&db_path).expect("open db");
    assert_eq!(schema_version(&conn).expect("schema version"), LATEST_SCHEMA_VERSION);

    let tables = [
        "materials",
        "isotherms",
        "gases",
        "bibliography",
        "isotherm_data_points",
        "isotherm_fetch_state",
        "audit_log",
        "sync_metadata",
    ];
    for table in tables {
        conn.query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
            [table],
            |row| row.get::<_, String>(0),
        )
        .expect("table must exist");
    }
}

#[test]
fn migrations_are_idempotent_on_reopen() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("isodb.sqlite");
    drop(open_db(&db_path).expect("first open"));
    let conn = open_db(&db_path).expect("second open");
    apply_migrations(&conn).expect("re-apply");
    assert_eq!(schema_version(&conn).expect("schema version"), LATEST_SCHEMA_VERSION);
}

#[test]
fn migrations_reject_newer_schema() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("isodb.sqlite");
    let conn = open_db(&db_path).expect("open db");
    conn.pragma_update(None, "user_version", LATEST_SCHEMA_VERSION + 1)
        .expect("bump version");
    let err = apply_migrations(&conn).expect_err("newer schema must fail");
    assert_eq!(err.code, "ISO_DB_SCHEMA_INCOMPATIBLE");
}

#[test]
fn foreign_keys_are_enforced() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("isodb.sqlite")).expect("open db");
    let orphan = conn.execute(
        "INSERT INTO isotherm_data_points(isotherm_filename, point_index, pressure) VALUES('missing', 0, 1.0)",
        [],
    );
    assert!(orphan.is_err());
}
