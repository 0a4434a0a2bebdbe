use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

struct Fixture {
    _dir: tempfile::TempDir,
    mirror: PathBuf,
    source: PathBuf,
}

impl Fixture {
    fn new(materials: usize) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mirror = dir.path().join("mirror");
        let source = dir.path().join("source");
        let fixture = Self {
            _dir: dir,
            mirror,
            source,
        };
        fixture.write_materials(materials);
        fixture.write(
            "isotherms.json",
            json!([
                { "filename": "iso-1", "adsorbent": { "hashkey": "M0" }, "adsorbates": [{ "InChIKey": "CO2KEY" }] },
                { "filename": "iso-2", "adsorbent": { "hashkey": "M1" } }
            ]),
        );
        fixture.write("gases.json", json!([{ "InChIKey": "CO2KEY", "name": "CO2" }]));
        fixture.write("biblio.json", json!([{ "DOI": "10.1/x", "title": "t", "year": 2020 }]));
        fixture.write(
            "isotherm/iso-1.json",
            json!({ "filename": "iso-1", "isotherm_data": [{ "pressure": 0.1 }, { "pressure": 0.2 }] }),
        );
        fixture.write(
            "isotherm/iso-2.json",
            json!({ "filename": "iso-2", "isotherm_data": [{ "pressure": 1.0 }] }),
        );
        fixture
    }

    fn write(&self, leaf: &str, value: Value) {
        let path = self.source.join(leaf);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, serde_json::to_vec(&value).expect("encode")).expect("write");
    }

    fn write_materials(&self, n: usize) {
        let items: Vec<Value> = (0..n)
            .map(|i| json!({ "hashkey": format!("M{i}"), "name": format!("material {i}") }))
            .collect();
        self.write("materials.json", Value::Array(items));
    }

    fn run(&self, args: &[&str]) -> Output {
        let mut full: Vec<String> = Vec::with_capacity(args.len() + 1);
        full.push(args[0].to_string());
        full.push(self.mirror.to_string_lossy().to_string());
        full.extend(args[1..].iter().map(|a| a.to_string()));
        Command::new(env!("CARGO_BIN_EXE_isodb"))
            .args(&full)
            .env("ISODB_SOURCE_URL", format!("file://{}", self.source.display()))
            .env("RUST_LOG", "warn")
            .output()
            .expect("run isodb")
    }
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout json")
}

fn backups(mirror: &Path) -> usize {
    std::fs::read_dir(mirror.join("backups"))
        .expect("backups dir")
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".sqlite"))
        .count()
}

#[test]
fn cli_init_sync_and_status() {
    let fx = Fixture::new(20);
    let init = stdout_json(&fx.run(&["init"]));
    assert_eq!(init["schema_version"], 2);
    assert!(fx.mirror.join("mirror.json").exists());

    let sync = stdout_json(&fx.run(&["sync"]));
    assert_eq!(sync["state"], "done");
    assert!(sync["snapshot"].is_object());

    let status = stdout_json(&fx.run(&["status"]));
    assert_eq!(status["counts"]["materials"], 20);
    assert_eq!(status["counts"]["isotherms"], 2);
    assert_eq!(status["counts"]["gases"], 1);
    assert_eq!(status["counts"]["bibliography"], 1);
    assert!(status["last_sync_ms"].is_i64());
    assert_eq!(status["backfill"]["pending"], 2);

    let again = stdout_json(&fx.run(&["sync"]));
    assert_eq!(again["state"], "done");
    assert!(again["snapshot"].is_null());
}

#[test]
fn cli_status_verbose_verifies_audit_chain() {
    let fx = Fixture::new(3);
    stdout_json(&fx.run(&["init"]));
    stdout_json(&fx.run(&["sync"]));

    let status = stdout_json(&fx.run(&["status", "-v"]));
    assert_eq!(status["audit_chain"]["ok"], true);
    assert_eq!(status["audit_chain"]["entries"], status["audit_entries"]);
    assert!(!status["recent_audit"].as_array().expect("recent").is_empty());
}

#[test]
fn cli_sync_blocks_mass_deletion_until_forced() {
    let fx = Fixture::new(20);
    stdout_json(&fx.run(&["init"]));
    stdout_json(&fx.run(&["sync"]));

    fx.write_materials(2);
    let blocked = fx.run(&["sync"]);
    assert_eq!(blocked.status.code(), Some(1));
    let report: Value = serde_json::from_slice(&blocked.stdout).expect("report json");
    assert_eq!(report["state"], "blocked");
    assert!(report["error"].as_str().expect("error").contains("18 of 20"));
    assert_eq!(stdout_json(&fx.run(&["status"]))["counts"]["materials"], 20);

    let forced = stdout_json(&fx.run(&["sync", "--force"]));
    assert_eq!(forced["state"], "done");
    assert_eq!(stdout_json(&fx.run(&["status"]))["counts"]["materials"], 2);
}

#[test]
fn cli_dry_run_prints_breakdown_and_leaves_store_untouched() {
    let fx = Fixture::new(5);
    stdout_json(&fx.run(&["init"]));

    let output = fx.run(&["sync", "--dry-run"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"dry_run_stop\""));
    assert!(stdout.contains("materials"));
    assert!(stdout.contains("new: M0"));
    assert_eq!(stdout_json(&fx.run(&["status"]))["counts"]["materials"], 0);
}

#[test]
fn cli_sync_tables_subset_and_unknown_table() {
    let fx = Fixture::new(5);
    stdout_json(&fx.run(&["init"]));

    let report = stdout_json(&fx.run(&["sync", "--tables", "gases,biblio"]));
    let names: Vec<&str> = report["collections"]
        .as_array()
        .expect("collections")
        .iter()
        .map(|c| c["collection"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["gases", "bibliography"]);
    let status = stdout_json(&fx.run(&["status"]));
    assert_eq!(status["counts"]["materials"], 0);
    assert_eq!(status["counts"]["gases"], 1);
    assert!(status["last_sync_ms"].is_null());
    assert!(status["collection_last_sync_ms"]["gases"].is_i64());
    assert!(status["collection_last_sync_ms"]["materials"].is_null());

    let bad = fx.run(&["sync", "--tables", "minerals"]);
    assert_eq!(bad.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&bad.stderr).contains("ISO_COLLECTION_UNKNOWN"));
}

#[test]
fn cli_backfill_fetches_points() {
    let fx = Fixture::new(2);
    stdout_json(&fx.run(&["init"]));
    stdout_json(&fx.run(&["sync"]));

    let report = stdout_json(&fx.run(&["backfill", "--batch-size", "1"]));
    assert_eq!(report["processed"], 2);
    assert_eq!(report["fetched"], 2);
    assert_eq!(report["points_written"], 3);
    assert_eq!(report["batches_committed"], 2);

    let status = stdout_json(&fx.run(&["status"]));
    assert_eq!(status["counts"]["isotherm_data_points"], 3);
    assert_eq!(status["backfill"]["fetched"], 2);
    assert_eq!(status["backfill_checkpoint"]["last_key"], "iso-2");

    let second = stdout_json(&fx.run(&["backfill"]));
    assert_eq!(second["processed"], 0);
}

#[test]
fn cli_backup_list_and_restore() {
    let fx = Fixture::new(4);
    stdout_json(&fx.run(&["init"]));
    stdout_json(&fx.run(&["sync"]));
    // Snapshot names have one-second resolution; keep the backup distinct
    // from the pre-apply snapshot taken by sync.
    std::thread::sleep(std::time::Duration::from_millis(1_100));

    let handle = stdout_json(&fx.run(&["backup"]));
    let name = handle["name"].as_str().expect("name").to_string();
    assert!(name.starts_with("isodb_") && name.ends_with(".sqlite"));
    assert!(backups(&fx.mirror) >= 1);

    let listed = stdout_json(&fx.run(&["list-backups"]));
    assert!(listed
        .as_array()
        .expect("list")
        .iter()
        .any(|h| h["name"] == name.as_str()));

    fx.write_materials(6);
    stdout_json(&fx.run(&["sync"]));
    assert_eq!(stdout_json(&fx.run(&["status"]))["counts"]["materials"], 6);

    let restore = fx.run(&["restore", &name]);
    assert!(restore.status.success(), "stderr: {}", String::from_utf8_lossy(&restore.stderr));
    assert_eq!(stdout_json(&fx.run(&["status"]))["counts"]["materials"], 4);
}

#[test]
fn cli_reports_missing_mirror() {
    let fx = Fixture::new(1);
    let output = fx.run(&["status"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("ISO_MIRROR_JSON_MISSING"));
}
