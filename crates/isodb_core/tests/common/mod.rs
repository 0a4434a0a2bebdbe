#![allow(dead_code)]

use isodb_core::app_error::{AppError, AppResult};
use isodb_core::db::open_db;
use isodb_core::snapshot::SnapshotManager;
use isodb_core::source::{FetchedCollection, RecordSource};
use isodb_core::types::{
    BibliographyRecord, Collection, GasRecord, IsothermRecord, MaterialRecord, MeasurementPoint,
    Record, SpeciesAdsorption,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub fn material(id: &str, name: &str) -> Record {
    let mut record = Record::Material(MaterialRecord {
        material_id: id.to_string(),
        name: name.to_string(),
        synonyms: None,
        formula: None,
        category: None,
        isotherm_count: 0,
        last_updated: None,
        fingerprint: String::new(),
        local_updated_ms: None,
    });
    record.refresh_fingerprint().expect("fingerprint material");
    record
}

pub fn isotherm(filename: &str, adsorbent_id: &str) -> Record {
    let mut record = Record::Isotherm(IsothermRecord {
        filename: filename.to_string(),
        doi: Some("10.1000/demo".to_string()),
        adsorbent_id: Some(adsorbent_id.to_string()),
        adsorbent_name: Some(format!("adsorbent {adsorbent_id}")),
        adsorbates: vec!["CURLTUGMZLYLDI-UHFFFAOYSA-N".to_string()],
        category: Some("exp".to_string()),
        temperature: Some(298.15),
        tabular_data: true,
        isotherm_type: Some("absolute".to_string()),
        pressure_units: Some("bar".to_string()),
        adsorption_units: Some("mmol/g".to_string()),
        date: Some("2019-01-01".to_string()),
        fingerprint: String::new(),
        local_updated_ms: None,
    });
    record.refresh_fingerprint().expect("fingerprint isotherm");
    record
}

pub fn gas(inchikey: &str, name: &str) -> Record {
    let mut record = Record::Gas(GasRecord {
        inchikey: inchikey.to_string(),
        name: name.to_string(),
        synonyms: None,
        formula: None,
        fingerprint: String::new(),
        local_updated_ms: None,
    });
    record.refresh_fingerprint().expect("fingerprint gas");
    record
}

pub fn bibliography(doi: &str, title: &str) -> Record {
    let mut record = Record::Bibliography(BibliographyRecord {
        doi: doi.to_string(),
        title: Some(title.to_string()),
        journal: Some("J. Demo".to_string()),
        year: Some(2020),
        authors: vec!["A. Author".to_string()],
        categories: vec!["exp".to_string()],
        adsorbents: Vec::new(),
        adsorbates: Vec::new(),
        temperatures: vec![298.0],
        pressures: vec![1.0],
        fingerprint: String::new(),
        local_updated_ms: None,
    });
    record.refresh_fingerprint().expect("fingerprint bibliography");
    record
}

pub fn renamed(record: &Record, name: &str) -> Record {
    let mut record = record.clone();
    match &mut record {
        Record::Material(r) => r.name = name.to_string(),
        Record::Gas(r) => r.name = name.to_string(),
        Record::Isotherm(r) => r.adsorbent_name = Some(name.to_string()),
        Record::Bibliography(r) => r.title = Some(name.to_string()),
    }
    record.refresh_fingerprint().expect("refresh fingerprint");
    record
}

pub fn points(n: usize, scale: f64) -> Vec<MeasurementPoint> {
    (0..n)
        .map(|i| MeasurementPoint {
            pressure: (i + 1) as f64 * 0.5,
            total_adsorption: Some((i + 1) as f64 * scale),
            species: vec![SpeciesAdsorption {
                inchikey: "CURLTUGMZLYLDI-UHFFFAOYSA-N".to_string(),
                adsorption: Some((i + 1) as f64 * scale),
                composition: Some(1.0),
            }],
        })
        .collect()
}

/// In-memory upstream with per-call failure injection.
#[derive(Debug, Default)]
pub struct FixtureSource {
    pub collections: BTreeMap<Collection, Vec<Record>>,
    /// Child rows delivered together with the isotherm listing.
    pub listing_points: Option<BTreeMap<String, Vec<MeasurementPoint>>>,
    pub failing_collections: BTreeSet<Collection>,
    /// `None` makes the isotherm-count endpoint fail.
    pub counts: Option<BTreeMap<String, i64>>,
    pub points: BTreeMap<String, Vec<MeasurementPoint>>,
    /// Remaining failures per isotherm before its points fetch succeeds.
    pub failing_points: BTreeMap<String, usize>,
    pub point_calls: Vec<String>,
}

impl FixtureSource {
    pub fn with(mut self, collection: Collection, records: Vec<Record>) -> Self {
        self.collections.insert(collection, records);
        self
    }

    pub fn with_counts(mut self, counts: &[(&str, i64)]) -> Self {
        self.counts = Some(counts.iter().map(|(k, v)| (k.to_string(), *v)).collect());
        self
    }
}

fn fixture_error(message: &str, key: &str) -> AppError {
    AppError::new(
        "ISO_FETCH_UNAVAILABLE",
        "fetch",
        message,
        true,
        serde_json::json!({ "key": key }),
    )
}

impl RecordSource for FixtureSource {
    fn describe(&self) -> String {
        "fixture".to_string()
    }

    fn fetch_collection(&mut self, collection: Collection) -> AppResult<FetchedCollection> {
        if self.failing_collections.contains(&collection) {
            return Err(fixture_error("fixture outage", collection.as_str()));
        }
        let records = self.collections.get(&collection).cloned().unwrap_or_default();
        let mut fetched = FetchedCollection::new(collection, records);
        if collection == Collection::Isotherms {
            fetched.child_rows = self.listing_points.clone();
        }
        Ok(fetched)
    }

    fn fetch_isotherm_counts(&mut self) -> AppResult<BTreeMap<String, i64>> {
        self.counts
            .clone()
            .ok_or_else(|| fixture_error("isotherm listing unavailable", "isotherms"))
    }

    fn fetch_isotherm_points(&mut self, filename: &str) -> AppResult<Vec<MeasurementPoint>> {
        self.point_calls.push(filename.to_string());
        if let Some(remaining) = self.failing_points.get_mut(filename) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(fixture_error("points endpoint timed out", filename));
            }
        }
        Ok(self.points.get(filename).cloned().unwrap_or_default())
    }
}

pub struct Scratch {
    pub _dir: tempfile::TempDir,
    pub db_path: PathBuf,
    pub backups_dir: PathBuf,
}

impl Scratch {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("db/isodb.sqlite");
        let backups_dir = dir.path().join("backups");
        Self {
            _dir: dir,
            db_path,
            backups_dir,
        }
    }

    pub fn root(&self) -> &Path {
        self._dir.path()
    }

    pub fn open(&self) -> rusqlite::Connection {
        open_db(&self.db_path).expect("open db")
    }

    pub fn snapshots(&self) -> SnapshotManager {
        SnapshotManager::new(self.db_path.clone(), self.backups_dir.clone())
    }
}
