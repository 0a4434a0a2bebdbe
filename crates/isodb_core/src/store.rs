use crate::app_error::{AppError, AppResult};
use crate::types::{
    BibliographyRecord, Collection, GasRecord, IsothermRecord, MaterialRecord, MeasurementPoint,
    Record, SpeciesAdsorption,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

pub const META_LAST_SYNC: &str = "last_sync";
pub const META_BACKFILL_CHECKPOINT: &str = "backfill_checkpoint";

fn store_error(message: &str, details: serde_json::Value) -> AppError {
    AppError::new("ISO_STORE_FAILED", "store", message, false, details)
}

fn sqlite_error(message: &str, e: rusqlite::Error, collection: &str) -> AppError {
    store_error(
        message,
        serde_json::json!({ "error": e.to_string(), "collection": collection }),
    )
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_text<T: Serialize + ?Sized>(value: &T, key: &str) -> AppResult<String> {
    serde_json::to_string(value).map_err(|e| {
        store_error(
            "failed encoding json column",
            serde_json::json!({ "error": e.to_string(), "key": key }),
        )
    })
}

fn select_sql(collection: Collection) -> &'static str {
    match collection {
        Collection::Materials => {
            "SELECT material_id, name, synonyms, formula, category, isotherm_count, last_updated,
                    fingerprint, local_updated_ms
             FROM materials ORDER BY material_id"
        }
        Collection::Isotherms => {
            "SELECT filename, doi, adsorbent_id, adsorbent_name, adsorbates, category, temperature,
                    tabular_data, isotherm_type, pressure_units, adsorption_units, date,
                    fingerprint, local_updated_ms
             FROM isotherms ORDER BY filename"
        }
        Collection::Gases => {
            "SELECT inchikey, name, synonyms, formula, fingerprint, local_updated_ms
             FROM gases ORDER BY inchikey"
        }
        Collection::Bibliography => {
            "SELECT doi, title, journal, year, authors, categories, adsorbents, adsorbates,
                    temperatures, pressures, fingerprint, local_updated_ms
             FROM bibliography ORDER BY doi"
        }
    }
}

fn decode_row(collection: Collection, row: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(match collection {
        Collection::Materials => Record::Material(MaterialRecord {
            material_id: row.get(0)?,
            name: row.get(1)?,
            synonyms: row.get(2)?,
            formula: row.get(3)?,
            category: row.get(4)?,
            isotherm_count: row.get(5)?,
            last_updated: row.get(6)?,
            fingerprint: row.get(7)?,
            local_updated_ms: row.get(8)?,
        }),
        Collection::Isotherms => Record::Isotherm(IsothermRecord {
            filename: row.get(0)?,
            doi: row.get(1)?,
            adsorbent_id: row.get(2)?,
            adsorbent_name: row.get(3)?,
            adsorbates: json_column(row, 4)?,
            category: row.get(5)?,
            temperature: row.get(6)?,
            tabular_data: row.get::<_, i64>(7)? != 0,
            isotherm_type: row.get(8)?,
            pressure_units: row.get(9)?,
            adsorption_units: row.get(10)?,
            date: row.get(11)?,
            fingerprint: row.get(12)?,
            local_updated_ms: row.get(13)?,
        }),
        Collection::Gases => Record::Gas(GasRecord {
            inchikey: row.get(0)?,
            name: row.get(1)?,
            synonyms: row.get(2)?,
            formula: row.get(3)?,
            fingerprint: row.get(4)?,
            local_updated_ms: row.get(5)?,
        }),
        Collection::Bibliography => Record::Bibliography(BibliographyRecord {
            doi: row.get(0)?,
            title: row.get(1)?,
            journal: row.get(2)?,
            year: row.get(3)?,
            authors: json_column(row, 4)?,
            categories: json_column(row, 5)?,
            adsorbents: json_column(row, 6)?,
            adsorbates: json_column(row, 7)?,
            temperatures: json_column(row, 8)?,
            pressures: json_column(row, 9)?,
            fingerprint: row.get(10)?,
            local_updated_ms: row.get(11)?,
        }),
    })
}

/// Identity key → fingerprint for every local record of `collection`.
pub fn get_checksums(conn: &Connection, collection: Collection) -> AppResult<BTreeMap<String, String>> {
    let sql = format!(
        "SELECT {}, fingerprint FROM {}",
        collection.key_column(),
        collection.table()
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| sqlite_error("failed preparing checksum query", e, collection.as_str()))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| sqlite_error("failed querying checksums", e, collection.as_str()))?;

    let mut out = BTreeMap::new();
    for row in rows {
        let (key, fingerprint) =
            row.map_err(|e| sqlite_error("failed decoding checksum row", e, collection.as_str()))?;
        out.insert(key, fingerprint);
    }
    Ok(out)
}

/// Every local record of `collection`, ordered by identity key.
pub fn get_all(conn: &Connection, collection: Collection) -> AppResult<Vec<Record>> {
    let mut stmt = conn
        .prepare(select_sql(collection))
        .map_err(|e| sqlite_error("failed preparing record query", e, collection.as_str()))?;
    let rows = stmt
        .query_map([], |row| decode_row(collection, row))
        .map_err(|e| sqlite_error("failed querying records", e, collection.as_str()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| sqlite_error("failed decoding record row", e, collection.as_str()))
}

pub fn get_all_by_key(conn: &Connection, collection: Collection) -> AppResult<BTreeMap<String, Record>> {
    Ok(get_all(conn, collection)?
        .into_iter()
        .map(|r| (r.key().to_string(), r))
        .collect())
}

pub fn get_count(conn: &Connection, collection: Collection) -> AppResult<usize> {
    let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
    let count: i64 = conn
        .query_row(&sql, [], |row| row.get(0))
        .map_err(|e| sqlite_error("failed counting records", e, collection.as_str()))?;
    Ok(count as usize)
}

/// Inserts or overwrites each record in its own collection table. The caller
/// owns the transaction.
pub fn upsert_many(conn: &Connection, records: &[Record]) -> AppResult<()> {
    for record in records {
        upsert_one(conn, record)?;
    }
    Ok(())
}

fn upsert_one(conn: &Connection, record: &Record) -> AppResult<()> {
    let collection = record.collection();
    let local_updated_ms = record.local_updated_ms().ok_or_else(|| {
        store_error(
            "record has no local_updated_ms stamp",
            serde_json::json!({ "collection": collection.as_str(), "key": record.key() }),
        )
    })?;

    let result = match record {
        Record::Material(r) => conn
            .prepare_cached(
                "INSERT INTO materials(material_id, name, synonyms, formula, category, isotherm_count,
                                       last_updated, local_updated_ms, fingerprint)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(material_id) DO UPDATE SET
                   name=excluded.name, synonyms=excluded.synonyms, formula=excluded.formula,
                   category=excluded.category, isotherm_count=excluded.isotherm_count,
                   last_updated=excluded.last_updated, local_updated_ms=excluded.local_updated_ms,
                   fingerprint=excluded.fingerprint",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    r.material_id,
                    r.name,
                    r.synonyms,
                    r.formula,
                    r.category,
                    r.isotherm_count,
                    r.last_updated,
                    local_updated_ms,
                    r.fingerprint
                ])
            }),
        Record::Isotherm(r) => {
            let adsorbates = json_text(&r.adsorbates, &r.filename)?;
            conn.prepare_cached(
                "INSERT INTO isotherms(filename, doi, adsorbent_id, adsorbent_name, adsorbates, category,
                                       temperature, tabular_data, isotherm_type, pressure_units,
                                       adsorption_units, date, local_updated_ms, fingerprint)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(filename) DO UPDATE SET
                   doi=excluded.doi, adsorbent_id=excluded.adsorbent_id,
                   adsorbent_name=excluded.adsorbent_name, adsorbates=excluded.adsorbates,
                   category=excluded.category, temperature=excluded.temperature,
                   tabular_data=excluded.tabular_data, isotherm_type=excluded.isotherm_type,
                   pressure_units=excluded.pressure_units, adsorption_units=excluded.adsorption_units,
                   date=excluded.date, local_updated_ms=excluded.local_updated_ms,
                   fingerprint=excluded.fingerprint",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    r.filename,
                    r.doi,
                    r.adsorbent_id,
                    r.adsorbent_name,
                    adsorbates,
                    r.category,
                    r.temperature,
                    r.tabular_data as i64,
                    r.isotherm_type,
                    r.pressure_units,
                    r.adsorption_units,
                    r.date,
                    local_updated_ms,
                    r.fingerprint
                ])
            })
        }
        Record::Gas(r) => conn
            .prepare_cached(
                "INSERT INTO gases(inchikey, name, synonyms, formula, local_updated_ms, fingerprint)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(inchikey) DO UPDATE SET
                   name=excluded.name, synonyms=excluded.synonyms, formula=excluded.formula,
                   local_updated_ms=excluded.local_updated_ms, fingerprint=excluded.fingerprint",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    r.inchikey,
                    r.name,
                    r.synonyms,
                    r.formula,
                    local_updated_ms,
                    r.fingerprint
                ])
            }),
        Record::Bibliography(r) => {
            let authors = json_text(&r.authors, &r.doi)?;
            let categories = json_text(&r.categories, &r.doi)?;
            let adsorbents = json_text(&r.adsorbents, &r.doi)?;
            let adsorbates = json_text(&r.adsorbates, &r.doi)?;
            let temperatures = json_text(&r.temperatures, &r.doi)?;
            let pressures = json_text(&r.pressures, &r.doi)?;
            conn.prepare_cached(
                "INSERT INTO bibliography(doi, title, journal, year, authors, categories, adsorbents,
                                          adsorbates, temperatures, pressures, local_updated_ms, fingerprint)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(doi) DO UPDATE SET
                   title=excluded.title, journal=excluded.journal, year=excluded.year,
                   authors=excluded.authors, categories=excluded.categories,
                   adsorbents=excluded.adsorbents, adsorbates=excluded.adsorbates,
                   temperatures=excluded.temperatures, pressures=excluded.pressures,
                   local_updated_ms=excluded.local_updated_ms, fingerprint=excluded.fingerprint",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    r.doi,
                    r.title,
                    r.journal,
                    r.year,
                    authors,
                    categories,
                    adsorbents,
                    adsorbates,
                    temperatures,
                    pressures,
                    local_updated_ms,
                    r.fingerprint
                ])
            })
        }
    };

    result.map(|_| ()).map_err(|e| {
        store_error(
            "failed upserting record",
            serde_json::json!({
                "error": e.to_string(),
                "collection": collection.as_str(),
                "key": record.key()
            }),
        )
    })
}

pub fn delete_many(conn: &Connection, collection: Collection, keys: &[String]) -> AppResult<()> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        collection.table(),
        collection.key_column()
    );
    let mut stmt = conn
        .prepare_cached(&sql)
        .map_err(|e| sqlite_error("failed preparing delete", e, collection.as_str()))?;
    for key in keys {
        stmt.execute([key]).map_err(|e| {
            store_error(
                "failed deleting record",
                serde_json::json!({
                    "error": e.to_string(),
                    "collection": collection.as_str(),
                    "key": key
                }),
            )
        })?;
    }
    Ok(())
}

pub fn delete_child_rows(conn: &Connection, parent_key: &str) -> AppResult<usize> {
    conn.prepare_cached("DELETE FROM isotherm_data_points WHERE isotherm_filename = ?1")
        .and_then(|mut stmt| stmt.execute([parent_key]))
        .map_err(|e| {
            store_error(
                "failed deleting measurement points",
                serde_json::json!({ "error": e.to_string(), "parent": parent_key }),
            )
        })
}

/// Deletes every existing child row of `parent_key`, then inserts `points`.
pub fn replace_child_rows(
    conn: &Connection,
    parent_key: &str,
    points: &[MeasurementPoint],
) -> AppResult<usize> {
    delete_child_rows(conn, parent_key)?;
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO isotherm_data_points(isotherm_filename, point_index, pressure, total_adsorption, species_data)
             VALUES(?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(|e| sqlite_error("failed preparing measurement point insert", e, "isotherms"))?;
    for (idx, point) in points.iter().enumerate() {
        let species = json_text(&point.species, parent_key)?;
        stmt.execute(params![
            parent_key,
            idx as i64,
            point.pressure,
            point.total_adsorption,
            species
        ])
        .map_err(|e| {
            store_error(
                "failed inserting measurement point",
                serde_json::json!({
                    "error": e.to_string(),
                    "parent": parent_key,
                    "point_index": idx
                }),
            )
        })?;
    }
    Ok(points.len())
}

pub fn get_child_rows(conn: &Connection, parent_key: &str) -> AppResult<Vec<MeasurementPoint>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT pressure, total_adsorption, species_data FROM isotherm_data_points
             WHERE isotherm_filename = ?1 ORDER BY point_index, id",
        )
        .map_err(|e| sqlite_error("failed preparing measurement point query", e, "isotherms"))?;
    let rows = stmt
        .query_map([parent_key], |row| {
            Ok(MeasurementPoint {
                pressure: row.get(0)?,
                total_adsorption: row.get(1)?,
                species: json_column::<Vec<SpeciesAdsorption>>(row, 2)?,
            })
        })
        .map_err(|e| sqlite_error("failed querying measurement points", e, "isotherms"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| sqlite_error("failed decoding measurement point", e, "isotherms"))
}

pub fn count_child_rows(conn: &Connection, parent_key: &str) -> AppResult<usize> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM isotherm_data_points WHERE isotherm_filename = ?1",
            [parent_key],
            |row| row.get(0),
        )
        .map_err(|e| sqlite_error("failed counting measurement points", e, "isotherms"))?;
    Ok(count as usize)
}

pub fn count_all_child_rows(conn: &Connection) -> AppResult<usize> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM isotherm_data_points", [], |row| row.get(0))
        .map_err(|e| sqlite_error("failed counting measurement points", e, "isotherms"))?;
    Ok(count as usize)
}

pub fn read_meta(conn: &Connection, key: &str) -> AppResult<Option<String>> {
    conn.query_row(
        "SELECT meta_value FROM sync_metadata WHERE meta_key = ?1",
        [key],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| {
        store_error(
            "failed reading sync metadata",
            serde_json::json!({ "error": e.to_string(), "key": key }),
        )
    })
}

pub fn write_meta(conn: &Connection, key: &str, value: &str, now_ms: i64) -> AppResult<()> {
    conn.execute(
        "INSERT INTO sync_metadata(meta_key, meta_value, updated_at_ms)
         VALUES(?1, ?2, ?3)
         ON CONFLICT(meta_key) DO UPDATE SET meta_value=excluded.meta_value, updated_at_ms=excluded.updated_at_ms",
        params![key, value, now_ms],
    )
    .map_err(|e| {
        store_error(
            "failed writing sync metadata",
            serde_json::json!({ "error": e.to_string(), "key": key }),
        )
    })?;
    Ok(())
}

pub fn set_last_sync_marker(conn: &Connection, now_ms: i64) -> AppResult<()> {
    write_meta(conn, META_LAST_SYNC, &now_ms.to_string(), now_ms)
}

pub fn get_last_sync_marker(conn: &Connection) -> AppResult<Option<i64>> {
    read_marker(conn, META_LAST_SYNC)
}

fn collection_sync_key(collection: Collection) -> String {
    format!("{META_LAST_SYNC}.{}", collection.as_str())
}

/// Per-collection marker, written by every successful run that selected it.
pub fn set_collection_sync_marker(conn: &Connection, collection: Collection, now_ms: i64) -> AppResult<()> {
    write_meta(conn, &collection_sync_key(collection), &now_ms.to_string(), now_ms)
}

pub fn get_collection_sync_marker(conn: &Connection, collection: Collection) -> AppResult<Option<i64>> {
    read_marker(conn, &collection_sync_key(collection))
}

fn read_marker(conn: &Connection, key: &str) -> AppResult<Option<i64>> {
    match read_meta(conn, key)? {
        None => Ok(None),
        Some(raw) => raw.parse::<i64>().map(Some).map_err(|e| {
            store_error(
                "sync marker is not an integer timestamp",
                serde_json::json!({ "error": e.to_string(), "key": key, "value": raw }),
            )
        }),
    }
}

/// Backfill tracking for one isotherm parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchState {
    pub filename: String,
    pub points_fetched: bool,
    pub data_point_count: i64,
    pub fetched_at_ms: Option<i64>,
    pub error_count: i64,
    pub last_error: Option<String>,
}

pub fn get_fetch_state(conn: &Connection, filename: &str) -> AppResult<Option<FetchState>> {
    conn.query_row(
        "SELECT filename, points_fetched, data_point_count, fetched_at_ms, error_count, last_error
         FROM isotherm_fetch_state WHERE filename = ?1",
        [filename],
        |row| {
            Ok(FetchState {
                filename: row.get(0)?,
                points_fetched: row.get::<_, i64>(1)? != 0,
                data_point_count: row.get(2)?,
                fetched_at_ms: row.get(3)?,
                error_count: row.get(4)?,
                last_error: row.get(5)?,
            })
        },
    )
    .optional()
    .map_err(|e| {
        store_error(
            "failed reading isotherm fetch state",
            serde_json::json!({ "error": e.to_string(), "filename": filename }),
        )
    })
}

pub fn mark_points_fetched(conn: &Connection, filename: &str, count: usize, now_ms: i64) -> AppResult<()> {
    conn.prepare_cached(
        "INSERT INTO isotherm_fetch_state(filename, points_fetched, data_point_count, fetched_at_ms,
                                          error_count, last_error, updated_at_ms)
         VALUES(?1, 1, ?2, ?3, 0, NULL, ?3)
         ON CONFLICT(filename) DO UPDATE SET
           points_fetched=1, data_point_count=excluded.data_point_count,
           fetched_at_ms=excluded.fetched_at_ms, last_error=NULL, updated_at_ms=excluded.updated_at_ms",
    )
    .and_then(|mut stmt| stmt.execute(params![filename, count as i64, now_ms]))
    .map(|_| ())
    .map_err(|e| {
        store_error(
            "failed marking measurement points fetched",
            serde_json::json!({ "error": e.to_string(), "filename": filename }),
        )
    })
}

/// Resets a parent to "never attempted" so the next backfill picks it up.
pub fn mark_points_pending(conn: &Connection, filename: &str, now_ms: i64) -> AppResult<()> {
    conn.prepare_cached(
        "INSERT INTO isotherm_fetch_state(filename, points_fetched, data_point_count, fetched_at_ms,
                                          error_count, last_error, updated_at_ms)
         VALUES(?1, 0, 0, NULL, 0, NULL, ?2)
         ON CONFLICT(filename) DO UPDATE SET
           points_fetched=0, data_point_count=0, fetched_at_ms=NULL, error_count=0,
           last_error=NULL, updated_at_ms=excluded.updated_at_ms",
    )
    .and_then(|mut stmt| stmt.execute(params![filename, now_ms]))
    .map(|_| ())
    .map_err(|e| {
        store_error(
            "failed resetting isotherm fetch state",
            serde_json::json!({ "error": e.to_string(), "filename": filename }),
        )
    })
}

pub fn record_points_failure(conn: &Connection, filename: &str, error: &str, now_ms: i64) -> AppResult<()> {
    conn.prepare_cached(
        "INSERT INTO isotherm_fetch_state(filename, points_fetched, data_point_count, fetched_at_ms,
                                          error_count, last_error, updated_at_ms)
         VALUES(?1, 0, 0, NULL, 1, ?2, ?3)
         ON CONFLICT(filename) DO UPDATE SET
           error_count=error_count + 1, last_error=excluded.last_error,
           updated_at_ms=excluded.updated_at_ms",
    )
    .and_then(|mut stmt| stmt.execute(params![filename, error, now_ms]))
    .map(|_| ())
    .map_err(|e| {
        store_error(
            "failed recording measurement point failure",
            serde_json::json!({ "error": e.to_string(), "filename": filename }),
        )
    })
}

pub fn delete_fetch_state(conn: &Connection, filename: &str) -> AppResult<()> {
    conn.prepare_cached("DELETE FROM isotherm_fetch_state WHERE filename = ?1")
        .and_then(|mut stmt| stmt.execute([filename]))
        .map(|_| ())
        .map_err(|e| {
            store_error(
                "failed deleting isotherm fetch state",
                serde_json::json!({ "error": e.to_string(), "filename": filename }),
            )
        })
}

/// Which parents a backfill pass should visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateScope {
    /// Never attempted: not fetched and no recorded failure.
    Pending,
    /// Pending plus parents whose earlier attempts failed.
    Unfetched,
    /// Every parent.
    All,
}

pub fn backfill_candidates(conn: &Connection, scope: CandidateScope) -> AppResult<Vec<String>> {
    let filter = match scope {
        CandidateScope::Pending => {
            "WHERE COALESCE(s.points_fetched, 0) = 0 AND COALESCE(s.error_count, 0) = 0"
        }
        CandidateScope::Unfetched => "WHERE COALESCE(s.points_fetched, 0) = 0",
        CandidateScope::All => "",
    };
    let sql = format!(
        "SELECT i.filename FROM isotherms i
         LEFT JOIN isotherm_fetch_state s ON s.filename = i.filename
         {filter}
         ORDER BY i.filename"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| sqlite_error("failed preparing backfill candidate query", e, "isotherms"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| sqlite_error("failed querying backfill candidates", e, "isotherms"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| sqlite_error("failed decoding backfill candidate", e, "isotherms"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillProgress {
    pub parents: usize,
    pub fetched: usize,
    pub failed: usize,
    pub pending: usize,
}

pub fn backfill_progress(conn: &Connection) -> AppResult<BackfillProgress> {
    conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN COALESCE(s.points_fetched, 0) = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN COALESCE(s.points_fetched, 0) = 0 AND COALESCE(s.error_count, 0) > 0 THEN 1 ELSE 0 END), 0)
         FROM isotherms i
         LEFT JOIN isotherm_fetch_state s ON s.filename = i.filename",
        [],
        |row| {
            let parents: i64 = row.get(0)?;
            let fetched: i64 = row.get(1)?;
            let failed: i64 = row.get(2)?;
            Ok(BackfillProgress {
                parents: parents as usize,
                fetched: fetched as usize,
                failed: failed as usize,
                pending: (parents - fetched - failed).max(0) as usize,
            })
        },
    )
    .map_err(|e| sqlite_error("failed reading backfill progress", e, "isotherms"))
}
