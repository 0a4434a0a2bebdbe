use crate::app_error::{AppError, AppResult};
use crate::canon_json::to_canonical_string;
use crate::types::Collection;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Insert => "insert",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "insert" => Some(AuditAction::Insert),
            "update" => Some(AuditAction::Update),
            "delete" => Some(AuditAction::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub audit_id: i64,
    pub ts_ms: i64,
    pub collection: String,
    pub action: AuditAction,
    pub record_key: String,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub prev_entry_hash: Option<String>,
    pub entry_hash: String,
}

fn audit_error(code: &str, message: &str, details: Value) -> AppError {
    AppError::new(code, "audit", message, false, details)
}

fn snapshot_text(value: Option<&Value>) -> AppResult<Option<String>> {
    value.map(to_canonical_string).transpose()
}

fn entry_hash(
    ts_ms: i64,
    collection: &str,
    action: &str,
    record_key: &str,
    old_values: Option<&str>,
    new_values: Option<&str>,
    prev_entry_hash: Option<&str>,
) -> String {
    let preimage = format!(
        "isodb.audit.v1\n{}\n{}\n{}\n{}\n{}\n{}\n{}",
        ts_ms,
        collection,
        action,
        record_key,
        old_values.unwrap_or("null"),
        new_values.unwrap_or("null"),
        prev_entry_hash.unwrap_or_default()
    );
    format!("blake3:{}", blake3::hash(preimage.as_bytes()).to_hex())
}

fn last_entry_hash(conn: &Connection) -> AppResult<Option<String>> {
    conn.query_row(
        "SELECT entry_hash FROM audit_log ORDER BY audit_id DESC LIMIT 1",
        [],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| {
        audit_error(
            "ISO_AUDIT_READ_FAILED",
            "failed reading audit chain head",
            serde_json::json!({ "error": e.to_string() }),
        )
    })
}

/// Appends audit entries while carrying the chain head in memory, so a bulk
/// apply does one head lookup rather than one per entry.
pub struct AuditWriter<'c> {
    conn: &'c Connection,
    prev_hash: Option<String>,
    ts_ms: i64,
    written: usize,
}

impl<'c> AuditWriter<'c> {
    pub fn new(conn: &'c Connection, ts_ms: i64) -> AppResult<Self> {
        Ok(Self {
            conn,
            prev_hash: last_entry_hash(conn)?,
            ts_ms,
            written: 0,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn append(
        &mut self,
        collection: Collection,
        action: AuditAction,
        record_key: &str,
        old_values: Option<&Value>,
        new_values: Option<&Value>,
    ) -> AppResult<String> {
        let old_text = snapshot_text(old_values)?;
        let new_text = snapshot_text(new_values)?;
        let hash = entry_hash(
            self.ts_ms,
            collection.as_str(),
            action.as_str(),
            record_key,
            old_text.as_deref(),
            new_text.as_deref(),
            self.prev_hash.as_deref(),
        );

        self.conn
            .prepare_cached(
                "INSERT INTO audit_log(ts_ms, collection, action, record_key, old_values, new_values,
                                       prev_entry_hash, entry_hash)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    self.ts_ms,
                    collection.as_str(),
                    action.as_str(),
                    record_key,
                    old_text,
                    new_text,
                    self.prev_hash,
                    hash
                ])
            })
            .map_err(|e| {
                audit_error(
                    "ISO_AUDIT_APPEND_FAILED",
                    "failed to insert audit entry",
                    serde_json::json!({
                        "error": e.to_string(),
                        "collection": collection.as_str(),
                        "key": record_key
                    }),
                )
            })?;

        self.prev_hash = Some(hash.clone());
        self.written += 1;
        Ok(hash)
    }
}

/// Single-entry convenience over [`AuditWriter`].
pub fn append_audit(
    conn: &Connection,
    ts_ms: i64,
    collection: Collection,
    action: AuditAction,
    record_key: &str,
    old_values: Option<&Value>,
    new_values: Option<&Value>,
) -> AppResult<String> {
    AuditWriter::new(conn, ts_ms)?.append(collection, action, record_key, old_values, new_values)
}

fn parse_snapshot(text: Option<String>, idx: usize) -> rusqlite::Result<Option<Value>> {
    text.map(|t| {
        serde_json::from_str(&t).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn read_entries(conn: &Connection, sql: &str, limit: Option<usize>) -> AppResult<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(sql).map_err(|e| {
        audit_error(
            "ISO_AUDIT_READ_FAILED",
            "failed preparing audit query",
            serde_json::json!({ "error": e.to_string() }),
        )
    })?;
    let map_row = |row: &rusqlite::Row<'_>| {
        let action_raw: String = row.get(3)?;
        let action = AuditAction::parse(&action_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown audit action {action_raw}").into(),
            )
        })?;
        Ok(AuditEntry {
            audit_id: row.get(0)?,
            ts_ms: row.get(1)?,
            collection: row.get(2)?,
            action,
            record_key: row.get(4)?,
            old_values: parse_snapshot(row.get(5)?, 5)?,
            new_values: parse_snapshot(row.get(6)?, 6)?,
            prev_entry_hash: row.get(7)?,
            entry_hash: row.get(8)?,
        })
    };
    let rows = match limit {
        Some(n) => stmt.query_map([n as i64], map_row),
        None => stmt.query_map([], map_row),
    }
    .map_err(|e| {
        audit_error(
            "ISO_AUDIT_READ_FAILED",
            "failed querying audit log",
            serde_json::json!({ "error": e.to_string() }),
        )
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| {
        audit_error(
            "ISO_AUDIT_READ_FAILED",
            "failed decoding audit entry",
            serde_json::json!({ "error": e.to_string() }),
        )
    })
}

/// Most recent entries first.
pub fn recent_audit(conn: &Connection, limit: usize) -> AppResult<Vec<AuditEntry>> {
    read_entries(
        conn,
        "SELECT audit_id, ts_ms, collection, action, record_key, old_values, new_values,
                prev_entry_hash, entry_hash
         FROM audit_log ORDER BY ts_ms DESC, audit_id DESC LIMIT ?1",
        Some(limit),
    )
}

pub fn count_audit(conn: &Connection) -> AppResult<usize> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
        .map_err(|e| {
            audit_error(
                "ISO_AUDIT_READ_FAILED",
                "failed counting audit entries",
                serde_json::json!({ "error": e.to_string() }),
            )
        })?;
    Ok(count as usize)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditChainReport {
    pub entries: usize,
    pub head: Option<String>,
}

/// Walks the whole log in insertion order and recomputes every link.
pub fn verify_audit_chain(conn: &Connection) -> AppResult<AuditChainReport> {
    let entries = read_entries(
        conn,
        "SELECT audit_id, ts_ms, collection, action, record_key, old_values, new_values,
                prev_entry_hash, entry_hash
         FROM audit_log ORDER BY audit_id ASC",
        None,
    )?;

    let mut prev: Option<String> = None;
    for entry in &entries {
        if entry.prev_entry_hash != prev {
            return Err(audit_error(
                "ISO_AUDIT_CHAIN_BROKEN",
                "audit entry does not link to its predecessor",
                serde_json::json!({
                    "audit_id": entry.audit_id,
                    "expected_prev": prev,
                    "actual_prev": entry.prev_entry_hash
                }),
            ));
        }
        let old_text = snapshot_text(entry.old_values.as_ref())?;
        let new_text = snapshot_text(entry.new_values.as_ref())?;
        let expected = entry_hash(
            entry.ts_ms,
            &entry.collection,
            entry.action.as_str(),
            &entry.record_key,
            old_text.as_deref(),
            new_text.as_deref(),
            entry.prev_entry_hash.as_deref(),
        );
        if expected != entry.entry_hash {
            return Err(audit_error(
                "ISO_AUDIT_CHAIN_BROKEN",
                "audit entry hash mismatch",
                serde_json::json!({
                    "audit_id": entry.audit_id,
                    "expected": expected,
                    "actual": entry.entry_hash
                }),
            ));
        }
        prev = Some(entry.entry_hash.clone());
    }

    Ok(AuditChainReport {
        entries: entries.len(),
        head: prev,
    })
}
