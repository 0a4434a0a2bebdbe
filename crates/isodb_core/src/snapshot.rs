use crate::app_error::{AppError, AppResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, OpenFlags};
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotHandle {
    pub name: String,
    pub path: PathBuf,
    pub taken_at: String,
    pub bytes: u64,
}

/// Whole-store copies of one SQLite file, kept in `backups_dir`.
pub struct SnapshotManager {
    pub db_path: PathBuf,
    pub backups_dir: PathBuf,
}

fn snapshot_error(code: &str, message: &str, details: serde_json::Value) -> AppError {
    AppError::new(code, "snapshot", message, false, details)
}

impl SnapshotManager {
    pub fn new(db_path: PathBuf, backups_dir: PathBuf) -> Self {
        Self {
            db_path,
            backups_dir,
        }
    }

    fn db_stem(&self) -> String {
        self.db_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string())
    }

    pub fn snapshot_name(&self, now_ms: i64) -> AppResult<String> {
        let taken_at = DateTime::<Utc>::from_timestamp_millis(now_ms).ok_or_else(|| {
            snapshot_error(
                "ISO_SNAPSHOT_FAILED",
                "snapshot timestamp out of range",
                serde_json::json!({ "now_ms": now_ms }),
            )
        })?;
        Ok(format!(
            "{}_{}.sqlite",
            self.db_stem(),
            taken_at.format(STAMP_FORMAT)
        ))
    }

    /// Copies the store into the backups dir through SQLite's online backup,
    /// so pages still sitting in a WAL file are included. The copy is written
    /// to a `.partial` file first, so a failure never leaves a truncated
    /// snapshot under the final name.
    pub fn snapshot(&self, now_ms: i64) -> AppResult<SnapshotHandle> {
        if !self.db_path.exists() {
            return Err(snapshot_error(
                "ISO_SNAPSHOT_SOURCE_MISSING",
                "store file does not exist",
                serde_json::json!({ "path": self.db_path }),
            ));
        }
        fs::create_dir_all(&self.backups_dir).map_err(|e| {
            snapshot_error(
                "ISO_SNAPSHOT_FAILED",
                "failed to create backups directory",
                serde_json::json!({ "error": e.to_string(), "path": self.backups_dir }),
            )
        })?;

        let name = self.snapshot_name(now_ms)?;
        let target = self.backups_dir.join(&name);
        if target.exists() {
            tracing::debug!(snapshot = %name, "reusing snapshot taken this second");
            return self.handle_for(&target);
        }

        let partial = self.backups_dir.join(format!("{name}.partial"));
        if let Err(err) = self.backup_into(&partial, &target) {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }

        let handle = self.handle_for(&target)?;
        tracing::info!(snapshot = %handle.name, bytes = handle.bytes, "snapshot written");
        Ok(handle)
    }

    fn backup_into(&self, partial: &Path, target: &Path) -> AppResult<()> {
        let failed = |e: String| {
            snapshot_error(
                "ISO_SNAPSHOT_FAILED",
                "failed to copy store into snapshot",
                serde_json::json!({ "error": e, "source": self.db_path, "target": target }),
            )
        };
        let source = open_existing(&self.db_path).map_err(|e| failed(e.to_string()))?;
        source
            .backup(DatabaseName::Main, partial, None)
            .map_err(|e| failed(e.to_string()))?;
        drop(source);
        fs::rename(partial, target).map_err(|e| failed(e.to_string()))
    }

    /// Every snapshot of this store, newest first.
    pub fn list(&self) -> AppResult<Vec<SnapshotHandle>> {
        if !self.backups_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.backups_dir).map_err(|e| {
            snapshot_error(
                "ISO_SNAPSHOT_LIST_FAILED",
                "failed to read backups directory",
                serde_json::json!({ "error": e.to_string(), "path": self.backups_dir }),
            )
        })?;

        let mut out: Vec<(NaiveDateTime, SnapshotHandle)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                snapshot_error(
                    "ISO_SNAPSHOT_LIST_FAILED",
                    "failed to read backups directory entry",
                    serde_json::json!({ "error": e.to_string() }),
                )
            })?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stamp) = self.parse_stamp(name) else {
                continue;
            };
            out.push((stamp, self.handle_for(&path)?));
        }
        out.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.name.cmp(&a.1.name)));
        Ok(out.into_iter().map(|(_, handle)| handle).collect())
    }

    /// Resolves a snapshot by file name (looked up in the backups dir) or by path.
    pub fn resolve(&self, name_or_path: &str) -> AppResult<SnapshotHandle> {
        let direct = PathBuf::from(name_or_path);
        let path = if direct.is_file() {
            direct
        } else {
            self.backups_dir.join(name_or_path)
        };
        if !path.is_file() {
            return Err(snapshot_error(
                "ISO_SNAPSHOT_NOT_FOUND",
                "snapshot not found",
                serde_json::json!({ "snapshot": name_or_path, "backups_dir": self.backups_dir }),
            ));
        }
        self.handle_for(&path)
    }

    /// Replaces the live store's contents with `handle` through SQLite's
    /// backup API. Destructive; other connections must be idle.
    pub fn restore(&self, handle: &SnapshotHandle) -> AppResult<()> {
        validate_sqlite_header(&handle.path)?;

        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                snapshot_error(
                    "ISO_SNAPSHOT_RESTORE_FAILED",
                    "failed to create store directory",
                    serde_json::json!({ "error": e.to_string(), "path": parent }),
                )
            })?;
        }

        Connection::open(&self.db_path)
            .and_then(|mut live| {
                live.restore(DatabaseName::Main, &handle.path, None::<fn(Progress)>)
            })
            .map_err(|e| {
                snapshot_error(
                    "ISO_SNAPSHOT_RESTORE_FAILED",
                    "failed to restore snapshot over store",
                    serde_json::json!({
                        "error": e.to_string(),
                        "snapshot": handle.path,
                        "store": self.db_path
                    }),
                )
            })?;
        tracing::info!(snapshot = %handle.name, store = %self.db_path.display(), "store restored");
        Ok(())
    }

    fn parse_stamp(&self, name: &str) -> Option<NaiveDateTime> {
        let rest = name.strip_prefix(&self.db_stem())?.strip_prefix('_')?;
        let stamp = rest.strip_suffix(".sqlite")?;
        NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()
    }

    fn handle_for(&self, path: &Path) -> AppResult<SnapshotHandle> {
        let meta = fs::metadata(path).map_err(|e| {
            snapshot_error(
                "ISO_SNAPSHOT_FAILED",
                "failed to stat snapshot file",
                serde_json::json!({ "error": e.to_string(), "path": path }),
            )
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let taken_at = self
            .parse_stamp(&name)
            .map(|ts| ts.and_utc().to_rfc3339())
            .unwrap_or_default();
        Ok(SnapshotHandle {
            name,
            path: path.to_path_buf(),
            taken_at,
            bytes: meta.len(),
        })
    }
}

/// Opens a store that must already exist; never creates an empty one.
fn open_existing(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

fn validate_sqlite_header(path: &Path) -> AppResult<()> {
    let mut header = [0u8; 16];
    let read = fs::File::open(path).and_then(|mut f| f.read_exact(&mut header));
    if read.is_err() || &header != SQLITE_HEADER {
        return Err(snapshot_error(
            "ISO_SNAPSHOT_INVALID",
            "snapshot is not a sqlite database",
            serde_json::json!({ "path": path }),
        ));
    }
    Ok(())
}
