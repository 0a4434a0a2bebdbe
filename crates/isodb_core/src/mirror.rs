use crate::app_error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DEFAULT_SOURCE_URL: &str = "https://adsorption.nist.gov/isodb/api";
pub const SOURCE_URL_ENV: &str = "ISODB_SOURCE_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorJsonV1 {
    pub schema_version: u32,
    pub mirror_id: String,
    pub created_at_ms: i64,
    pub db: MirrorDbConfig,
    #[serde(default)]
    pub backups: MirrorBackupsConfig,
    #[serde(default)]
    pub source: MirrorSourceConfig,
    #[serde(default)]
    pub sync: MirrorSyncConfig,
    #[serde(default)]
    pub backfill: MirrorBackfillConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorDbConfig {
    pub relative_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorBackupsConfig {
    pub relative_dir: String,
}

impl Default for MirrorBackupsConfig {
    fn default() -> Self {
        Self {
            relative_dir: "backups".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSourceConfig {
    pub base_url: String,
    pub min_request_interval_ms: u64,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for MirrorSourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SOURCE_URL.to_string(),
            min_request_interval_ms: 1_000,
            timeout_ms: 30_000,
            max_attempts: 3,
            retry_delay_ms: 5_000,
        }
    }
}

impl MirrorSourceConfig {
    /// Base URL after applying the `ISODB_SOURCE_URL` override.
    pub fn effective_base_url(&self) -> String {
        match std::env::var(SOURCE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => url,
            _ => self.base_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSyncConfig {
    pub deletion_threshold: f64,
    pub reject_duplicate_keys: bool,
}

impl Default for MirrorSyncConfig {
    fn default() -> Self {
        Self {
            deletion_threshold: crate::guard::DEFAULT_DELETION_THRESHOLD,
            reject_duplicate_keys: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorBackfillConfig {
    pub batch_size: usize,
}

impl Default for MirrorBackfillConfig {
    fn default() -> Self {
        Self { batch_size: 50 }
    }
}

#[derive(Debug, Clone)]
pub struct MirrorPaths {
    pub root: PathBuf,
    pub config: PathBuf,
    pub db: PathBuf,
    pub backups_dir: PathBuf,
}

impl MirrorJsonV1 {
    pub fn paths(&self, mirror_path: &Path) -> MirrorPaths {
        MirrorPaths {
            root: mirror_path.to_path_buf(),
            config: mirror_path.join("mirror.json"),
            db: mirror_path.join(&self.db.relative_path),
            backups_dir: mirror_path.join(&self.backups.relative_dir),
        }
    }
}

fn mirror_error(code: &str, message: &str, details: serde_json::Value) -> AppError {
    AppError::new(code, "mirror", message, false, details)
}

pub fn mirror_init(mirror_path: &Path, now_ms: i64) -> AppResult<MirrorJsonV1> {
    let config_path = mirror_path.join("mirror.json");
    if config_path.exists() {
        return Err(mirror_error(
            "ISO_MIRROR_INIT_FAILED",
            "mirror.json already exists",
            serde_json::json!({ "path": config_path }),
        ));
    }

    let mirror = MirrorJsonV1 {
        schema_version: 1,
        mirror_id: Uuid::new_v4().to_string(),
        created_at_ms: now_ms,
        db: MirrorDbConfig {
            relative_path: "db/isodb.sqlite".to_string(),
        },
        backups: MirrorBackupsConfig::default(),
        source: MirrorSourceConfig::default(),
        sync: MirrorSyncConfig::default(),
        backfill: MirrorBackfillConfig::default(),
    };

    let paths = mirror.paths(mirror_path);
    for dir in [paths.db.parent(), Some(paths.backups_dir.as_path())]
        .into_iter()
        .flatten()
    {
        fs::create_dir_all(dir).map_err(|e| {
            mirror_error(
                "ISO_MIRROR_INIT_FAILED",
                "failed to create mirror directory",
                serde_json::json!({ "error": e.to_string(), "path": dir }),
            )
        })?;
    }

    mirror_save(mirror_path, &mirror)?;
    Ok(mirror)
}

pub fn mirror_save(mirror_path: &Path, mirror: &MirrorJsonV1) -> AppResult<()> {
    let bytes = serde_json::to_vec_pretty(mirror).map_err(|e| {
        mirror_error(
            "ISO_MIRROR_INIT_FAILED",
            "failed to serialize mirror.json",
            serde_json::json!({ "error": e.to_string() }),
        )
    })?;

    fs::create_dir_all(mirror_path).map_err(|e| {
        mirror_error(
            "ISO_MIRROR_INIT_FAILED",
            "failed to create mirror root",
            serde_json::json!({ "error": e.to_string(), "path": mirror_path }),
        )
    })?;
    fs::write(mirror_path.join("mirror.json"), bytes).map_err(|e| {
        mirror_error(
            "ISO_MIRROR_INIT_FAILED",
            "failed to write mirror.json",
            serde_json::json!({ "error": e.to_string() }),
        )
    })?;
    Ok(())
}

pub fn mirror_open(mirror_path: &Path) -> AppResult<MirrorJsonV1> {
    let path = mirror_path.join("mirror.json");
    let bytes = fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            mirror_error(
                "ISO_MIRROR_JSON_MISSING",
                "mirror.json is missing",
                serde_json::json!({ "path": path }),
            )
        } else {
            mirror_error(
                "ISO_MIRROR_JSON_INVALID",
                "failed to read mirror.json",
                serde_json::json!({ "error": e.to_string(), "path": path }),
            )
        }
    })?;

    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
        mirror_error(
            "ISO_MIRROR_JSON_INVALID",
            "failed to parse mirror.json",
            serde_json::json!({ "error": e.to_string(), "path": path }),
        )
    })?;

    let schema_version = value
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| {
            mirror_error(
                "ISO_MIRROR_JSON_INVALID",
                "mirror schema_version missing or invalid",
                serde_json::json!({ "path": path }),
            )
        })?;

    if schema_version != 1 {
        return Err(mirror_error(
            "ISO_MIRROR_JSON_UNSUPPORTED_VERSION",
            "unsupported mirror schema_version",
            serde_json::json!({ "expected": [1], "actual": schema_version }),
        ));
    }

    let parsed: MirrorJsonV1 = serde_json::from_value(value).map_err(|e| {
        mirror_error(
            "ISO_MIRROR_JSON_INVALID",
            "failed to parse mirror schema v1",
            serde_json::json!({ "error": e.to_string(), "path": path }),
        )
    })?;

    let threshold = parsed.sync.deletion_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(mirror_error(
            "ISO_MIRROR_JSON_INVALID",
            "sync.deletion_threshold must be within [0, 1]",
            serde_json::json!({ "deletion_threshold": threshold, "path": path }),
        ));
    }
    if parsed.backfill.batch_size == 0 {
        return Err(mirror_error(
            "ISO_MIRROR_JSON_INVALID",
            "backfill.batch_size must be positive",
            serde_json::json!({ "path": path }),
        ));
    }

    Ok(parsed)
}

/// Opens `mirror.json` and resolves the store and backup locations.
pub fn mirror_paths(mirror_path: &Path) -> AppResult<MirrorPaths> {
    Ok(mirror_open(mirror_path)?.paths(mirror_path))
}
