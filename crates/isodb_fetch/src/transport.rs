use isodb_core::app_error::{AppError, AppResult};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Fetches one JSON document by its endpoint leaf, e.g. `materials.json`.
pub trait RawTransport {
    fn describe(&self) -> String;
    fn get_json(&mut self, leaf: &str) -> AppResult<Value>;
}

/// Serves endpoint leaves from a directory laid out like the remote API.
#[derive(Debug, Clone)]
pub struct FsTransport {
    pub root: PathBuf,
}

impl FsTransport {
    pub fn new(path: &Path) -> Self {
        Self {
            root: path.to_path_buf(),
        }
    }
}

impl RawTransport for FsTransport {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn get_json(&mut self, leaf: &str) -> AppResult<Value> {
        let path = self.root.join(leaf);
        let bytes = std::fs::read(&path).map_err(|e| {
            let code = if e.kind() == std::io::ErrorKind::NotFound {
                "ISO_FETCH_NOT_FOUND"
            } else {
                "ISO_FETCH_READ_FAILED"
            };
            AppError::new(
                code,
                "fetch",
                "failed reading source document",
                false,
                serde_json::json!({ "error": e.to_string(), "path": path }),
            )
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AppError::new(
                "ISO_FETCH_PAYLOAD_INVALID",
                "fetch",
                "source document is not valid json",
                false,
                serde_json::json!({ "error": e.to_string(), "path": path }),
            )
        })
    }
}
