use isodb_core::app_error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceUri {
    Http { url: String },
    FilePath { path: PathBuf },
}

impl SourceUri {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::new(
                "ISO_SOURCE_URI_INVALID",
                "fetch",
                "source base url is required",
                false,
                serde_json::json!({ "source": raw }),
            ));
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(SourceUri::Http {
                url: raw.trim_end_matches('/').to_string(),
            });
        }

        if let Some(rest) = raw.strip_prefix("file://") {
            if rest.trim().is_empty() {
                return Err(AppError::new(
                    "ISO_SOURCE_URI_INVALID",
                    "fetch",
                    "file source missing path",
                    false,
                    serde_json::json!({ "source": raw }),
                ));
            }
            return Ok(SourceUri::FilePath {
                path: PathBuf::from(rest),
            });
        }

        if raw.contains("://") {
            return Err(AppError::new(
                "ISO_SOURCE_URI_UNSUPPORTED",
                "fetch",
                "unsupported source scheme",
                false,
                serde_json::json!({ "source": raw }),
            ));
        }

        Ok(SourceUri::FilePath {
            path: PathBuf::from(raw),
        })
    }

    pub fn display(&self) -> String {
        match self {
            SourceUri::Http { url } => url.clone(),
            SourceUri::FilePath { path } => format!("file://{}", path.display()),
        }
    }
}
