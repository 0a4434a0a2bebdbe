use crate::app_error::{AppError, AppResult};
use crate::canon_json::hash_canonical;
use serde_json::Value;

/// Digest over the canonical form of `fields`. Callers pass only tracked
/// fields; anything left out is cosmetic and never triggers a change.
pub fn fingerprint_fields(fields: &Value) -> AppResult<String> {
    if !fields.is_object() {
        return Err(AppError::new(
            "ISO_FINGERPRINT_INPUT_INVALID",
            "fingerprint",
            "fingerprint input must be a json object",
            false,
            serde_json::json!({ "kind": value_kind(fields) }),
        ));
    }
    hash_canonical(fields)
}

pub fn validate_fingerprint(s: &str) -> AppResult<()> {
    let Some(hex) = s.strip_prefix("blake3:") else {
        return Err(AppError::new(
            "ISO_FINGERPRINT_INVALID_FORMAT",
            "fingerprint",
            "fingerprint must start with blake3:",
            false,
            serde_json::json!({ "value": s }),
        ));
    };
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
        return Err(AppError::new(
            "ISO_FINGERPRINT_INVALID_FORMAT",
            "fingerprint",
            "invalid lowercase hex digest",
            false,
            serde_json::json!({ "value": s }),
        ));
    }
    Ok(())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
