//! Raw NIST ISODB JSON → typed records.
//!
//! Missing optional fields become `None`; a missing identity key becomes an
//! empty string so the reconciler can surface it instead of it vanishing here.

use isodb_core::app_error::{AppError, AppResult};
use isodb_core::types::{
    BibliographyRecord, GasRecord, IsothermRecord, MaterialRecord, MeasurementPoint, Record,
    SpeciesAdsorption,
};
use serde_json::Value;
use std::collections::BTreeMap;

fn payload_error(message: &str, details: Value) -> AppError {
    AppError::new("ISO_FETCH_PAYLOAD_INVALID", "fetch", message, false, details)
}

/// The top-level array of a listing endpoint.
pub fn as_listing<'a>(leaf: &str, value: &'a Value) -> AppResult<&'a [Value]> {
    value.as_array().map(Vec::as_slice).ok_or_else(|| {
        payload_error(
            "listing endpoint did not return a json array",
            serde_json::json!({ "endpoint": leaf }),
        )
    })
}

fn text(raw: &Value, field: &str) -> Option<String> {
    match raw.get(field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Finite numbers only; `"NaN"` and `"inf"` strings parse as f64 but have
/// no place in the store.
fn number(raw: &Value, field: &str) -> Option<f64> {
    let value = match raw.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|f| f.is_finite())
}

fn integer(raw: &Value, field: &str) -> Option<i64> {
    match raw.get(field)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn flag(raw: &Value, field: &str) -> bool {
    match raw.get(field) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

/// Synonym lists are stored joined with `"; "`; a plain string passes through.
fn synonyms(raw: &Value) -> Option<String> {
    match raw.get("synonyms")? {
        Value::Array(items) => {
            let names: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            if names.is_empty() {
                None
            } else {
                Some(names.join("; "))
            }
        }
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn string_list(raw: &Value, field: &str) -> Vec<String> {
    raw.get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn number_list(raw: &Value, field: &str) -> Vec<f64> {
    raw.get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default()
}

/// Entries of `field` reduced to one identifying string each, first present
/// key wins.
fn keyed_list(raw: &Value, field: &str, keys: &[&str]) -> Vec<String> {
    raw.get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    keys.iter()
                        .find_map(|k| text(item, k))
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Material identity: `hashkey`, else the name with spaces replaced by `_`.
pub fn material_key(raw: &Value) -> String {
    text(raw, "hashkey").unwrap_or_else(|| {
        text(raw, "name")
            .map(|n| n.replace(' ', "_"))
            .unwrap_or_default()
    })
}

fn finish(mut record: Record) -> AppResult<Record> {
    record.refresh_fingerprint()?;
    Ok(record)
}

pub fn normalize_material(raw: &Value) -> AppResult<Record> {
    finish(Record::Material(MaterialRecord {
        material_id: material_key(raw),
        name: text(raw, "name").unwrap_or_default(),
        synonyms: synonyms(raw),
        formula: text(raw, "formula"),
        category: text(raw, "family").or_else(|| text(raw, "category")),
        isotherm_count: 0,
        last_updated: None,
        fingerprint: String::new(),
        local_updated_ms: None,
    }))
}

pub fn normalize_isotherm(raw: &Value) -> AppResult<Record> {
    let adsorbent = raw.get("adsorbent").cloned().unwrap_or(Value::Null);
    let adsorbent_id = Some(material_key(&adsorbent)).filter(|k| !k.is_empty());
    finish(Record::Isotherm(IsothermRecord {
        filename: text(raw, "filename").unwrap_or_default(),
        doi: text(raw, "DOI"),
        adsorbent_id,
        adsorbent_name: text(&adsorbent, "name"),
        adsorbates: keyed_list(raw, "adsorbates", &["InChIKey"]),
        category: text(raw, "category"),
        temperature: number(raw, "temperature"),
        tabular_data: flag(raw, "tabular_data"),
        isotherm_type: text(raw, "isotherm_type"),
        pressure_units: text(raw, "pressureUnits"),
        adsorption_units: text(raw, "adsorptionUnits"),
        date: text(raw, "date"),
        fingerprint: String::new(),
        local_updated_ms: None,
    }))
}

pub fn normalize_gas(raw: &Value) -> AppResult<Record> {
    finish(Record::Gas(GasRecord {
        inchikey: text(raw, "InChIKey").unwrap_or_default(),
        name: text(raw, "name").unwrap_or_default(),
        synonyms: synonyms(raw),
        formula: text(raw, "formula"),
        fingerprint: String::new(),
        local_updated_ms: None,
    }))
}

pub fn normalize_bibliography(raw: &Value) -> AppResult<Record> {
    finish(Record::Bibliography(BibliographyRecord {
        doi: text(raw, "DOI").unwrap_or_default(),
        title: text(raw, "title"),
        journal: text(raw, "journal"),
        year: integer(raw, "year"),
        authors: string_list(raw, "authors"),
        categories: string_list(raw, "categories"),
        adsorbents: keyed_list(raw, "adsorbents", &["hashkey", "name"]),
        adsorbates: keyed_list(raw, "adsorbates", &["InChIKey", "name"]),
        temperatures: number_list(raw, "temperatures"),
        pressures: number_list(raw, "pressures"),
        fingerprint: String::new(),
        local_updated_ms: None,
    }))
}

/// Measurement points from a full isotherm document. Points without a
/// pressure are dropped.
pub fn normalize_points(raw: &Value) -> Vec<MeasurementPoint> {
    let Some(items) = raw.get("isotherm_data").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let pressure = number(item, "pressure")?;
            let species = item
                .get("species_data")
                .and_then(Value::as_array)
                .map(|rows| {
                    rows.iter()
                        .map(|s| SpeciesAdsorption {
                            inchikey: text(s, "InChIKey").unwrap_or_default(),
                            adsorption: number(s, "adsorption"),
                            composition: number(s, "composition"),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(MeasurementPoint {
                pressure,
                total_adsorption: number(item, "total_adsorption"),
                species,
            })
        })
        .collect()
}

/// material_id → number of isotherms whose adsorbent resolves to it.
pub fn isotherm_counts(listing: &[Value]) -> BTreeMap<String, i64> {
    let mut counts = BTreeMap::new();
    for isotherm in listing {
        let Some(adsorbent) = isotherm.get("adsorbent") else {
            continue;
        };
        let key = material_key(adsorbent);
        if !key.is_empty() {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts
}
