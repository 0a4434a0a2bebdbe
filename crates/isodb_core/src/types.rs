use crate::app_error::{AppError, AppResult};
use crate::fingerprint::fingerprint_fields;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The closed set of mirrored collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Materials,
    Isotherms,
    Gases,
    Bibliography,
}

/// Relation from a parent collection to its wholly owned child rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRelation {
    pub table: &'static str,
    pub parent_column: &'static str,
}

impl Collection {
    /// Fixed apply order.
    pub const ALL: [Collection; 4] = [
        Collection::Materials,
        Collection::Isotherms,
        Collection::Gases,
        Collection::Bibliography,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Materials => "materials",
            Collection::Isotherms => "isotherms",
            Collection::Gases => "gases",
            Collection::Bibliography => "bibliography",
        }
    }

    pub fn table(&self) -> &'static str {
        self.as_str()
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            Collection::Materials => "material_id",
            Collection::Isotherms => "filename",
            Collection::Gases => "inchikey",
            Collection::Bibliography => "doi",
        }
    }

    pub fn child_relation(&self) -> Option<ChildRelation> {
        match self {
            Collection::Isotherms => Some(ChildRelation {
                table: "isotherm_data_points",
                parent_column: "isotherm_filename",
            }),
            _ => None,
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "materials" => Ok(Collection::Materials),
            "isotherms" => Ok(Collection::Isotherms),
            "gases" => Ok(Collection::Gases),
            "bibliography" | "biblio" => Ok(Collection::Bibliography),
            other => Err(AppError::new(
                "ISO_COLLECTION_UNKNOWN",
                "sync",
                "unknown collection name",
                false,
                json!({
                    "collection": other,
                    "supported": ["materials", "isotherms", "gases", "bibliography"]
                }),
            )),
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub material_id: String,
    pub name: String,
    pub synonyms: Option<String>,
    pub formula: Option<String>,
    pub category: Option<String>,
    pub isotherm_count: i64,
    /// Cosmetic: upstream never populates it reliably.
    pub last_updated: Option<String>,
    pub fingerprint: String,
    pub local_updated_ms: Option<i64>,
}

impl MaterialRecord {
    pub fn semantic_fields(&self) -> Value {
        json!({
            "material_id": self.material_id,
            "name": self.name,
            "synonyms": self.synonyms,
            "formula": self.formula,
            "category": self.category,
            "isotherm_count": self.isotherm_count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsothermRecord {
    pub filename: String,
    pub doi: Option<String>,
    pub adsorbent_id: Option<String>,
    pub adsorbent_name: Option<String>,
    pub adsorbates: Vec<String>,
    pub category: Option<String>,
    pub temperature: Option<f64>,
    pub tabular_data: bool,
    pub isotherm_type: Option<String>,
    pub pressure_units: Option<String>,
    pub adsorption_units: Option<String>,
    /// Cosmetic: free-text date string as published upstream.
    pub date: Option<String>,
    pub fingerprint: String,
    pub local_updated_ms: Option<i64>,
}

impl IsothermRecord {
    pub fn semantic_fields(&self) -> Value {
        json!({
            "filename": self.filename,
            "doi": self.doi,
            "adsorbent_id": self.adsorbent_id,
            "adsorbent_name": self.adsorbent_name,
            "adsorbates": self.adsorbates,
            "category": self.category,
            "temperature": self.temperature,
            "tabular_data": self.tabular_data,
            "isotherm_type": self.isotherm_type,
            "pressure_units": self.pressure_units,
            "adsorption_units": self.adsorption_units,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasRecord {
    pub inchikey: String,
    pub name: String,
    pub synonyms: Option<String>,
    pub formula: Option<String>,
    pub fingerprint: String,
    pub local_updated_ms: Option<i64>,
}

impl GasRecord {
    pub fn semantic_fields(&self) -> Value {
        json!({
            "inchikey": self.inchikey,
            "name": self.name,
            "synonyms": self.synonyms,
            "formula": self.formula,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibliographyRecord {
    pub doi: String,
    pub title: Option<String>,
    pub journal: Option<String>,
    pub year: Option<i64>,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub adsorbents: Vec<String>,
    pub adsorbates: Vec<String>,
    pub temperatures: Vec<f64>,
    pub pressures: Vec<f64>,
    pub fingerprint: String,
    pub local_updated_ms: Option<i64>,
}

impl BibliographyRecord {
    pub fn semantic_fields(&self) -> Value {
        json!({
            "doi": self.doi,
            "title": self.title,
            "journal": self.journal,
            "year": self.year,
            "authors": self.authors,
            "categories": self.categories,
            "adsorbents": self.adsorbents,
            "adsorbates": self.adsorbates,
            "temperatures": self.temperatures,
            "pressures": self.pressures,
        })
    }
}

/// Per-species breakdown of one measurement point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesAdsorption {
    pub inchikey: String,
    pub adsorption: Option<f64>,
    pub composition: Option<f64>,
}

/// One child row of an isotherm. Owned by its parent; no fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPoint {
    pub pressure: f64,
    pub total_adsorption: Option<f64>,
    pub species: Vec<SpeciesAdsorption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection", rename_all = "snake_case")]
pub enum Record {
    Material(MaterialRecord),
    Isotherm(IsothermRecord),
    Gas(GasRecord),
    Bibliography(BibliographyRecord),
}

impl Record {
    pub fn collection(&self) -> Collection {
        match self {
            Record::Material(_) => Collection::Materials,
            Record::Isotherm(_) => Collection::Isotherms,
            Record::Gas(_) => Collection::Gases,
            Record::Bibliography(_) => Collection::Bibliography,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Record::Material(r) => &r.material_id,
            Record::Isotherm(r) => &r.filename,
            Record::Gas(r) => &r.inchikey,
            Record::Bibliography(r) => &r.doi,
        }
    }

    pub fn fingerprint(&self) -> &str {
        match self {
            Record::Material(r) => &r.fingerprint,
            Record::Isotherm(r) => &r.fingerprint,
            Record::Gas(r) => &r.fingerprint,
            Record::Bibliography(r) => &r.fingerprint,
        }
    }

    pub fn local_updated_ms(&self) -> Option<i64> {
        match self {
            Record::Material(r) => r.local_updated_ms,
            Record::Isotherm(r) => r.local_updated_ms,
            Record::Gas(r) => r.local_updated_ms,
            Record::Bibliography(r) => r.local_updated_ms,
        }
    }

    pub fn set_local_updated_ms(&mut self, now_ms: i64) {
        match self {
            Record::Material(r) => r.local_updated_ms = Some(now_ms),
            Record::Isotherm(r) => r.local_updated_ms = Some(now_ms),
            Record::Gas(r) => r.local_updated_ms = Some(now_ms),
            Record::Bibliography(r) => r.local_updated_ms = Some(now_ms),
        }
    }

    pub fn semantic_fields(&self) -> Value {
        match self {
            Record::Material(r) => r.semantic_fields(),
            Record::Isotherm(r) => r.semantic_fields(),
            Record::Gas(r) => r.semantic_fields(),
            Record::Bibliography(r) => r.semantic_fields(),
        }
    }

    /// Recomputes the fingerprint from the tracked fields.
    pub fn refresh_fingerprint(&mut self) -> AppResult<()> {
        let fp = fingerprint_fields(&self.semantic_fields())?;
        match self {
            Record::Material(r) => r.fingerprint = fp,
            Record::Isotherm(r) => r.fingerprint = fp,
            Record::Gas(r) => r.fingerprint = fp,
            Record::Bibliography(r) => r.fingerprint = fp,
        }
        Ok(())
    }

    /// Full value snapshot used by the audit trail.
    pub fn to_snapshot(&self) -> AppResult<Value> {
        let value = match self {
            Record::Material(r) => serde_json::to_value(r),
            Record::Isotherm(r) => serde_json::to_value(r),
            Record::Gas(r) => serde_json::to_value(r),
            Record::Bibliography(r) => serde_json::to_value(r),
        };
        value.map_err(|e| {
            AppError::new(
                "ISO_RECORD_SERIALIZE_FAILED",
                "audit",
                "failed serializing record snapshot",
                false,
                json!({ "error": e.to_string(), "key": self.key() }),
            )
        })
    }
}
