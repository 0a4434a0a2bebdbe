use crate::normalize::{
    as_listing, isotherm_counts, normalize_bibliography, normalize_gas, normalize_isotherm,
    normalize_material, normalize_points,
};
use crate::transport::RawTransport;
use isodb_core::app_error::AppResult;
use isodb_core::source::{FetchedCollection, RecordSource};
use isodb_core::types::{Collection, MeasurementPoint, Record};
use serde_json::Value;
use std::collections::BTreeMap;

pub fn endpoint(collection: Collection) -> &'static str {
    match collection {
        Collection::Materials => "materials.json",
        Collection::Isotherms => "isotherms.json",
        Collection::Gases => "gases.json",
        Collection::Bibliography => "biblio.json",
    }
}

pub fn isotherm_endpoint(filename: &str) -> String {
    format!("isotherm/{filename}.json")
}

/// The NIST ISODB API (or an on-disk copy of it) as a [`RecordSource`].
pub struct NistSource<T: RawTransport> {
    transport: T,
    isotherm_listing: Option<Vec<Value>>,
}

impl<T: RawTransport> NistSource<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            isotherm_listing: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn listing(&mut self, collection: Collection) -> AppResult<Vec<Value>> {
        if collection == Collection::Isotherms {
            if let Some(cached) = &self.isotherm_listing {
                return Ok(cached.clone());
            }
        }
        let leaf = endpoint(collection);
        let value = self.transport.get_json(leaf)?;
        let items = as_listing(leaf, &value)?.to_vec();
        if collection == Collection::Isotherms {
            self.isotherm_listing = Some(items.clone());
        }
        Ok(items)
    }
}

impl<T: RawTransport> RecordSource for NistSource<T> {
    fn describe(&self) -> String {
        self.transport.describe()
    }

    fn fetch_collection(&mut self, collection: Collection) -> AppResult<FetchedCollection> {
        let items = self.listing(collection)?;
        let normalize: fn(&Value) -> AppResult<Record> = match collection {
            Collection::Materials => normalize_material,
            Collection::Isotherms => normalize_isotherm,
            Collection::Gases => normalize_gas,
            Collection::Bibliography => normalize_bibliography,
        };
        let records = items.iter().map(normalize).collect::<AppResult<Vec<_>>>()?;
        let mut fetched = FetchedCollection::new(collection, records);

        // Full isotherm documents carry their points inline.
        if collection == Collection::Isotherms {
            let inline: BTreeMap<String, Vec<MeasurementPoint>> = items
                .iter()
                .zip(&fetched.records)
                .filter(|(raw, _)| raw.get("isotherm_data").is_some())
                .map(|(raw, record)| (record.key().to_string(), normalize_points(raw)))
                .collect();
            if !inline.is_empty() {
                fetched.child_rows = Some(inline);
            }
        }
        Ok(fetched)
    }

    fn fetch_isotherm_counts(&mut self) -> AppResult<BTreeMap<String, i64>> {
        let listing = self.listing(Collection::Isotherms)?;
        Ok(isotherm_counts(&listing))
    }

    fn fetch_isotherm_points(&mut self, filename: &str) -> AppResult<Vec<MeasurementPoint>> {
        let value = self.transport.get_json(&isotherm_endpoint(filename))?;
        Ok(normalize_points(&value))
    }
}
