use crate::app_error::AppResult;
use crate::types::{Collection, MeasurementPoint, Record};
use std::collections::BTreeMap;

/// One normalized pull of a whole remote collection.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedCollection {
    pub collection: Collection,
    /// Records in upstream order, fingerprints already computed.
    pub records: Vec<Record>,
    /// Child rows keyed by parent identity; `None` when the source does not
    /// deliver them with the listing.
    pub child_rows: Option<BTreeMap<String, Vec<MeasurementPoint>>>,
}

impl FetchedCollection {
    pub fn new(collection: Collection, records: Vec<Record>) -> Self {
        Self {
            collection,
            records,
            child_rows: None,
        }
    }
}

/// Remote side of the mirror. Fetching has no effect on the local store.
pub trait RecordSource {
    fn describe(&self) -> String;
    fn fetch_collection(&mut self, collection: Collection) -> AppResult<FetchedCollection>;
    /// material_id → number of isotherms referencing it.
    fn fetch_isotherm_counts(&mut self) -> AppResult<BTreeMap<String, i64>>;
    fn fetch_isotherm_points(&mut self, filename: &str) -> AppResult<Vec<MeasurementPoint>>;
}
