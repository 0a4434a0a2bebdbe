pub mod app_error;
pub mod canon_json;
pub mod fingerprint;
pub mod types;
pub mod mirror;
pub mod db;
pub mod store;
pub mod audit;
pub mod reconcile;
pub mod guard;
pub mod snapshot;
pub mod source;
pub mod apply;
pub mod backfill;
pub mod sync;

pub use app_error::AppError;
