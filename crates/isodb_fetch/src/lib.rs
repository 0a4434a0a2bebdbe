pub mod client;
pub mod nist;
pub mod normalize;
pub mod source_uri;
pub mod transport;

use client::{HttpTransport, RateLimiter, RetryPolicy};
use isodb_core::app_error::AppResult;
use isodb_core::mirror::MirrorSourceConfig;
use isodb_core::source::RecordSource;
use nist::NistSource;
use source_uri::SourceUri;
use std::time::Duration;
use transport::FsTransport;

/// Builds the record source a mirror is configured for.
pub fn open_source(config: &MirrorSourceConfig) -> AppResult<Box<dyn RecordSource>> {
    let base_url = config.effective_base_url();
    match SourceUri::parse(&base_url)? {
        SourceUri::Http { url } => {
            let transport = HttpTransport::new(
                &url,
                Duration::from_millis(config.timeout_ms),
                RateLimiter::new(Duration::from_millis(config.min_request_interval_ms)),
                RetryPolicy::new(config.max_attempts, Duration::from_millis(config.retry_delay_ms)),
            )?;
            Ok(Box::new(NistSource::new(transport)))
        }
        SourceUri::FilePath { path } => Ok(Box::new(NistSource::new(FsTransport::new(&path)))),
    }
}
