use async_trait::async_trait;

use crate::domain::{Bar, SeriesKey};
use crate::error::CacheError;

/// Anything that can produce closed historical bars for a key over a range.
///
/// One call returns at most `page_limit()` bars, ordered by open time, all
/// closed. The reconciler pages through longer ranges itself.
#[async_trait]
pub trait RemoteHistorySource: Send + Sync {
    async fn fetch(&self, key: &SeriesKey, start_ms: i64, end_ms: i64) -> Result<Vec<Bar>, CacheError>;

    /// Largest page a single `fetch` may return.
    fn page_limit(&self) -> usize;

    /// A unique identifier for this implementation (so that afterwards we know which one we used).
    fn signature(&self) -> &'static str;
}

/// Source used when running offline: never has anything to add.
pub struct NoRemoteSource;

#[async_trait]
impl RemoteHistorySource for NoRemoteSource {
    async fn fetch(&self, _key: &SeriesKey, _start_ms: i64, _end_ms: i64) -> Result<Vec<Bar>, CacheError> {
        Ok(Vec::new())
    }

    fn page_limit(&self) -> usize {
        1
    }

    fn signature(&self) -> &'static str {
        "Offline (archive only)"
    }
}
