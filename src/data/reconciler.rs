use std::sync::Arc;

use itertools::Itertools;
use parking_lot::Mutex;
use tokio::time::sleep;

#[cfg(debug_assertions)]
use crate::config::DEBUG_FLAGS;
use crate::archive::PersistentArchive;
use crate::config::ReconcilerConfig;
use crate::data::history_source::RemoteHistorySource;
use crate::domain::{Bar, Gap, SeriesKey, TimeRange};

/// What one `ensure_coverage` pass found and did.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    pub key: SeriesKey,
    pub requested: TimeRange,
    pub gaps: Vec<Gap>,
    pub fetch_calls: usize,
    pub rows_fetched: usize,
    pub rows_appended: usize,
    pub rows_returned: usize,
}

impl CoverageReport {
    fn new(key: &SeriesKey, requested: TimeRange) -> Self {
        Self {
            key: key.clone(),
            requested,
            gaps: Vec::new(),
            fetch_calls: 0,
            rows_fetched: 0,
            rows_appended: 0,
            rows_returned: 0,
        }
    }
}

/// Sub-ranges of [start, end] not covered by `archived` (sorted by open time).
///
/// Neighbouring rows only count as a hole when more than one interval
/// separates them, so contiguous bars (close + 1 == next open) never produce
/// a gap.
pub fn find_gaps(archived: &[Bar], start: i64, end: i64, interval_ms: i64) -> Vec<Gap> {
    if end < start {
        return Vec::new();
    }
    let (Some(first), Some(last)) = (archived.first(), archived.last()) else {
        return vec![TimeRange::new(start, end)];
    };

    let mut gaps = Vec::new();
    if start < first.open_time {
        gaps.push(TimeRange::new(start, first.open_time - 1));
    }
    gaps.extend(
        archived
            .iter()
            .tuple_windows()
            .filter(|(cur, next)| next.open_time - cur.close_time > interval_ms)
            .map(|(cur, next)| TimeRange::new(cur.close_time + 1, next.open_time - 1)),
    );
    if end > last.close_time {
        gaps.push(TimeRange::new(last.close_time + 1, end));
    }
    gaps
}

/// Keeps the archive covering requested ranges by pulling holes from a
/// remote history source.
pub struct GapReconciler {
    archive: Arc<PersistentArchive>,
    source: Arc<dyn RemoteHistorySource>,
    config: ReconcilerConfig,
    last_report: Mutex<Option<CoverageReport>>,
}

impl GapReconciler {
    pub fn new(
        archive: Arc<PersistentArchive>,
        source: Arc<dyn RemoteHistorySource>,
        config: ReconcilerConfig,
    ) -> Self {
        log::info!("Reconciler using history source: {}", source.signature());
        Self {
            archive,
            source,
            config,
            last_report: Mutex::new(None),
        }
    }

    pub fn archive(&self) -> &Arc<PersistentArchive> {
        &self.archive
    }

    pub fn last_report(&self) -> Option<CoverageReport> {
        self.last_report.lock().clone()
    }

    /// Make sure the archive covers [start, end] as far as the remote allows,
    /// then return the merged, de-duplicated rows in open-time order.
    ///
    /// Holes the remote cannot fill stay open and are simply retried on the
    /// next call. Fetch failures are logged, never returned.
    pub async fn ensure_coverage(&self, key: &SeriesKey, start: i64, end: i64) -> Vec<Bar> {
        let mut report = CoverageReport::new(key, TimeRange::new(start, end));
        if report.requested.is_empty() {
            *self.last_report.lock() = Some(report);
            return Vec::new();
        }

        let archived = self.archive.read_bars(key, start, end);
        report.gaps = find_gaps(&archived, start, end, key.interval_ms());
        if report.gaps.is_empty() {
            report.rows_returned = archived.len();
            *self.last_report.lock() = Some(report);
            return archived;
        }

        log::info!("{} has {} missing range(s) in [{}, {}]", key, report.gaps.len(), start, end);
        for gap in report.gaps.clone() {
            let fetched = self.fill_gap(key, gap, &mut report).await;
            if fetched.is_empty() {
                continue;
            }
            report.rows_fetched += fetched.len();
            match self.archive.append_bars(key, &fetched) {
                Ok(written) => report.rows_appended += written,
                Err(e) => log::error!("{} failed to archive {} fetched bars: {}", key, fetched.len(), e),
            }
        }

        let merged = self.archive.read_bars(key, start, end);
        report.rows_returned = merged.len();
        log::info!(
            "{} coverage pass: {} fetch call(s), {} row(s) appended, {} row(s) in range",
            key,
            report.fetch_calls,
            report.rows_appended,
            report.rows_returned
        );
        *self.last_report.lock() = Some(report);
        merged
    }

    /// Page through one gap. Stops on a short page, an exhausted window, a
    /// source that stops advancing, a failure, or the page cap.
    async fn fill_gap(&self, key: &SeriesKey, gap: Gap, report: &mut CoverageReport) -> Vec<Bar> {
        let page_limit = self.source.page_limit().max(1);
        let mut window_start = gap.start;
        let mut collected: Vec<Bar> = Vec::new();

        for _ in 0..self.config.max_pages_per_gap {
            if window_start > gap.end {
                break;
            }
            sleep(self.config.request_delay).await;
            report.fetch_calls += 1;

            let page = match self.source.fetch(key, window_start, gap.end).await {
                Ok(page) => page,
                Err(e) if e.is_transient() => {
                    log::warn!("{} gap {} left open: {}", key, gap, e);
                    break;
                }
                Err(e) => {
                    log::error!("{} gap {} cannot be filled: {}", key, gap, e);
                    break;
                }
            };

            #[cfg(debug_assertions)]
            if DEBUG_FLAGS.print_gap_details {
                log::info!(
                    "{} gap {} page from {}: {} bar(s)",
                    key,
                    gap,
                    window_start,
                    page.len()
                );
            }

            let page_len = page.len();
            let Some(last_close) = page.last().map(|bar| bar.close_time) else {
                break;
            };
            collected.extend(page.into_iter().filter(|bar| bar.is_closed));

            if page_len < page_limit {
                break;
            }
            let next_start = last_close + 1;
            if next_start <= window_start {
                log::warn!("{} source stopped advancing at {}", key, window_start);
                break;
            }
            window_start = next_start;
        }
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Interval;
    use crate::error::CacheError;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Serves bars from a fixed list, `limit` at a time, and records each call.
    struct PagedSource {
        bars: Vec<Bar>,
        limit: usize,
        calls: Mutex<Vec<(i64, i64)>>,
        fail: bool,
    }

    impl PagedSource {
        fn new(bars: Vec<Bar>, limit: usize) -> Self {
            Self {
                bars,
                limit,
                calls: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl RemoteHistorySource for PagedSource {
        async fn fetch(&self, key: &SeriesKey, start_ms: i64, end_ms: i64) -> Result<Vec<Bar>, CacheError> {
            self.calls.lock().push((start_ms, end_ms));
            if self.fail {
                return Err(CacheError::TransientFetch {
                    key: key.clone(),
                    reason: "connection reset".to_string(),
                });
            }
            Ok(self
                .bars
                .iter()
                .filter(|b| b.open_time >= start_ms && b.open_time <= end_ms)
                .take(self.limit)
                .cloned()
                .collect())
        }

        fn page_limit(&self) -> usize {
            self.limit
        }

        fn signature(&self) -> &'static str {
            "Test pages"
        }
    }

    fn one_second_key() -> SeriesKey {
        SeriesKey::new("btcusdt", Interval::S1)
    }

    fn bar(open_time: i64) -> Bar {
        Bar::closed(open_time, 1000, open_time as f64, 1.0)
    }

    fn config() -> ReconcilerConfig {
        ReconcilerConfig {
            request_delay: Duration::ZERO,
            ..ReconcilerConfig::default()
        }
    }

    fn reconciler(dir: &std::path::Path, source: Arc<PagedSource>) -> GapReconciler {
        let archive = Arc::new(PersistentArchive::new(dir));
        GapReconciler::new(archive, source, config())
    }

    #[test]
    fn gaps_for_empty_archive_cover_whole_range() {
        assert_eq!(find_gaps(&[], 10, 20, 1000), vec![TimeRange::new(10, 20)]);
        assert!(find_gaps(&[], 20, 10, 1000).is_empty());
    }

    #[test]
    fn gaps_before_between_and_after() {
        let archived = vec![bar(2000), bar(3000), bar(6000)];
        let gaps = find_gaps(&archived, 0, 9000, 1000);
        assert_eq!(
            gaps,
            vec![
                TimeRange::new(0, 1999),
                TimeRange::new(4000, 5999),
                TimeRange::new(7000, 9000),
            ]
        );
    }

    #[test]
    fn gaps_never_overlap_archived_coverage() {
        let archived = vec![bar(0), bar(1000), bar(4000), bar(5000), bar(9000)];
        let gaps = find_gaps(&archived, 0, 12_000, 1000);
        for gap in &gaps {
            for b in &archived {
                assert!(!gap.overlaps(&TimeRange::new(b.open_time, b.close_time)));
            }
        }
        // Everything in range is covered by a bar or a gap.
        for t in (0..=12_000).step_by(250) {
            let covered = archived.iter().any(|b| b.covers(t)) || gaps.iter().any(|g| g.contains(t));
            assert!(covered, "{t} neither archived nor reported missing");
        }
    }

    #[tokio::test]
    async fn paginates_until_short_page() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(PagedSource::new(
            vec![bar(1000), bar(2000), bar(3000), bar(4000), bar(5000)],
            3,
        ));
        let reconciler = reconciler(dir.path(), source.clone());
        let key = one_second_key();

        let rows = reconciler.ensure_coverage(&key, 1000, 5000).await;
        assert_eq!(source.call_count(), 2);
        assert_eq!(source.calls.lock()[1], (4000, 5000));
        let opens: Vec<i64> = rows.iter().map(|b| b.open_time).collect();
        assert_eq!(opens, vec![1000, 2000, 3000, 4000, 5000]);

        let report = reconciler.last_report().unwrap();
        assert_eq!(report.fetch_calls, 2);
        assert_eq!(report.rows_appended, 5);

        // Second pass: nothing missing, nothing fetched, same answer.
        let again = reconciler.ensure_coverage(&key, 1000, 5000).await;
        assert_eq!(source.call_count(), 2);
        assert_eq!(again, rows);
        assert!(reconciler.last_report().unwrap().gaps.is_empty());
    }

    #[tokio::test]
    async fn only_missing_ranges_are_requested() {
        let dir = tempfile::tempdir().unwrap();
        let all: Vec<Bar> = (0..10).map(|i| bar(i * 1000)).collect();
        let source = Arc::new(PagedSource::new(all.clone(), 1000));
        let reconciler = reconciler(dir.path(), source.clone());
        let key = one_second_key();
        reconciler
            .archive()
            .append_bars(&key, &[all[0].clone(), all[1].clone(), all[5].clone()])
            .unwrap();

        let rows = reconciler.ensure_coverage(&key, 0, 9999).await;
        assert_eq!(rows.len(), 10);
        assert_eq!(*source.calls.lock(), vec![(2000, 4999), (6000, 9999)]);
    }

    #[tokio::test]
    async fn unfillable_gap_stays_open_and_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(PagedSource::new(Vec::new(), 1000));
        let reconciler = reconciler(dir.path(), source.clone());
        let key = one_second_key();

        assert!(reconciler.ensure_coverage(&key, 0, 5000).await.is_empty());
        assert!(reconciler.ensure_coverage(&key, 0, 5000).await.is_empty());
        assert_eq!(source.call_count(), 2);
        assert_eq!(reconciler.last_report().unwrap().gaps, vec![TimeRange::new(0, 5000)]);
    }

    #[tokio::test]
    async fn fetch_failure_returns_archived_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut failing = PagedSource::new(Vec::new(), 1000);
        failing.fail = true;
        let source = Arc::new(failing);
        let reconciler = reconciler(dir.path(), source.clone());
        let key = one_second_key();
        reconciler.archive().append_bars(&key, &[bar(0)]).unwrap();

        let rows = reconciler.ensure_coverage(&key, 0, 5000).await;
        assert_eq!(rows, vec![bar(0)]);
        assert_eq!(source.call_count(), 1);
        assert_eq!(reconciler.last_report().unwrap().rows_appended, 0);
    }

    #[tokio::test]
    async fn stalled_source_does_not_loop() {
        /// Always returns the same full page regardless of the window.
        struct StuckSource;

        #[async_trait]
        impl RemoteHistorySource for StuckSource {
            async fn fetch(&self, _key: &SeriesKey, _s: i64, _e: i64) -> Result<Vec<Bar>, CacheError> {
                Ok(vec![bar(0)])
            }
            fn page_limit(&self) -> usize {
                1
            }
            fn signature(&self) -> &'static str {
                "Stuck"
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(PersistentArchive::new(dir.path()));
        let reconciler = GapReconciler::new(archive, Arc::new(StuckSource), config());
        let key = one_second_key();
        // First page moves the window to 1000, the second page does not advance.
        let rows = reconciler.ensure_coverage(&key, 0, 5000).await;
        assert_eq!(rows, vec![bar(0)]);
        assert_eq!(reconciler.last_report().unwrap().fetch_calls, 2);
    }
}
