//! Append-only CSV archive.
//!
//! One table per (symbol, interval) under `klines/` and one per symbol under
//! `depths/`. Rows are only ever appended; uniqueness by `open_time` is applied
//! when reading (last appended row wins).

pub mod rows;

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord, Trim, Writer, WriterBuilder};
use parking_lot::Mutex;

#[cfg(debug_assertions)]
use crate::config::DEBUG_FLAGS;
use crate::config::{ARCHIVE, bar_table_filename, depth_table_filename};
use crate::domain::{Bar, DepthSnapshot, SeriesKey};
use crate::error::{CacheError, CacheResult};
use crate::utils::time_utils::stored_at_now;
use rows::{BAR_COLUMNS, DEPTH_COLUMNS, REQUIRED_BAR_COLUMNS, REQUIRED_DEPTH_COLUMNS};

pub struct PersistentArchive {
    root: PathBuf,
    // One lock per table file, shared by live recording and backfill writers.
    table_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PersistentArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            table_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bar_table_path(&self, key: &SeriesKey) -> PathBuf {
        self.root
            .join(ARCHIVE.kline_subdir)
            .join(bar_table_filename(key))
    }

    pub fn depth_table_path(&self, symbol: &str) -> PathBuf {
        self.root
            .join(ARCHIVE.depth_subdir)
            .join(depth_table_filename(symbol))
    }

    fn table_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        self.table_locks
            .lock()
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append one row per item to `path`, writing `header` first if the
    /// table is new or empty. Caller holds the table lock.
    fn append_rows<T, F>(path: &Path, header: &[&str], items: &[T], mut write: F) -> CacheResult<usize>
    where
        F: FnMut(&mut Writer<File>, &T) -> csv::Result<()>,
    {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record(header)?;
        }
        for item in items {
            write(&mut writer, item)?;
        }
        writer.flush()?;
        Ok(items.len())
    }

    /// Append every bar for `key`. Never rewrites existing rows.
    pub fn append_bars(&self, key: &SeriesKey, bars: &[Bar]) -> CacheResult<usize> {
        if bars.is_empty() {
            return Ok(0);
        }
        let path = self.bar_table_path(key);
        let stored_at = stored_at_now();
        let lock = self.table_lock(&path);
        let _guard = lock.lock();
        Self::append_rows(&path, &BAR_COLUMNS, bars, |writer, bar| {
            rows::write_bar(writer, key, bar, &stored_at)
        })
    }

    pub fn append_depth(&self, symbol: &str, snapshots: &[DepthSnapshot]) -> CacheResult<usize> {
        if snapshots.is_empty() {
            return Ok(0);
        }
        let path = self.depth_table_path(symbol);
        let stored_at = stored_at_now();
        let lock = self.table_lock(&path);
        let _guard = lock.lock();
        Self::append_rows(&path, &DEPTH_COLUMNS, snapshots, |writer, snapshot| {
            rows::write_depth(writer, symbol, snapshot, &stored_at)
        })
    }

    /// Read every parseable row of a table in file order. Missing, unreadable
    /// or header-less tables yield nothing; malformed rows are logged and
    /// skipped.
    fn scan_table<T>(
        &self,
        path: &Path,
        required: &[&str],
        parse: fn(&StringRecord, &StringRecord) -> Result<T, String>,
    ) -> Vec<T> {
        let lock = self.table_lock(path);
        let _guard = lock.lock();

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!("Archive table {} unreadable: {}", path.display(), e);
                return Vec::new();
            }
        };
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::All)
            .from_reader(file);
        let headers = match reader.headers() {
            Ok(headers) => headers.clone(),
            Err(e) => {
                log::warn!("Archive table {} has no usable header: {}", path.display(), e);
                return Vec::new();
            }
        };
        if !rows::has_columns(&headers, required) {
            log::warn!("Archive table {} is missing required columns", path.display());
            return Vec::new();
        }

        let mut parsed = Vec::new();
        let mut dropped = 0usize;
        for result in reader.records() {
            let outcome = result
                .map_err(|e| (e.position().map_or(0, |p| p.line()), e.to_string()))
                .and_then(|record| {
                    let line = record.position().map_or(0, |p| p.line());
                    parse(&headers, &record).map_err(|reason| (line, reason))
                });
            match outcome {
                Ok(row) => parsed.push(row),
                Err((line, reason)) => {
                    dropped += 1;
                    let err = CacheError::MalformedRecord {
                        table: path.display().to_string(),
                        line,
                        reason,
                    };
                    log::warn!("{}", err);
                }
            }
        }

        #[cfg(debug_assertions)]
        if DEBUG_FLAGS.print_archive_reads {
            log::info!(
                "Archive read {}: {} rows kept, {} dropped",
                path.display(),
                parsed.len(),
                dropped
            );
        }
        #[cfg(not(debug_assertions))]
        let _ = dropped;

        parsed
    }

    /// Rows whose [open_time, close_time] overlaps [start, end], ascending by
    /// open time, one row per open time (the most recently appended).
    pub fn read_bars(&self, key: &SeriesKey, start: i64, end: i64) -> Vec<Bar> {
        if end < start {
            return Vec::new();
        }
        let path = self.bar_table_path(key);
        let mut latest_by_open: BTreeMap<i64, Bar> = BTreeMap::new();
        for bar in self.scan_table(&path, &REQUIRED_BAR_COLUMNS, rows::parse_bar) {
            if bar.overlaps(start, end) {
                latest_by_open.insert(bar.open_time, bar);
            }
        }
        latest_by_open.into_values().collect()
    }

    /// Snapshots with `start <= timestamp <= end`, timestamp order, stable for
    /// equal timestamps.
    pub fn read_depth(&self, symbol: &str, start: i64, end: i64) -> Vec<DepthSnapshot> {
        let path = self.depth_table_path(symbol);
        let mut snapshots: Vec<DepthSnapshot> = self
            .scan_table(&path, &REQUIRED_DEPTH_COLUMNS, rows::parse_depth)
            .into_iter()
            .filter(|s| start <= s.timestamp && s.timestamp <= end)
            .collect();
        snapshots.sort_by_key(|s| s.timestamp);
        snapshots
    }

    pub fn latest_close_time(&self, key: &SeriesKey) -> Option<i64> {
        let path = self.bar_table_path(key);
        self.scan_table(&path, &REQUIRED_BAR_COLUMNS, rows::parse_bar)
            .iter()
            .map(|bar| bar.close_time)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Interval;
    use std::io::Write;

    fn key() -> SeriesKey {
        SeriesKey::new("btcusdt", Interval::M1)
    }

    fn bar(open_time: i64, close: f64) -> Bar {
        Bar::closed(open_time, 60_000, close, 1.0)
    }

    #[test]
    fn missing_table_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let archive = PersistentArchive::new(dir.path());
        assert!(archive.read_bars(&key(), 0, i64::MAX).is_empty());
        assert!(archive.read_depth("btcusdt", 0, i64::MAX).is_empty());
        assert_eq!(archive.latest_close_time(&key()), None);
    }

    #[test]
    fn header_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let archive = PersistentArchive::new(dir.path());
        archive.append_bars(&key(), &[bar(0, 1.0)]).unwrap();
        archive.append_bars(&key(), &[bar(60_000, 2.0)]).unwrap();

        let text = fs::read_to_string(archive.bar_table_path(&key())).unwrap();
        let header_lines = text.lines().filter(|l| l.starts_with("symbol,")).count();
        assert_eq!(header_lines, 1);
        assert_eq!(text.lines().count(), 3);
        assert!(archive.bar_table_path(&key()).ends_with("klines/btcusdt_1m.csv"));
    }

    #[test]
    fn duplicate_appends_resolve_to_last_written() {
        let dir = tempfile::tempdir().unwrap();
        let archive = PersistentArchive::new(dir.path());
        archive
            .append_bars(&key(), &[bar(0, 1.0), bar(60_000, 2.0)])
            .unwrap();
        archive
            .append_bars(&key(), &[bar(60_000, 20.0), bar(0, 10.0)])
            .unwrap();

        let rows = archive.read_bars(&key(), 0, i64::MAX);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].open_time, 0);
        assert_eq!(rows[0].close, 10.0);
        assert_eq!(rows[1].close, 20.0);
        assert_eq!(archive.latest_close_time(&key()), Some(119_999));
    }

    #[test]
    fn read_filters_by_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let archive = PersistentArchive::new(dir.path());
        let bars: Vec<Bar> = (0..5).map(|i| bar(i * 60_000, i as f64)).collect();
        archive.append_bars(&key(), &bars).unwrap();

        // 119_999 is the last millisecond of the second bar
        let rows = archive.read_bars(&key(), 119_999, 180_000);
        let opens: Vec<i64> = rows.iter().map(|b| b.open_time).collect();
        assert_eq!(opens, vec![60_000, 120_000, 180_000]);
    }

    #[test]
    fn malformed_rows_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = PersistentArchive::new(dir.path());
        archive.append_bars(&key(), &[bar(0, 1.0)]).unwrap();
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(archive.bar_table_path(&key()))
                .unwrap();
            writeln!(file, "btcusdt,1m,60000,119999,1,1,1,not-a-price,1,1,0,0,0,True,x,y,0").unwrap();
            writeln!(file, "btcusdt,1m,garbage").unwrap();
        }
        archive.append_bars(&key(), &[bar(120_000, 3.0)]).unwrap();

        let rows = archive.read_bars(&key(), 0, i64::MAX);
        let opens: Vec<i64> = rows.iter().map(|b| b.open_time).collect();
        assert_eq!(opens, vec![0, 120_000]);
    }

    #[test]
    fn legacy_table_without_stored_at_reads() {
        let dir = tempfile::tempdir().unwrap();
        let archive = PersistentArchive::new(dir.path());
        let path = archive.bar_table_path(&key());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            "open_time,close_time,open,high,low,close,volume,quote_volume,trade_count,taker_buy_volume,taker_buy_quote_volume,is_closed\n\
             0,59999,1.0,2.0,0.5,1.5,10,15,7,4,6,true\n",
        )
        .unwrap();
        let rows = archive.read_bars(&key(), 0, 0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trade_count, 7);
        assert!(rows[0].is_closed);
    }

    #[test]
    fn depth_rows_keep_append_order_for_equal_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let archive = PersistentArchive::new(dir.path());
        let first = DepthSnapshot::new(10, vec![1.0], vec![1.0], vec![2.0], vec![1.0]);
        let second = DepthSnapshot::new(10, vec![1.5], vec![1.0], vec![2.5], vec![1.0]);
        let earlier = DepthSnapshot::new(5, vec![], vec![], vec![3.0], vec![1.0]);
        archive
            .append_depth("btcusdt", &[first.clone(), second.clone(), earlier.clone()])
            .unwrap();

        let read = archive.read_depth("btcusdt", 0, 100);
        assert_eq!(read, vec![earlier, first, second]);
        assert!(archive.read_depth("btcusdt", 11, 100).is_empty());
    }
}
