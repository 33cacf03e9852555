//! File persistence configuration for the append-only archive.

use crate::domain::SeriesKey;

pub struct ArchiveConfig {
    /// Root directory holding the `klines/` and `depths/` tables
    pub root_dir: &'static str,
    pub kline_subdir: &'static str,
    pub depth_subdir: &'static str,
    pub table_extension: &'static str,
    /// Log a progress line every N rows written by the live recorder
    pub recorder_log_every_bars: u64,
    pub recorder_log_every_depths: u64,
}

pub const ARCHIVE: ArchiveConfig = ArchiveConfig {
    root_dir: "data/csv",
    kline_subdir: "klines",
    depth_subdir: "depths",
    table_extension: "csv",
    recorder_log_every_bars: 100,
    recorder_log_every_depths: 1000,
};

/// Example: "btcusdt_1m.csv"
pub fn bar_table_filename(key: &SeriesKey) -> String {
    format!("{}.{}", key.file_stem(), ARCHIVE.table_extension)
}

/// Example: "btcusdt_depths.csv"
pub fn depth_table_filename(symbol: &str) -> String {
    format!("{}_depths.{}", symbol, ARCHIVE.table_extension)
}
