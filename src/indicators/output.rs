use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use csv::WriterBuilder;

use crate::domain::SeriesKey;
use crate::error::CacheResult;

pub const BASE_COLUMNS: [&str; 13] = [
    "ts",
    "datetime",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "quote_volume",
    "price_mean",
    "price_std",
    "volume_mean",
    "volume_std",
    "pv_corr",
];

pub const COARSE_COLUMNS: [&str; 7] = [
    "ts",
    "datetime",
    "pv_corr",
    "fast_ema",
    "slow_ema",
    "slow_std",
    "zscore",
];

const BASE_SUFFIX: &str = "_factor.csv";
const COARSE_SUFFIX: &str = "_factor_coarse.csv";

/// Example: "log/indicators/btcusdt_1m_factor.csv"
pub fn base_log_path(dir: &Path, key: &SeriesKey) -> PathBuf {
    dir.join(format!("{}{}", key.file_stem(), BASE_SUFFIX))
}

/// Example: "log/indicators/btcusdt_1m_factor_coarse.csv"
pub fn coarse_log_path(dir: &Path, key: &SeriesKey) -> PathBuf {
    dir.join(format!("{}{}", key.file_stem(), COARSE_SUFFIX))
}

/// Missing values are written as empty fields.
pub fn format_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Append-only CSV log with a header written on first use.
#[derive(Debug, Clone)]
pub struct IndicatorLog {
    path: PathBuf,
    header: &'static [&'static str],
}

impl IndicatorLog {
    pub fn new(path: PathBuf, header: &'static [&'static str]) -> Self {
        Self { path, header }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &[String]) -> CacheResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record(self.header)?;
        }
        writer.write_record(record)?;
        writer.flush()?;
        Ok(())
    }
}

/// Delete factor logs left by a previous run. Returns how many were removed.
pub fn clear_previous_outputs(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_factor_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(BASE_SUFFIX) || n.ends_with(COARSE_SUFFIX));
        if !is_factor_log {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Removed old factor log {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove {}: {}", path.display(), e),
        }
    }
    removed
}
