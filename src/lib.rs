#![allow(clippy::const_is_empty)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::collapsible_else_if)]
#![allow(clippy::type_complexity)]

// Core modules
pub mod archive;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod feed;
pub mod indicators;
pub mod store;
pub mod utils;

// Owner of the whole stack
pub mod service;

// Re-export commonly used types
pub use archive::PersistentArchive;
pub use data::{BinanceRestSource, GapReconciler, NoRemoteSource, RemoteHistorySource};
pub use domain::{Bar, DepthSnapshot, Interval, SeriesKey};
pub use error::{CacheError, CacheResult};
pub use feed::{FeedHub, FeedListener};
pub use indicators::StreamingIndicatorEngine;
pub use service::{MarketDataService, ServiceConfig, ServiceStatus};
pub use store::{BoundedSeriesStore, DepthSnapshotStore, SeriesCatalog};

// CLI argument parsing
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Symbol to prepare, e.g. BTCUSDT
    #[arg(long, default_value = "BTCUSDT")]
    pub symbol: String,

    /// Bar interval, e.g. 1m, 5m, 1h
    #[arg(long, default_value = "1m")]
    pub interval: String,

    /// Range start in epoch ms (defaults to `--hours` before the end)
    #[arg(long)]
    pub start_ms: Option<i64>,

    /// Range end in epoch ms (defaults to now)
    #[arg(long)]
    pub end_ms: Option<i64>,

    /// Lookback used when no start is given
    #[arg(long, default_value_t = 24)]
    pub hours: i64,

    /// Root of the CSV archive
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Where indicator logs are written
    #[arg(long)]
    pub indicator_dir: Option<PathBuf>,

    /// Serve from the archive only, never call the exchange
    #[arg(long, default_value_t = false)]
    pub offline: bool,

    /// Push the prepared range through the indicator engine afterwards
    #[arg(long, default_value_t = false)]
    pub replay: bool,
}

impl Cli {
    /// Resolve the requested [start, end] range against `now_ms`.
    pub fn range(&self, now_ms: i64) -> (i64, i64) {
        let end = self.end_ms.unwrap_or(now_ms);
        let start = self
            .start_ms
            .unwrap_or(end - self.hours * utils::TimeUtils::MS_IN_H);
        (start, end)
    }

    pub fn service_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        if let Some(dir) = &self.data_dir {
            config.reconciler.archive_root = dir.clone();
        }
        if let Some(dir) = &self.indicator_dir {
            config.indicator.output_dir = dir.clone();
        }
        config
    }
}
