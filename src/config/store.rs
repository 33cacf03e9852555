//! In-memory store and reconciliation settings.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ARCHIVE, BINANCE};

pub struct StoreLimits {
    /// Bars retained per (symbol, interval)
    pub series_capacity: usize,
    /// Depth snapshots retained per symbol
    pub depth_capacity: usize,
}

pub struct ReconcileLimits {
    /// Pause before every remote request (rate-limit compliance)
    pub request_delay_ms: u64,
}

pub struct StoreConfig {
    pub limits: StoreLimits,
    pub reconcile: ReconcileLimits,
}

pub const STORE: StoreConfig = StoreConfig {
    limits: StoreLimits {
        series_capacity: 10_000,
        depth_capacity: 1_000,
    },
    reconcile: ReconcileLimits {
        request_delay_ms: 100,
    },
};

/// Runtime settings for a `SeriesCatalog`.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub series_capacity: usize,
    pub depth_capacity: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            series_capacity: STORE.limits.series_capacity,
            depth_capacity: STORE.limits.depth_capacity,
        }
    }
}

/// Runtime settings for the archive + `GapReconciler` pair.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub archive_root: PathBuf,
    pub request_delay: Duration,
    /// Hard stop on pages per gap, guards against a source that never runs dry
    pub max_pages_per_gap: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            archive_root: PathBuf::from(ARCHIVE.root_dir),
            request_delay: Duration::from_millis(STORE.reconcile.request_delay_ms),
            max_pages_per_gap: BINANCE.limits.max_pages_per_gap,
        }
    }
}
