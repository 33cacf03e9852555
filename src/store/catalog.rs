use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::CatalogConfig;
use crate::data::GapReconciler;
use crate::domain::{Bar, DepthSnapshot, Interval, SeriesKey, normalize_symbol};
use crate::error::{CacheError, CacheResult};
use crate::feed::FeedListener;
use crate::store::{BoundedSeriesStore, DepthSnapshotStore};

/// Point-in-time view of one series store.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesStatus {
    pub key: SeriesKey,
    pub count: usize,
    pub bounds: Option<(i64, i64)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogStatus {
    pub series: Vec<SeriesStatus>,
    /// (symbol, latest snapshot timestamp, snapshots retained)
    pub depths: Vec<(String, Option<i64>, usize)>,
}

/// One store per series key and one depth history per symbol, created on
/// first access and kept for the catalog's lifetime.
pub struct SeriesCatalog {
    series_capacity: NonZeroUsize,
    depth_capacity: NonZeroUsize,
    reconciler: Arc<GapReconciler>,
    series: Mutex<HashMap<SeriesKey, Arc<BoundedSeriesStore>>>,
    depths: Mutex<HashMap<String, Arc<DepthSnapshotStore>>>,
}

impl SeriesCatalog {
    pub fn new(config: CatalogConfig, reconciler: Arc<GapReconciler>) -> CacheResult<Self> {
        let series_capacity = NonZeroUsize::new(config.series_capacity)
            .ok_or_else(|| CacheError::capacity("series store", config.series_capacity))?;
        let depth_capacity = NonZeroUsize::new(config.depth_capacity)
            .ok_or_else(|| CacheError::capacity("depth store", config.depth_capacity))?;
        Ok(Self {
            series_capacity,
            depth_capacity,
            reconciler,
            series: Mutex::new(HashMap::new()),
            depths: Mutex::new(HashMap::new()),
        })
    }

    pub fn reconciler(&self) -> &Arc<GapReconciler> {
        &self.reconciler
    }

    pub fn get_or_create(&self, symbol: &str, interval: Interval) -> Arc<BoundedSeriesStore> {
        self.get_or_create_key(&SeriesKey::new(symbol, interval))
    }

    pub fn get_or_create_key(&self, key: &SeriesKey) -> Arc<BoundedSeriesStore> {
        self.series
            .lock()
            .entry(key.clone())
            .or_insert_with(|| {
                log::debug!("Creating series store for {}", key);
                Arc::new(BoundedSeriesStore::with_capacity(key.clone(), self.series_capacity))
            })
            .clone()
    }

    pub fn get(&self, key: &SeriesKey) -> Option<Arc<BoundedSeriesStore>> {
        self.series.lock().get(key).cloned()
    }

    pub fn get_or_create_depth(&self, symbol: &str) -> Arc<DepthSnapshotStore> {
        let symbol = normalize_symbol(symbol);
        self.depths
            .lock()
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(DepthSnapshotStore::with_capacity(&symbol, self.depth_capacity)))
            .clone()
    }

    pub fn get_depth(&self, symbol: &str) -> Option<Arc<DepthSnapshotStore>> {
        self.depths.lock().get(&normalize_symbol(symbol)).cloned()
    }

    /// Bars for [start, end] from the live store, after making sure the
    /// archive covers the range as far as the remote source allows.
    pub async fn prepare(&self, symbol: &str, interval: Interval, start: i64, end: i64) -> Vec<Bar> {
        let key = SeriesKey::new(symbol, interval);
        let merged = self.reconciler.ensure_coverage(&key, start, end).await;
        let store = self.get_or_create_key(&key);
        let inserted = store.extend(merged);
        log::debug!("{} prepare [{}, {}]: {} new bar(s) in store", key, start, end, inserted);
        store.range(start, end)
    }

    /// Range query that never creates a store; unknown keys give nothing.
    pub fn range(&self, key: &SeriesKey, start: i64, end: i64) -> Vec<Bar> {
        self.get(key).map(|s| s.range(start, end)).unwrap_or_default()
    }

    /// Last `count` bars for `key`, oldest first. Never creates a store.
    pub fn tail(&self, key: &SeriesKey, count: usize) -> Vec<Bar> {
        self.get(key).map(|s| s.tail(count)).unwrap_or_default()
    }

    pub fn ingest_bar(&self, key: &SeriesKey, bar: &Bar) {
        if !self.get_or_create_key(key).upsert_live(bar.clone()) {
            log::debug!("{} dropped provisional update for closed bar {}", key, bar.open_time);
        }
    }

    pub fn ingest_depth(&self, symbol: &str, snapshot: &DepthSnapshot) {
        self.get_or_create_depth(symbol).push(snapshot.clone());
    }

    pub fn status(&self) -> CatalogStatus {
        let mut series: Vec<SeriesStatus> = self
            .series
            .lock()
            .values()
            .map(|store| SeriesStatus {
                key: store.key().clone(),
                count: store.count(),
                bounds: store.bounds(),
            })
            .collect();
        series.sort_by(|a, b| a.key.cmp(&b.key));

        let mut depths: Vec<(String, Option<i64>, usize)> = self
            .depths
            .lock()
            .values()
            .map(|store| (store.symbol().to_string(), store.latest().map(|s| s.timestamp), store.len()))
            .collect();
        depths.sort();

        CatalogStatus { series, depths }
    }

    /// Drop every store. Handles already given out stay valid but detached.
    pub fn clear(&self) {
        let series = std::mem::take(&mut *self.series.lock());
        let depths = std::mem::take(&mut *self.depths.lock());
        log::info!("Catalog cleared ({} series, {} depth histories)", series.len(), depths.len());
    }
}

impl FeedListener for SeriesCatalog {
    fn on_bar(&self, key: &SeriesKey, bar: &Bar) {
        self.ingest_bar(key, bar);
    }

    fn on_depth(&self, symbol: &str, snapshot: &DepthSnapshot) {
        self.ingest_depth(symbol, snapshot);
    }

    fn name(&self) -> &'static str {
        "series catalog"
    }
}
