use std::sync::Arc;

#[cfg(debug_assertions)]
use crate::config::DEBUG_FLAGS;
use crate::archive::PersistentArchive;
use crate::config::{CatalogConfig, IndicatorConfig, ReconcilerConfig};
use crate::data::{CoverageReport, GapReconciler, RemoteHistorySource};
use crate::domain::{Bar, DepthSnapshot, SeriesKey};
use crate::error::CacheResult;
use crate::feed::{ArchiveRecorder, FeedHub, replay_archive};
use crate::indicators::{Phase, StreamingIndicatorEngine};
use crate::store::{CatalogStatus, SeriesCatalog};

#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub catalog: CatalogConfig,
    pub reconciler: ReconcilerConfig,
    pub indicator: IndicatorConfig,
}

#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub catalog: CatalogStatus,
    pub bars_recorded: u64,
    pub depths_recorded: u64,
    pub bars_published: u64,
    pub bars_replayed: u64,
    pub last_coverage: Option<CoverageReport>,
    pub feed_stopped: bool,
}

/// Owns the whole caching stack: archive, reconciler, catalog, feed hub,
/// recorder and indicator engine. Dropping it (or calling `shutdown`) is the
/// only way the per-key stores go away.
pub struct MarketDataService {
    archive: Arc<PersistentArchive>,
    reconciler: Arc<GapReconciler>,
    catalog: Arc<SeriesCatalog>,
    hub: Arc<FeedHub>,
    recorder: Arc<ArchiveRecorder>,
    indicators: Arc<StreamingIndicatorEngine>,
}

impl MarketDataService {
    pub fn new(config: ServiceConfig, source: Arc<dyn RemoteHistorySource>) -> CacheResult<Self> {
        let archive = Arc::new(PersistentArchive::new(config.reconciler.archive_root.clone()));
        let reconciler = Arc::new(GapReconciler::new(archive.clone(), source, config.reconciler));
        let catalog = Arc::new(SeriesCatalog::new(config.catalog, reconciler.clone())?);
        let recorder = Arc::new(ArchiveRecorder::new(archive.clone()));
        let indicators = Arc::new(StreamingIndicatorEngine::new(config.indicator)?);

        // Stores first, so strategy code reading on an indicator update sees the bar.
        let hub = Arc::new(FeedHub::new());
        hub.subscribe(catalog.clone());
        hub.subscribe(recorder.clone());
        hub.subscribe(indicators.clone());

        log::info!("Market data service ready (archive at {})", archive.root().display());
        Ok(Self {
            archive,
            reconciler,
            catalog,
            hub,
            recorder,
            indicators,
        })
    }

    pub fn archive(&self) -> &Arc<PersistentArchive> {
        &self.archive
    }

    pub fn catalog(&self) -> &Arc<SeriesCatalog> {
        &self.catalog
    }

    /// Producers publish live bars and depth snapshots here.
    pub fn hub(&self) -> &Arc<FeedHub> {
        &self.hub
    }

    pub fn indicators(&self) -> &Arc<StreamingIndicatorEngine> {
        &self.indicators
    }

    pub async fn prepare(&self, key: &SeriesKey, start: i64, end: i64) -> Vec<Bar> {
        self.catalog
            .prepare(key.symbol(), key.interval, start, end)
            .await
    }

    /// Feed archived bars to the stores and the indicator engine. Live
    /// ingestion keeps being recorded while this runs.
    pub fn replay(&self, key: &SeriesKey, start: i64, end: i64) -> usize {
        replay_archive(&self.archive, &self.hub, key, start, end)
    }

    /// The last `count` bars held for `key`, oldest first.
    pub fn recent(&self, key: &SeriesKey, count: usize) -> Vec<Bar> {
        self.catalog.tail(key, count)
    }

    pub fn latest_price(&self, key: &SeriesKey) -> Option<f64> {
        self.catalog.get(key)?.latest().map(|bar| bar.close)
    }

    pub fn latest_depth(&self, symbol: &str) -> Option<DepthSnapshot> {
        self.catalog.get_depth(symbol)?.latest()
    }

    pub fn phase(&self, key: &SeriesKey) -> Phase {
        self.indicators.phase(key)
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            catalog: self.catalog.status(),
            bars_recorded: self.recorder.bars_stored(),
            depths_recorded: self.recorder.depths_stored(),
            bars_published: self.hub.bars_published(),
            bars_replayed: self.hub.bars_replayed(),
            last_coverage: self.reconciler.last_report(),
            feed_stopped: self.hub.is_stopped(),
        }
    }

    /// Stop intake and drop every store. A fetch already in flight finishes
    /// on its own.
    pub fn shutdown(&self) {
        self.hub.stop();
        self.catalog.clear();
        #[cfg(debug_assertions)]
        if DEBUG_FLAGS.print_shutdown {
            log::info!(
                "Shutdown: {} bar(s) and {} depth snapshot(s) recorded",
                self.recorder.bars_stored(),
                self.recorder.depths_stored()
            );
        }
    }
}
