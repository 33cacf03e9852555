use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use strum_macros::Display;

#[cfg(debug_assertions)]
use crate::config::DEBUG_FLAGS;
use crate::config::{IndicatorConfig, VolumeSource};
use crate::domain::{Bar, SeriesKey};
use crate::error::{CacheError, CacheResult};
use crate::feed::FeedListener;
use crate::indicators::output::{
    BASE_COLUMNS, COARSE_COLUMNS, IndicatorLog, base_log_path, clear_previous_outputs, coarse_log_path, format_opt,
};
use crate::indicators::rolling::{
    MeanStd, ewm_mean, resample_last, rolling_corr, rolling_mean_std, winsorize, z_score,
};
use crate::utils::time_utils::epoch_ms_to_utc;

/// Per-series lifecycle. Only closed bars move it forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    AwaitingFirstBar,
    Accumulating,
    Ready,
}

/// One row of the base log: the closed bar plus its window statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseRow {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub price_mean: Option<f64>,
    pub price_std: Option<f64>,
    pub volume_mean: Option<f64>,
    pub volume_std: Option<f64>,
    pub pv_corr: Option<f64>,
}

impl BaseRow {
    fn new(bar: &Bar, price: MeanStd, volume: MeanStd, pv_corr: Option<f64>) -> Self {
        Self {
            ts: bar.open_time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            quote_volume: bar.quote_volume,
            price_mean: price.mean,
            price_std: price.std,
            volume_mean: volume.mean,
            volume_std: volume.std,
            pv_corr,
        }
    }

    fn record(&self) -> Vec<String> {
        vec![
            self.ts.to_string(),
            epoch_ms_to_utc(self.ts),
            self.open.to_string(),
            self.high.to_string(),
            self.low.to_string(),
            self.close.to_string(),
            self.volume.to_string(),
            self.quote_volume.to_string(),
            format_opt(self.price_mean),
            format_opt(self.price_std),
            format_opt(self.volume_mean),
            format_opt(self.volume_std),
            format_opt(self.pv_corr),
        ]
    }
}

/// One point of the coarse-grid normalised signal.
#[derive(Debug, Clone, PartialEq)]
pub struct CoarseRow {
    pub ts: i64,
    pub pv_corr: Option<f64>,
    pub fast_ema: Option<f64>,
    pub slow_ema: Option<f64>,
    pub slow_std: Option<f64>,
    pub zscore: Option<f64>,
}

impl CoarseRow {
    fn record(&self) -> Vec<String> {
        vec![
            self.ts.to_string(),
            epoch_ms_to_utc(self.ts),
            format_opt(self.pv_corr),
            format_opt(self.fast_ema),
            format_opt(self.slow_ema),
            format_opt(self.slow_std),
            format_opt(self.zscore),
        ]
    }
}

/// Statistics for every bar of a window, plus the coarse signal derived from
/// them.
#[derive(Debug, Clone, Default)]
pub struct WindowStats {
    pub price: Vec<MeanStd>,
    pub volume: Vec<MeanStd>,
    pub pv_corr: Vec<Option<f64>>,
    pub coarse: Vec<CoarseRow>,
}

/// Full recompute over `bars` (ascending open time, one interval apart or
/// with holes).
pub fn compute_window(bars: &[Bar], interval_ms: i64, config: &IndicatorConfig) -> WindowStats {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars
        .iter()
        .map(|b| match config.volume_source {
            VolumeSource::Quote => b.quote_volume,
            VolumeSource::Base => b.volume,
        })
        .collect();

    let as_samples = |v: &[f64]| v.iter().map(|&x| Some(x)).collect::<Vec<_>>();
    let price = rolling_mean_std(&as_samples(&closes), config.window, config.min_mean);
    let volume = rolling_mean_std(&as_samples(&volumes), config.window, config.min_mean);

    let clipped_price = winsorize(&closes, &price, config.clip_std_mult);
    let clipped_volume = winsorize(&volumes, &volume, config.clip_std_mult);
    let pv_corr = rolling_corr(&clipped_price, &clipped_volume, config.window, config.min_corr);

    let open_times: Vec<i64> = bars.iter().map(|b| b.open_time).collect();
    let coarse = coarse_signal(&open_times, &pv_corr, interval_ms * config.coarse_factor, config);

    WindowStats {
        price,
        volume,
        pv_corr,
        coarse,
    }
}

fn coarse_signal(open_times: &[i64], pv_corr: &[Option<f64>], bucket_ms: i64, config: &IndicatorConfig) -> Vec<CoarseRow> {
    let (labels, factor): (Vec<i64>, Vec<Option<f64>>) =
        resample_last(open_times, pv_corr, bucket_ms).into_iter().unzip();

    let fast = ewm_mean(&factor, config.fast_com, config.min_coarse_periods);
    let slow = ewm_mean(&factor, config.slow_com(), config.min_coarse_periods);
    let slow_std = rolling_mean_std(&factor, config.slow_std_window(), config.min_coarse_periods);

    labels
        .into_iter()
        .enumerate()
        .map(|(i, ts)| CoarseRow {
            ts,
            pv_corr: factor[i],
            fast_ema: fast[i],
            slow_ema: slow[i],
            slow_std: slow_std[i].std,
            zscore: z_score(fast[i], slow[i], slow_std[i].std),
        })
        .collect()
}

struct SeriesState {
    key: SeriesKey,
    window: BTreeMap<i64, Bar>,
    unsettled: Option<Bar>,
    phase: Phase,
    last_coarse_ts: Option<i64>,
    latest_row: Option<BaseRow>,
    latest_signal: Option<CoarseRow>,
}

/// Log rows produced by one closed bar, written after the state lock is
/// released.
#[derive(Default)]
struct PendingRows {
    base: Option<BaseRow>,
    coarse: Option<CoarseRow>,
}

impl SeriesState {
    fn new(key: &SeriesKey) -> Self {
        Self {
            key: key.clone(),
            window: BTreeMap::new(),
            unsettled: None,
            phase: Phase::AwaitingFirstBar,
            last_coarse_ts: None,
            latest_row: None,
            latest_signal: None,
        }
    }

    /// A provisional bar for a bucket the window already holds has been
    /// overtaken by its closed version.
    fn is_settled(&self, open_time: i64) -> bool {
        self.window
            .last_key_value()
            .is_some_and(|(&last, _)| open_time <= last)
    }

    fn on_closed(&mut self, bar: &Bar, config: &IndicatorConfig) -> PendingRows {
        let inserted_new = self.window.insert(bar.open_time, bar.clone()).is_none();
        while self.window.len() > config.keep_window {
            self.window.pop_first();
        }
        if self
            .unsettled
            .as_ref()
            .is_some_and(|u| u.open_time <= bar.open_time)
        {
            self.unsettled = None;
        }
        self.phase = if self.window.len() >= config.min_mean.max(config.min_corr) {
            Phase::Ready
        } else {
            Phase::Accumulating
        };

        let (row, coarse) = self.row_for(bar, config);
        self.latest_row = Some(row.clone());
        PendingRows {
            base: inserted_new.then_some(row),
            coarse,
        }
    }

    /// Statistics for `bar`, recomputing the whole window once it holds
    /// enough samples. Also returns the newest coarse point when one is due.
    fn row_for(&mut self, bar: &Bar, config: &IndicatorConfig) -> (BaseRow, Option<CoarseRow>) {
        let position = self.window.range(..bar.open_time).count();
        let still_retained = self.window.contains_key(&bar.open_time);
        if self.window.len() < config.min_samples() || !still_retained {
            return (BaseRow::new(bar, MeanStd::default(), MeanStd::default(), None), None);
        }

        let bars: Vec<Bar> = self.window.values().cloned().collect();
        let stats = compute_window(&bars, self.key.interval_ms(), config);
        let row = BaseRow::new(bar, stats.price[position], stats.volume[position], stats.pv_corr[position]);

        let mut due = None;
        if let Some(latest) = stats.coarse.iter().rev().find(|c| c.zscore.is_some()) {
            if self.last_coarse_ts.is_none_or(|last| latest.ts > last) {
                self.last_coarse_ts = Some(latest.ts);
                due = Some(latest.clone());
            }
            self.latest_signal = Some(latest.clone());
        }

        #[cfg(debug_assertions)]
        if DEBUG_FLAGS.print_indicator_signals {
            log::info!(
                "{} {} close={} pv_corr={:?} z={:?}",
                self.key,
                epoch_ms_to_utc(row.ts),
                row.close,
                row.pv_corr,
                self.latest_signal.as_ref().and_then(|s| s.zscore)
            );
        }
        (row, due)
    }
}

struct SeriesLogs {
    base: IndicatorLog,
    coarse: IndicatorLog,
}

impl SeriesLogs {
    fn new(key: &SeriesKey, config: &IndicatorConfig) -> Self {
        Self {
            base: IndicatorLog::new(base_log_path(&config.output_dir, key), &BASE_COLUMNS),
            coarse: IndicatorLog::new(coarse_log_path(&config.output_dir, key), &COARSE_COLUMNS),
        }
    }

    fn write(&self, key: &SeriesKey, pending: PendingRows) {
        if let Some(row) = pending.base {
            if let Err(e) = self.base.append(&row.record()) {
                log::error!("{} failed to write base row {}: {}", key, row.ts, e);
            }
        }
        if let Some(row) = pending.coarse {
            if let Err(e) = self.coarse.append(&row.record()) {
                log::error!("{} failed to write coarse row {}: {}", key, row.ts, e);
            }
        }
    }
}

/// Readers only take `state`. `logs` is held across the append so rows for
/// one series land in the order they were computed.
struct SeriesSlot {
    state: Mutex<SeriesState>,
    logs: Mutex<SeriesLogs>,
}

/// Rolling price/volume statistics and a coarse-grid normalised signal,
/// driven by the live bar stream. Each series keeps its own bounded window
/// and writes its own base and coarse logs.
pub struct StreamingIndicatorEngine {
    config: IndicatorConfig,
    series: Mutex<HashMap<SeriesKey, Arc<SeriesSlot>>>,
}

impl StreamingIndicatorEngine {
    pub fn new(config: IndicatorConfig) -> CacheResult<Self> {
        if config.keep_window == 0 {
            return Err(CacheError::capacity("indicator window", config.keep_window));
        }
        fs::create_dir_all(&config.output_dir)?;
        if config.clear_outputs_on_start {
            let removed = clear_previous_outputs(&config.output_dir);
            log::info!("Cleared {} old factor log(s) in {}", removed, config.output_dir.display());
        }
        Ok(Self {
            config,
            series: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    fn slot(&self, key: &SeriesKey) -> Arc<SeriesSlot> {
        self.series
            .lock()
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(SeriesSlot {
                    state: Mutex::new(SeriesState::new(key)),
                    logs: Mutex::new(SeriesLogs::new(key, &self.config)),
                })
            })
            .clone()
    }

    fn existing(&self, key: &SeriesKey) -> Option<Arc<SeriesSlot>> {
        self.series.lock().get(key).cloned()
    }

    /// Provisional updates replace the unsettled snapshot and nothing else.
    /// Updates for a bucket that has already closed are dropped.
    pub fn on_provisional_bar(&self, key: &SeriesKey, bar: &Bar) {
        let slot = self.slot(key);
        let mut state = slot.state.lock();
        if state.is_settled(bar.open_time) {
            return;
        }
        state.unsettled = Some(bar.clone());
    }

    pub fn on_closed_bar(&self, key: &SeriesKey, bar: &Bar) {
        let slot = self.slot(key);
        let logs = slot.logs.lock();
        let pending = slot.state.lock().on_closed(bar, &self.config);
        logs.write(key, pending);
    }

    pub fn phase(&self, key: &SeriesKey) -> Phase {
        self.existing(key)
            .map_or(Phase::AwaitingFirstBar, |s| s.state.lock().phase)
    }

    /// Most recent coarse point with a defined z-score.
    pub fn latest_signal(&self, key: &SeriesKey) -> Option<CoarseRow> {
        self.existing(key)?.state.lock().latest_signal.clone()
    }

    pub fn latest_row(&self, key: &SeriesKey) -> Option<BaseRow> {
        self.existing(key)?.state.lock().latest_row.clone()
    }

    pub fn unsettled(&self, key: &SeriesKey) -> Option<Bar> {
        self.existing(key)?.state.lock().unsettled.clone()
    }

    pub fn window_len(&self, key: &SeriesKey) -> usize {
        self.existing(key).map_or(0, |s| s.state.lock().window.len())
    }
}

impl FeedListener for StreamingIndicatorEngine {
    fn on_bar(&self, key: &SeriesKey, bar: &Bar) {
        if bar.is_closed {
            self.on_closed_bar(key, bar);
        } else {
            self.on_provisional_bar(key, bar);
        }
    }

    fn name(&self) -> &'static str {
        "indicator engine"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Interval;
    use std::path::Path;

    const MINUTE: i64 = 60_000;

    fn engine(dir: &Path) -> StreamingIndicatorEngine {
        let config = IndicatorConfig {
            output_dir: dir.to_path_buf(),
            ..IndicatorConfig::default()
        };
        StreamingIndicatorEngine::new(config).unwrap()
    }

    fn key() -> SeriesKey {
        SeriesKey::new("btcusdt", Interval::M1)
    }

    fn bar(i: i64, close: f64, volume: f64) -> Bar {
        let mut bar = Bar::closed(i * MINUTE, MINUTE, close, volume);
        bar.quote_volume = volume;
        bar
    }

    /// Deterministic noise in [0, 1).
    fn noise(i: i64, salt: i64) -> f64 {
        let x = (i * 7919 + salt * 104_729).rem_euclid(10_007);
        x as f64 / 10_007.0
    }

    fn noisy_bar(i: i64) -> Bar {
        bar(i, 100.0 + 5.0 * noise(i, 1) + i as f64 * 0.01, 50.0 + 20.0 * noise(i, 2))
    }

    fn log_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .map(|t| t.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    #[test]
    fn statistics_appear_at_their_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let key = key();
        let mut rows = Vec::new();
        for i in 0..260 {
            engine.on_bar(&key, &noisy_bar(i));
            rows.push(engine.latest_row(&key).unwrap());
            if i == 0 {
                assert_eq!(engine.phase(&key), Phase::Accumulating);
            }
        }

        assert!(rows[98].price_mean.is_none());
        assert!(rows[99].price_mean.is_some());
        assert!(rows[99].volume_std.is_some());
        assert!(rows[198].pv_corr.is_none());
        assert!(rows[199].pv_corr.is_some());
        assert_eq!(engine.phase(&key), Phase::Ready);

        // one base row per closed bar, below threshold too
        let lines = log_lines(&base_log_path(dir.path(), &key));
        assert_eq!(lines.len(), 261);
        assert!(lines[0].starts_with("ts,datetime,open"));
    }

    #[test]
    fn constant_volume_leaves_correlation_missing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let key = key();
        for i in 0..1500 {
            engine.on_bar(&key, &bar(i, 100.0 + i as f64 * 0.5, 100.0));
            let row = engine.latest_row(&key).unwrap();
            if i >= 1199 {
                assert!(row.price_mean.is_some());
                assert_eq!(row.volume_std, Some(0.0));
                assert_eq!(row.pv_corr, None);
            }
        }
        assert_eq!(engine.window_len(&key), 1300);
        assert_eq!(engine.latest_signal(&key), None);
        assert!(!coarse_log_path(dir.path(), &key).exists());

        let text = fs::read_to_string(base_log_path(dir.path(), &key)).unwrap();
        assert!(!text.contains("NaN") && !text.contains("inf"));
    }

    #[test]
    fn provisional_updates_only_touch_unsettled_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let key = key();

        for close in [1.0, 1.5, 2.0] {
            let mut live = bar(0, close, 10.0);
            live.is_closed = false;
            engine.on_bar(&key, &live);
        }
        assert_eq!(engine.phase(&key), Phase::AwaitingFirstBar);
        assert_eq!(engine.unsettled(&key).map(|b| b.close), Some(2.0));
        assert_eq!(engine.window_len(&key), 0);
        assert!(!base_log_path(dir.path(), &key).exists());

        engine.on_bar(&key, &bar(0, 2.5, 10.0));
        assert_eq!(engine.unsettled(&key), None);
        assert_eq!(engine.phase(&key), Phase::Accumulating);
        assert_eq!(log_lines(&base_log_path(dir.path(), &key)).len(), 2);
    }

    #[test]
    fn late_provisional_for_closed_bucket_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let key = key();
        engine.on_bar(&key, &bar(0, 11.0, 10.0));
        engine.on_bar(&key, &bar(60_000, 12.0, 10.0));

        for open_time in [0, 60_000] {
            let mut late = bar(open_time / MINUTE, 10.0, 10.0);
            late.is_closed = false;
            engine.on_bar(&key, &late);
            assert_eq!(engine.unsettled(&key), None);
        }

        let mut next = bar(2, 13.0, 10.0);
        next.is_closed = false;
        engine.on_bar(&key, &next);
        assert_eq!(engine.unsettled(&key).map(|b| b.open_time), Some(2 * MINUTE));
        assert_eq!(engine.window_len(&key), 2);
        assert_eq!(engine.latest_row(&key).map(|r| r.close), Some(12.0));
    }

    #[test]
    fn readers_do_not_wait_on_log_writes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let key = key();
        engine.on_bar(&key, &bar(0, 1.0, 1.0));

        // Hold the writer side, as an append in progress would.
        let slot = engine.existing(&key).unwrap();
        let _writing = slot.logs.lock();
        assert_eq!(engine.phase(&key), Phase::Accumulating);
        assert_eq!(engine.window_len(&key), 1);
        assert_eq!(engine.latest_row(&key).map(|r| r.ts), Some(0));
    }

    #[test]
    fn repeated_closed_bar_is_logged_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let key = key();
        engine.on_bar(&key, &bar(0, 1.0, 1.0));
        engine.on_bar(&key, &bar(0, 1.0, 1.0));
        assert_eq!(engine.window_len(&key), 1);
        assert_eq!(log_lines(&base_log_path(dir.path(), &key)).len(), 2);
    }

    #[test]
    fn coarse_rows_are_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let key = key();
        for i in 0..600 {
            engine.on_bar(&key, &noisy_bar(i));
        }

        let lines = log_lines(&coarse_log_path(dir.path(), &key));
        assert!(lines.len() > 2, "expected coarse output, got {:?}", lines);
        let stamps: Vec<i64> = lines[1..]
            .iter()
            .map(|l| l.split(',').next().unwrap().parse().unwrap())
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        assert!(stamps.iter().all(|ts| ts % (5 * MINUTE) == 0));
        // at most one row per bucket, and never more than bars seen
        assert!(stamps.len() <= 600 / 5);

        let signal = engine.latest_signal(&key).unwrap();
        assert!(signal.zscore.unwrap().is_finite());
        assert_eq!(Some(signal.ts), stamps.last().copied());
    }

    #[test]
    fn clears_previous_outputs_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let key = key();
        fs::write(base_log_path(dir.path(), &key), "stale").unwrap();
        let config = IndicatorConfig {
            output_dir: dir.path().to_path_buf(),
            clear_outputs_on_start: true,
            ..IndicatorConfig::default()
        };
        let _engine = StreamingIndicatorEngine::new(config).unwrap();
        assert!(!base_log_path(dir.path(), &key).exists());
    }

    #[test]
    fn zero_keep_window_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndicatorConfig {
            output_dir: dir.path().to_path_buf(),
            keep_window: 0,
            ..IndicatorConfig::default()
        };
        assert!(StreamingIndicatorEngine::new(config).is_err());
    }
}
