//! Streaming indicator configuration

use std::path::PathBuf;

/// Which volume column feeds the price/volume correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeSource {
    Base,
    Quote,
}

/// Rolling window parameters (counted in base bars)
pub struct WindowSettings {
    // Rolling window for mean/std/correlation (1200 x 1m = 20 hours)
    pub window: usize,
    // Minimum samples before mean/std exist
    pub min_mean: usize,
    // Minimum samples before correlation exists
    pub min_corr: usize,
    // Bars retained by the engine: window plus a little slack
    pub keep_window: usize,
    // Winsorize at mean +/- clip_std_mult * std
    pub clip_std_mult: f64,
}

/// Coarse-grid normalisation parameters (counted in coarse samples)
pub struct CoarseSettings {
    // Base bars per coarse bucket
    pub factor: i64,
    // Centre of mass of the fast EWM
    pub fast_com: f64,
    // Slow EWM com and the rolling std window are fast_com * slow_mult
    pub slow_mult: usize,
    pub min_periods: usize,
}

pub struct IndicatorDefaults {
    pub window: WindowSettings,
    pub coarse: CoarseSettings,
    pub output_dir: &'static str,
}

pub const INDICATOR: IndicatorDefaults = IndicatorDefaults {
    window: WindowSettings {
        window: 1200,
        min_mean: 100,
        min_corr: 200,
        keep_window: 1300,
        clip_std_mult: 0.5,
    },
    coarse: CoarseSettings {
        factor: 5,
        fast_com: 48.0,
        slow_mult: 8,
        min_periods: 10,
    },
    output_dir: "log/indicators",
};

/// Runtime settings for a `StreamingIndicatorEngine`.
#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    pub window: usize,
    pub min_mean: usize,
    pub min_corr: usize,
    pub keep_window: usize,
    pub clip_std_mult: f64,
    pub coarse_factor: i64,
    pub fast_com: f64,
    pub slow_mult: usize,
    pub min_coarse_periods: usize,
    pub volume_source: VolumeSource,
    pub output_dir: PathBuf,
    pub clear_outputs_on_start: bool,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            window: INDICATOR.window.window,
            min_mean: INDICATOR.window.min_mean,
            min_corr: INDICATOR.window.min_corr,
            keep_window: INDICATOR.window.keep_window,
            clip_std_mult: INDICATOR.window.clip_std_mult,
            coarse_factor: INDICATOR.coarse.factor,
            fast_com: INDICATOR.coarse.fast_com,
            slow_mult: INDICATOR.coarse.slow_mult,
            min_coarse_periods: INDICATOR.coarse.min_periods,
            volume_source: VolumeSource::Quote,
            output_dir: PathBuf::from(INDICATOR.output_dir),
            clear_outputs_on_start: false,
        }
    }
}

impl IndicatorConfig {
    pub fn slow_com(&self) -> f64 {
        self.fast_com * self.slow_mult as f64
    }

    pub fn slow_std_window(&self) -> usize {
        (self.fast_com as usize) * self.slow_mult
    }

    /// Fewest closed bars before any statistic can exist.
    pub fn min_samples(&self) -> usize {
        self.min_mean.min(self.min_corr)
    }
}
