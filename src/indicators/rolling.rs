//! Windowed statistics over bar-aligned series.
//!
//! Missing samples are `None`. Every function returns one output per input,
//! aligned by position, and never yields NaN or infinity: undefined results
//! are `None`.

/// Running sums over a sliding window, shifted by a reference value to limit
/// cancellation in the variance.
#[derive(Debug, Clone, Copy)]
struct Moments {
    shift: f64,
    n: usize,
    sum: f64,
    sum_sq: f64,
}

impl Moments {
    fn new(shift: f64) -> Self {
        Self {
            shift,
            n: 0,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    fn add(&mut self, v: f64) {
        let d = v - self.shift;
        self.n += 1;
        self.sum += d;
        self.sum_sq += d * d;
    }

    fn remove(&mut self, v: f64) {
        let d = v - self.shift;
        self.n -= 1;
        if self.n == 0 {
            self.sum = 0.0;
            self.sum_sq = 0.0;
        } else {
            self.sum -= d;
            self.sum_sq -= d * d;
        }
    }

    fn mean(&self) -> f64 {
        self.shift + self.sum / self.n as f64
    }

    /// Sum of squared deviations from the mean, never negative.
    fn centred_sum_sq(&self) -> f64 {
        (self.sum_sq - self.sum * self.sum / self.n as f64).max(0.0)
    }
}

/// Length of the trailing run of identical observations. When the run covers
/// every observation in the window the window is constant, and its variance
/// is exactly zero whatever the running sums say.
#[derive(Debug, Clone, Copy, Default)]
struct TrailingRun {
    value: f64,
    len: usize,
}

impl TrailingRun {
    fn push(&mut self, v: f64) {
        if self.len > 0 && v == self.value {
            self.len += 1;
        } else {
            self.value = v;
            self.len = 1;
        }
    }

    fn covers(&self, n: usize) -> bool {
        self.len >= n
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeanStd {
    pub mean: Option<f64>,
    /// Sample standard deviation (ddof = 1).
    pub std: Option<f64>,
}

/// Rolling mean and sample standard deviation over the last `window`
/// positions, defined once at least `min_periods` of them are present.
pub fn rolling_mean_std(values: &[Option<f64>], window: usize, min_periods: usize) -> Vec<MeanStd> {
    let min_periods = min_periods.max(1);
    let shift = values.iter().flatten().copied().next().unwrap_or(0.0);
    let mut moments = Moments::new(shift);
    let mut run = TrailingRun::default();
    let mut out = Vec::with_capacity(values.len());

    for (i, value) in values.iter().enumerate() {
        if let Some(v) = *value {
            moments.add(v);
            run.push(v);
        }
        if i >= window {
            if let Some(old) = values[i - window] {
                moments.remove(old);
            }
        }

        let n = moments.n;
        if n < min_periods || n == 0 {
            out.push(MeanStd::default());
            continue;
        }
        let constant = run.covers(n);
        let mean = if constant { run.value } else { moments.mean() };
        let std = (n >= 2).then(|| {
            if constant {
                0.0
            } else {
                (moments.centred_sum_sq() / (n - 1) as f64).sqrt()
            }
        });
        out.push(MeanStd {
            mean: Some(mean),
            std,
        });
    }
    out
}

/// Bound each value to `[mean - mult * std, mean + mult * std]`. Positions
/// without both statistics pass through unchanged.
pub fn winsorize(values: &[f64], stats: &[MeanStd], mult: f64) -> Vec<f64> {
    values
        .iter()
        .zip(stats)
        .map(|(&v, s)| match (s.mean, s.std) {
            (Some(mean), Some(std)) => {
                let half_width = mult * std;
                v.clamp(mean - half_width, mean + half_width)
            }
            _ => v,
        })
        .collect()
}

/// Rolling Pearson correlation of paired samples. A window where either side
/// has zero variance has no correlation.
pub fn rolling_corr(xs: &[f64], ys: &[f64], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    debug_assert_eq!(xs.len(), ys.len());
    let len = xs.len().min(ys.len());
    let min_periods = min_periods.max(2);
    let (Some(&x0), Some(&y0)) = (xs.first(), ys.first()) else {
        return Vec::new();
    };

    let mut mx = Moments::new(x0);
    let mut my = Moments::new(y0);
    let mut sum_xy = 0.0;
    let mut run_x = TrailingRun::default();
    let mut run_y = TrailingRun::default();
    let mut out = Vec::with_capacity(len);

    for i in 0..len {
        mx.add(xs[i]);
        my.add(ys[i]);
        sum_xy += (xs[i] - x0) * (ys[i] - y0);
        run_x.push(xs[i]);
        run_y.push(ys[i]);
        if i >= window {
            let (ox, oy) = (xs[i - window], ys[i - window]);
            mx.remove(ox);
            my.remove(oy);
            sum_xy -= (ox - x0) * (oy - y0);
            if mx.n == 0 {
                sum_xy = 0.0;
            }
        }

        let n = mx.n;
        if n < min_periods || run_x.covers(n) || run_y.covers(n) {
            out.push(None);
            continue;
        }
        let cov = sum_xy - mx.sum * my.sum / n as f64;
        let denom = (mx.centred_sum_sq() * my.centred_sum_sq()).sqrt();
        let corr = cov / denom;
        out.push((denom > 0.0 && corr.is_finite()).then(|| corr.clamp(-1.0, 1.0)));
    }
    out
}

/// Downsample onto a grid of `period_ms` aligned at the epoch. Each bucket is
/// labelled by its start and carries the last present value inside it.
pub fn resample_last(timestamps: &[i64], values: &[Option<f64>], period_ms: i64) -> Vec<(i64, Option<f64>)> {
    let mut out: Vec<(i64, Option<f64>)> = Vec::new();
    for (&ts, &value) in timestamps.iter().zip(values) {
        let bucket = ts.div_euclid(period_ms) * period_ms;
        match out.last_mut() {
            Some((label, last)) if *label == bucket => {
                if value.is_some() {
                    *last = value;
                }
            }
            _ => out.push((bucket, value)),
        }
    }
    out
}

/// Exponentially weighted mean with centre of mass `com` (alpha = 1 / (1 + com))
/// and bias-adjusted weights. Missing samples still decay the weight of older
/// observations; the previous mean is carried across them. Defined once at
/// least `min_periods` samples have been seen.
pub fn ewm_mean(values: &[Option<f64>], com: f64, min_periods: usize) -> Vec<Option<f64>> {
    let alpha = 1.0 / (1.0 + com);
    let old_wt_factor = 1.0 - alpha;
    let new_wt = 1.0;
    let min_periods = min_periods.max(1);

    let mut weighted: Option<f64> = None;
    let mut old_wt = 1.0;
    let mut nobs = 0usize;
    let mut out = Vec::with_capacity(values.len());

    for value in values {
        if value.is_some() {
            nobs += 1;
        }
        weighted = match (weighted, *value) {
            (None, cur) => cur,
            (Some(prev), cur) => {
                old_wt *= old_wt_factor;
                match cur {
                    Some(cur) => {
                        let next = if prev == cur {
                            prev
                        } else {
                            (old_wt * prev + new_wt * cur) / (old_wt + new_wt)
                        };
                        old_wt += new_wt;
                        Some(next)
                    }
                    None => Some(prev),
                }
            }
        };
        out.push(weighted.filter(|_| nobs >= min_periods));
    }
    out
}

/// `(fast - slow) / std`, missing whenever an input is missing or the
/// denominator is zero.
pub fn z_score(fast: Option<f64>, slow: Option<f64>, std: Option<f64>) -> Option<f64> {
    let (fast, slow, std) = (fast?, slow?, std?);
    if std == 0.0 {
        return None;
    }
    Some((fast - slow) / std).filter(|z| z.is_finite())
}
