/// One OHLCV observation for a fixed time bucket of a series.
/// `open_time` is the unique key inside a series.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub open_time: i64,
    pub close_time: i64,

    // Prices
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,

    // Volumes
    pub volume: f64,       // base asset volume
    pub quote_volume: f64, // quote asset volume
    pub trade_count: u64,
    pub taker_buy_volume: f64,
    pub taker_buy_quote_volume: f64,

    pub is_closed: bool,
}

impl Bar {
    /// A closed bar with zeroed volume breakdown. Handy for synthetic series.
    pub fn closed(open_time: i64, interval_ms: i64, close: f64, volume: f64) -> Self {
        Bar {
            open_time,
            close_time: open_time + interval_ms - 1,
            open: close,
            high: close,
            low: close,
            close,
            volume,
            quote_volume: volume * close,
            trade_count: 0,
            taker_buy_volume: 0.0,
            taker_buy_quote_volume: 0.0,
            is_closed: true,
        }
    }

    /// Whether [open_time, close_time] contains `timestamp_ms`.
    pub fn covers(&self, timestamp_ms: i64) -> bool {
        self.open_time <= timestamp_ms && timestamp_ms <= self.close_time
    }

    /// Whether [open_time, close_time] intersects [start, end].
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.open_time <= end && self.close_time >= start
    }

    pub fn taker_buy_pct(&self) -> Option<f64> {
        (self.volume > 0.0).then(|| self.taker_buy_volume / self.volume * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_is_inclusive_on_both_ends() {
        let bar = Bar::closed(1_000, 1_000, 10.0, 1.0);
        assert_eq!(bar.close_time, 1_999);
        assert!(bar.overlaps(1_999, 5_000));
        assert!(bar.overlaps(0, 1_000));
        assert!(!bar.overlaps(2_000, 3_000));
        assert!(bar.covers(1_500));
        assert!(!bar.covers(2_000));
    }

    #[test]
    fn taker_buy_pct_needs_volume() {
        let mut bar = Bar::closed(0, 60_000, 10.0, 0.0);
        assert_eq!(bar.taker_buy_pct(), None);
        bar.volume = 4.0;
        bar.taker_buy_volume = 1.0;
        assert_eq!(bar.taker_buy_pct(), Some(25.0));
    }
}
