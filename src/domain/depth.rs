/// One order-book snapshot. Levels are ordered best-first.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthSnapshot {
    pub timestamp: i64,
    pub bid_prices: Vec<f64>,
    pub bid_volumes: Vec<f64>,
    pub ask_prices: Vec<f64>,
    pub ask_volumes: Vec<f64>,
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread: f64,
}

impl DepthSnapshot {
    /// Build a snapshot and derive best bid/ask and spread from the top level.
    /// An empty side reports 0, and the spread is 0 unless both sides exist.
    pub fn new(
        timestamp: i64,
        bid_prices: Vec<f64>,
        bid_volumes: Vec<f64>,
        ask_prices: Vec<f64>,
        ask_volumes: Vec<f64>,
    ) -> Self {
        let best_bid = bid_prices.first().copied();
        let best_ask = ask_prices.first().copied();
        let spread = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => ask - bid,
            _ => 0.0,
        };
        DepthSnapshot {
            timestamp,
            bid_prices,
            bid_volumes,
            ask_prices,
            ask_volumes,
            best_bid: best_bid.unwrap_or(0.0),
            best_ask: best_ask.unwrap_or(0.0),
            spread,
        }
    }

    pub fn bid_levels(&self) -> usize {
        self.bid_prices.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.ask_prices.len()
    }

    pub fn mid_price(&self) -> Option<f64> {
        (self.bid_levels() > 0 && self.ask_levels() > 0)
            .then(|| (self.best_bid + self.best_ask) / 2.0)
    }
}
