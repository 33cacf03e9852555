use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::CacheError;
use crate::utils::TimeUtils;

/// Bar width, using the Binance shorthand as the canonical string form.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
pub enum Interval {
    #[strum(serialize = "1s")]
    #[serde(rename = "1s")]
    S1,
    #[strum(serialize = "1m")]
    #[serde(rename = "1m")]
    M1,
    #[strum(serialize = "3m")]
    #[serde(rename = "3m")]
    M3,
    #[strum(serialize = "5m")]
    #[serde(rename = "5m")]
    M5,
    #[strum(serialize = "15m")]
    #[serde(rename = "15m")]
    M15,
    #[strum(serialize = "30m")]
    #[serde(rename = "30m")]
    M30,
    #[strum(serialize = "1h")]
    #[serde(rename = "1h")]
    H1,
    #[strum(serialize = "2h")]
    #[serde(rename = "2h")]
    H2,
    #[strum(serialize = "4h")]
    #[serde(rename = "4h")]
    H4,
    #[strum(serialize = "6h")]
    #[serde(rename = "6h")]
    H6,
    #[strum(serialize = "8h")]
    #[serde(rename = "8h")]
    H8,
    #[strum(serialize = "12h")]
    #[serde(rename = "12h")]
    H12,
    #[strum(serialize = "1d")]
    #[serde(rename = "1d")]
    D1,
    #[strum(serialize = "3d")]
    #[serde(rename = "3d")]
    D3,
    #[strum(serialize = "1w")]
    #[serde(rename = "1w")]
    W1,
    // Calendar month approximated as 30 days, same as the exchange's paging maths.
    #[strum(serialize = "1M")]
    #[serde(rename = "1M")]
    Mo1,
}

impl Interval {
    pub const fn as_ms(&self) -> i64 {
        match self {
            Interval::S1 => TimeUtils::MS_IN_S,
            Interval::M1 => TimeUtils::MS_IN_MIN,
            Interval::M3 => TimeUtils::MS_IN_3_MIN,
            Interval::M5 => TimeUtils::MS_IN_5_MIN,
            Interval::M15 => TimeUtils::MS_IN_15_MIN,
            Interval::M30 => TimeUtils::MS_IN_30_MIN,
            Interval::H1 => TimeUtils::MS_IN_H,
            Interval::H2 => TimeUtils::MS_IN_2_H,
            Interval::H4 => TimeUtils::MS_IN_4_H,
            Interval::H6 => TimeUtils::MS_IN_6_H,
            Interval::H8 => TimeUtils::MS_IN_8_H,
            Interval::H12 => TimeUtils::MS_IN_12_H,
            Interval::D1 => TimeUtils::MS_IN_D,
            Interval::D3 => TimeUtils::MS_IN_3_D,
            Interval::W1 => TimeUtils::MS_IN_W,
            Interval::Mo1 => TimeUtils::MS_IN_1_M,
        }
    }

    /// Reverse of `as_ms`. Returns an error instead of panicking on odd widths.
    pub fn try_from_ms(ms: i64) -> Result<Self, CacheError> {
        use strum::IntoEnumIterator;
        Interval::iter()
            .find(|interval| interval.as_ms() == ms)
            .ok_or_else(|| CacheError::UnsupportedInterval(format!("{}ms", ms)))
    }

    pub fn parse(text: &str) -> Result<Self, CacheError> {
        Interval::from_str(text.trim()).map_err(|_| CacheError::UnsupportedInterval(text.to_string()))
    }
}

/// Identity of one bar series: (symbol, interval).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SeriesKey {
    pub symbol: String,
    pub interval: Interval,
}

impl SeriesKey {
    /// Symbols are stored lower-case so `BTCUSDT` and `btcusdt` share a series.
    pub fn new(symbol: &str, interval: Interval) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            interval,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval.as_ms()
    }

    // The name we pass into the exchange REST API
    pub fn exchange_symbol(&self) -> String {
        self.symbol.to_uppercase()
    }

    /// File-name stem shared by archive and indicator outputs, e.g. `btcusdt_1m`.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.symbol, self.interval)
    }
}

pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_lowercase()
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_round_trips_through_strings_and_ms() {
        use strum::IntoEnumIterator;
        for interval in Interval::iter() {
            assert_eq!(Interval::parse(interval.as_ref()).unwrap(), interval);
            assert_eq!(Interval::try_from_ms(interval.as_ms()).unwrap(), interval);
        }
        assert_eq!(Interval::parse("1M").unwrap(), Interval::Mo1);
        assert_eq!(Interval::parse("1m").unwrap(), Interval::M1);
        assert!(Interval::parse("7m").is_err());
        assert!(Interval::try_from_ms(42).is_err());
    }

    #[test]
    fn series_key_normalizes_symbol() {
        let key = SeriesKey::new(" BTCUSDT ", Interval::M1);
        assert_eq!(key.symbol(), "btcusdt");
        assert_eq!(key.exchange_symbol(), "BTCUSDT");
        assert_eq!(key.file_stem(), "btcusdt_1m");
        assert_eq!(key.to_string(), "btcusdt@1m");
    }
}
