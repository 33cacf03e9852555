use chrono::{DateTime, Utc};

pub struct TimeUtils;

impl TimeUtils {
    pub const MS_IN_S: i64 = 1000;
    pub const MS_IN_MIN: i64 = Self::MS_IN_S * 60;
    pub const MS_IN_3_MIN: i64 = Self::MS_IN_S * 60 * 3;
    pub const MS_IN_5_MIN: i64 = Self::MS_IN_S * 60 * 5;
    pub const MS_IN_15_MIN: i64 = Self::MS_IN_S * 60 * 15;
    pub const MS_IN_30_MIN: i64 = Self::MS_IN_S * 60 * 30;
    pub const MS_IN_H: i64 = Self::MS_IN_MIN * 60;
    pub const MS_IN_2_H: i64 = Self::MS_IN_MIN * 60 * 2;
    pub const MS_IN_4_H: i64 = Self::MS_IN_MIN * 60 * 4;
    pub const MS_IN_6_H: i64 = Self::MS_IN_MIN * 60 * 6;
    pub const MS_IN_8_H: i64 = Self::MS_IN_MIN * 60 * 8;
    pub const MS_IN_12_H: i64 = Self::MS_IN_MIN * 60 * 12;
    pub const MS_IN_D: i64 = Self::MS_IN_H * 24;
    pub const MS_IN_3_D: i64 = Self::MS_IN_H * 24 * 3;
    pub const MS_IN_W: i64 = Self::MS_IN_D * 7;
    pub const MS_IN_1_M: i64 = Self::MS_IN_D * 30;

    /// Row timestamp format used in the archive `datetime` column.
    pub const ARCHIVE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
    /// `stored_at` column keeps millisecond precision.
    pub const STORED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
}

/// Format an epoch-ms timestamp for the archive `datetime` column (UTC).
/// Out-of-range values produce an empty string rather than panicking.
pub fn epoch_ms_to_utc(epoch_ms: i64) -> String {
    match DateTime::from_timestamp_millis(epoch_ms) {
        Some(dt) => dt.format(TimeUtils::ARCHIVE_TIME_FORMAT).to_string(),
        None => String::new(),
    }
}

pub fn now_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Wall-clock stamp written next to every archived row, for latency inspection.
pub fn stored_at_now() -> (String, i64) {
    let now = Utc::now();
    (
        now.format(TimeUtils::STORED_AT_FORMAT).to_string(),
        now.timestamp_millis(),
    )
}

/// Floor `timestamp_ms` onto a grid of `period_ms` aligned at the epoch.
pub fn floor_to_period(timestamp_ms: i64, period_ms: i64) -> i64 {
    debug_assert!(period_ms > 0);
    timestamp_ms.div_euclid(period_ms) * period_ms
}
