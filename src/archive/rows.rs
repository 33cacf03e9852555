//! CSV row layout for the archive tables.
//!
//! Rows are read through csv's serde header mapping, so tables written with
//! or without the trailing `stored_at` columns parse the same way.

use csv::StringRecord;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, DepthSnapshot, Interval, SeriesKey};
use crate::utils::time_utils::epoch_ms_to_utc;

pub const BAR_COLUMNS: [&str; 17] = [
    "symbol",
    "interval",
    "open_time",
    "close_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "quote_volume",
    "trade_count",
    "taker_buy_volume",
    "taker_buy_quote_volume",
    "is_closed",
    "datetime",
    "stored_at",
    "stored_at_ms",
];

pub const DEPTH_COLUMNS: [&str; 9] = [
    "symbol",
    "timestamp",
    "datetime",
    "bid_prices",
    "bid_volumes",
    "ask_prices",
    "ask_volumes",
    "stored_at",
    "stored_at_ms",
];

/// Columns a bar table must carry to be readable at all.
pub const REQUIRED_BAR_COLUMNS: [&str; 7] = ["open_time", "close_time", "open", "high", "low", "close", "volume"];
pub const REQUIRED_DEPTH_COLUMNS: [&str; 1] = ["timestamp"];

pub fn has_columns(headers: &StringRecord, required: &[&str]) -> bool {
    required.iter().all(|name| headers.iter().any(|h| h == *name))
}

/// Integer columns may have been written as floats by other tooling ("1.7e12").
fn parse_i64(raw: &str) -> Result<i64, String> {
    raw.parse::<i64>().or_else(|_| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v as i64)
            .ok_or_else(|| format!("{raw:?} is not an integer"))
    })
}

fn epoch_ms<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let raw = String::deserialize(d)?;
    parse_i64(&raw).map_err(de::Error::custom)
}

fn count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    match Option::<String>::deserialize(d)? {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => parse_i64(&raw)
            .map(|v| Some(v.max(0) as u64))
            .map_err(de::Error::custom),
    }
}

fn finite<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let v = f64::deserialize(d)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(de::Error::custom(format!("{v} is not a finite number")))
    }
}

fn finite_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    match Option::<f64>::deserialize(d)? {
        Some(v) if !v.is_finite() => Err(de::Error::custom(format!("{v} is not a finite number"))),
        other => Ok(other),
    }
}

/// Accepts Python-style `True`/`False` as well as `true`/`1`/`0`.
fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(Option::<String>::deserialize(d)?.map(|raw| match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        other => !other.is_empty(),
    }))
}

fn levels<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
    match Option::<String>::deserialize(d)? {
        None => Ok(Vec::new()),
        Some(raw) if raw.is_empty() => Ok(Vec::new()),
        Some(raw) => serde_json::from_str::<Vec<f64>>(&raw)
            .map_err(|e| de::Error::custom(format!("not a JSON number list: {e}"))),
    }
}

/// One archived bar row. Optional volume columns read as zero when the table
/// lacks them and `is_closed` defaults to true.
#[derive(Deserialize)]
struct BarRow {
    #[serde(deserialize_with = "epoch_ms")]
    open_time: i64,
    #[serde(deserialize_with = "epoch_ms")]
    close_time: i64,
    #[serde(deserialize_with = "finite")]
    open: f64,
    #[serde(deserialize_with = "finite")]
    high: f64,
    #[serde(deserialize_with = "finite")]
    low: f64,
    #[serde(deserialize_with = "finite")]
    close: f64,
    #[serde(deserialize_with = "finite")]
    volume: f64,
    #[serde(default, deserialize_with = "finite_opt")]
    quote_volume: Option<f64>,
    #[serde(default, deserialize_with = "count")]
    trade_count: Option<u64>,
    #[serde(default, deserialize_with = "finite_opt")]
    taker_buy_volume: Option<f64>,
    #[serde(default, deserialize_with = "finite_opt")]
    taker_buy_quote_volume: Option<f64>,
    #[serde(default, deserialize_with = "flag")]
    is_closed: Option<bool>,
}

impl From<BarRow> for Bar {
    fn from(row: BarRow) -> Self {
        Bar {
            open_time: row.open_time,
            close_time: row.close_time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            quote_volume: row.quote_volume.unwrap_or(0.0),
            trade_count: row.trade_count.unwrap_or(0),
            taker_buy_volume: row.taker_buy_volume.unwrap_or(0.0),
            taker_buy_quote_volume: row.taker_buy_quote_volume.unwrap_or(0.0),
            is_closed: row.is_closed.unwrap_or(true),
        }
    }
}

/// Field order matches `BAR_COLUMNS`.
#[derive(Serialize)]
struct BarRecord<'a> {
    symbol: &'a str,
    interval: Interval,
    open_time: i64,
    close_time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    quote_volume: f64,
    trade_count: u64,
    taker_buy_volume: f64,
    taker_buy_quote_volume: f64,
    is_closed: &'static str,
    datetime: String,
    stored_at: &'a str,
    stored_at_ms: i64,
}

#[derive(Deserialize)]
struct DepthRow {
    #[serde(deserialize_with = "epoch_ms")]
    timestamp: i64,
    #[serde(default, deserialize_with = "levels")]
    bid_prices: Vec<f64>,
    #[serde(default, deserialize_with = "levels")]
    bid_volumes: Vec<f64>,
    #[serde(default, deserialize_with = "levels")]
    ask_prices: Vec<f64>,
    #[serde(default, deserialize_with = "levels")]
    ask_volumes: Vec<f64>,
}

/// Field order matches `DEPTH_COLUMNS`. Level arrays are JSON lists.
#[derive(Serialize)]
struct DepthRecord<'a> {
    symbol: &'a str,
    timestamp: i64,
    datetime: String,
    bid_prices: String,
    bid_volumes: String,
    ask_prices: String,
    ask_volumes: String,
    stored_at: &'a str,
    stored_at_ms: i64,
}

pub fn parse_bar(headers: &StringRecord, record: &StringRecord) -> Result<Bar, String> {
    record
        .deserialize::<BarRow>(Some(headers))
        .map(Bar::from)
        .map_err(|e| e.to_string())
}

pub fn parse_depth(headers: &StringRecord, record: &StringRecord) -> Result<DepthSnapshot, String> {
    let row = record
        .deserialize::<DepthRow>(Some(headers))
        .map_err(|e| e.to_string())?;
    Ok(DepthSnapshot::new(
        row.timestamp,
        row.bid_prices,
        row.bid_volumes,
        row.ask_prices,
        row.ask_volumes,
    ))
}

pub fn write_bar<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    key: &SeriesKey,
    bar: &Bar,
    stored_at: &(String, i64),
) -> csv::Result<()> {
    writer.serialize(BarRecord {
        symbol: key.symbol(),
        interval: key.interval,
        open_time: bar.open_time,
        close_time: bar.close_time,
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        volume: bar.volume,
        quote_volume: bar.quote_volume,
        trade_count: bar.trade_count,
        taker_buy_volume: bar.taker_buy_volume,
        taker_buy_quote_volume: bar.taker_buy_quote_volume,
        is_closed: if bar.is_closed { "True" } else { "False" },
        datetime: epoch_ms_to_utc(bar.open_time),
        stored_at: &stored_at.0,
        stored_at_ms: stored_at.1,
    })
}

pub fn write_depth<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    symbol: &str,
    snapshot: &DepthSnapshot,
    stored_at: &(String, i64),
) -> csv::Result<()> {
    let json = |levels: &[f64]| serde_json::to_string(levels).map_err(|e| csv::Error::from(std::io::Error::other(e)));
    writer.serialize(DepthRecord {
        symbol,
        timestamp: snapshot.timestamp,
        datetime: epoch_ms_to_utc(snapshot.timestamp),
        bid_prices: json(&snapshot.bid_prices)?,
        bid_volumes: json(&snapshot.bid_volumes)?,
        ask_prices: json(&snapshot.ask_prices)?,
        ask_volumes: json(&snapshot.ask_volumes)?,
        stored_at: &stored_at.0,
        stored_at_ms: stored_at.1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use csv::WriterBuilder;

    fn headers(columns: &[&str]) -> StringRecord {
        StringRecord::from(columns.to_vec())
    }

    /// Serialize one row with csv's own header line, return (header, row).
    fn written<F>(write: F) -> (String, StringRecord)
    where
        F: FnOnce(&mut csv::Writer<Vec<u8>>) -> csv::Result<()>,
    {
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(Vec::new());
        write(&mut writer).unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let header = text.lines().next().unwrap().to_string();
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let row = reader.records().next().unwrap().unwrap();
        (header, row)
    }

    #[test]
    fn bar_record_matches_header() {
        let key = SeriesKey::new("BTCUSDT", Interval::M1);
        let bar = Bar::closed(60_000, 60_000, 10.5, 2.0);
        let stamp = ("2024-01-01 00:00:00.000".to_string(), 1);
        let (header, row) = written(|w| write_bar(w, &key, &bar, &stamp));
        assert_eq!(header, BAR_COLUMNS.join(","));
        assert_eq!(&row[0], "btcusdt");
        assert_eq!(&row[1], "1m");
        assert_eq!(&row[13], "True");

        let parsed = parse_bar(&headers(&BAR_COLUMNS), &row).unwrap();
        assert_eq!(parsed, bar);
    }

    #[test]
    fn short_header_reads_with_defaults() {
        let short = headers(&["open_time", "close_time", "open", "high", "low", "close", "volume"]);
        assert!(has_columns(&short, &REQUIRED_BAR_COLUMNS));
        let record = StringRecord::from(vec!["0", "59999", "1", "2", "0.5", "1.5", "3"]);
        let bar = parse_bar(&short, &record).unwrap();
        assert_eq!(bar.quote_volume, 0.0);
        assert_eq!(bar.trade_count, 0);
        assert!(bar.is_closed);
    }

    #[test]
    fn float_written_times_and_blank_optionals() {
        let cols = headers(&["open_time", "close_time", "open", "high", "low", "close", "volume", "quote_volume", "is_closed"]);
        let record = StringRecord::from(vec!["6e4", "119999.0", "1", "1", "1", "1", "1", "", "false"]);
        let bar = parse_bar(&cols, &record).unwrap();
        assert_eq!(bar.open_time, 60_000);
        assert_eq!(bar.close_time, 119_999);
        assert_eq!(bar.quote_volume, 0.0);
        assert!(!bar.is_closed);
    }

    #[test]
    fn unparseable_or_non_finite_field_is_rejected() {
        let cols = headers(&BAR_COLUMNS);
        let mut fields: Vec<String> = BAR_COLUMNS.iter().map(|_| "1".to_string()).collect();
        fields[7] = "abc".to_string();
        assert!(parse_bar(&cols, &StringRecord::from(fields.clone())).is_err());
        fields[7] = "NaN".to_string();
        assert!(parse_bar(&cols, &StringRecord::from(fields.clone())).is_err());
        fields[7] = "1".to_string();
        fields[9] = "inf".to_string();
        assert!(parse_bar(&cols, &StringRecord::from(fields)).is_err());
    }

    #[test]
    fn missing_required_column_is_unreadable() {
        assert!(!has_columns(&headers(&["open_time", "close"]), &REQUIRED_BAR_COLUMNS));
    }

    #[test]
    fn depth_levels_round_trip_as_json() {
        let snap = DepthSnapshot::new(5, vec![99.5, 99.0], vec![1.0, 2.0], vec![100.0], vec![0.5]);
        let (header, row) = written(|w| write_depth(w, "ethusdt", &snap, &("x".to_string(), 0)));
        assert_eq!(header, DEPTH_COLUMNS.join(","));
        assert_eq!(&row[3], "[99.5,99.0]");
        let parsed = parse_depth(&headers(&DEPTH_COLUMNS), &row).unwrap();
        assert_eq!(parsed, snap);
    }
}
