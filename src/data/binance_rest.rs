// External crates
use anyhow::{Context, Result};
use async_trait::async_trait;
use binance_sdk::common::models::Interval as binance_interval;
use binance_sdk::config::ConfigurationRestApi;
use binance_sdk::models::RestApiRateLimit;
use binance_sdk::spot::{
    SpotRestApi,
    rest_api::{KlinesIntervalEnum, KlinesItemInner, KlinesParams, RestApi},
};
use binance_sdk::{errors, errors::ConnectorError as connection_error};
use tokio::time::{Duration, sleep};

// Local crates
use crate::config::binance::{BINANCE, BinanceApiConfig};
use crate::data::history_source::RemoteHistorySource;
use crate::domain::{Bar, Interval, SeriesKey};
use crate::error::CacheError;
use crate::utils::time_utils::now_timestamp_ms;

fn klines_interval(interval: Interval) -> KlinesIntervalEnum {
    match interval {
        Interval::S1 => KlinesIntervalEnum::Interval1s,
        Interval::M1 => KlinesIntervalEnum::Interval1m,
        Interval::M3 => KlinesIntervalEnum::Interval3m,
        Interval::M5 => KlinesIntervalEnum::Interval5m,
        Interval::M15 => KlinesIntervalEnum::Interval15m,
        Interval::M30 => KlinesIntervalEnum::Interval30m,
        Interval::H1 => KlinesIntervalEnum::Interval1h,
        Interval::H2 => KlinesIntervalEnum::Interval2h,
        Interval::H4 => KlinesIntervalEnum::Interval4h,
        Interval::H6 => KlinesIntervalEnum::Interval6h,
        Interval::H8 => KlinesIntervalEnum::Interval8h,
        Interval::H12 => KlinesIntervalEnum::Interval12h,
        Interval::D1 => KlinesIntervalEnum::Interval1d,
        Interval::D3 => KlinesIntervalEnum::Interval3d,
        Interval::W1 => KlinesIntervalEnum::Interval1w,
        Interval::Mo1 => KlinesIntervalEnum::Interval1M,
    }
}

fn item_as_i64(item: Option<KlinesItemInner>, field: &str) -> Result<i64, String> {
    match item {
        Some(KlinesItemInner::Integer(v)) => Ok(v),
        Some(KlinesItemInner::String(s)) => s.parse::<i64>().map_err(|_| format!("{field}: {s:?}")),
        _ => Err(format!("{field}: missing")),
    }
}

// Prices and volumes arrive as decimal strings.
fn item_as_f64(item: Option<KlinesItemInner>, field: &str) -> Result<f64, String> {
    match item {
        Some(KlinesItemInner::String(s)) => s.parse::<f64>().map_err(|_| format!("{field}: {s:?}")),
        Some(KlinesItemInner::Integer(v)) => Ok(v as f64),
        _ => Err(format!("{field}: missing")),
    }
}

/// One REST kline row -> `Bar`. A bar is closed once its close time has passed.
fn bar_from_kline(row: Vec<KlinesItemInner>, now_ms: i64) -> Result<Bar, String> {
    let mut items = row.into_iter();
    let open_time = item_as_i64(items.next(), "open_time")?;
    let open = item_as_f64(items.next(), "open")?;
    let high = item_as_f64(items.next(), "high")?;
    let low = item_as_f64(items.next(), "low")?;
    let close = item_as_f64(items.next(), "close")?;
    let volume = item_as_f64(items.next(), "volume")?;
    let close_time = item_as_i64(items.next(), "close_time")?;
    let quote_volume = item_as_f64(items.next(), "quote_volume")?;
    let trade_count = item_as_i64(items.next(), "trade_count")?.max(0) as u64;
    let taker_buy_volume = item_as_f64(items.next(), "taker_buy_volume")?;
    let taker_buy_quote_volume = item_as_f64(items.next(), "taker_buy_quote_volume")?;

    Ok(Bar {
        open_time,
        close_time,
        open,
        high,
        low,
        close,
        volume,
        quote_volume,
        trade_count,
        taker_buy_volume,
        taker_buy_quote_volume,
        is_closed: close_time < now_ms,
    })
}

/// Binance spot REST klines as a `RemoteHistorySource`.
pub struct BinanceRestSource {
    rest_client: RestApi,
    config: BinanceApiConfig,
}

impl BinanceRestSource {
    pub fn new(config: BinanceApiConfig) -> Result<Self> {
        let rest_conf = ConfigurationRestApi::builder()
            .timeout(config.timeout_ms)
            .retries(config.retries)
            .backoff(config.backoff_ms)
            .build()
            .context("Failed to build Binance REST configuration")?;
        // Create the Spot REST API client
        let rest_client = SpotRestApi::production(rest_conf);
        Ok(Self {
            rest_client,
            config,
        })
    }

    async fn fetch_klines_with_limits(
        &self,
        key: &SeriesKey,
        params: KlinesParams,
    ) -> Result<(Option<Vec<RestApiRateLimit>>, Vec<Vec<KlinesItemInner>>)> {
        match self.rest_client.klines(params).await {
            Ok(r) => {
                let rate_limits = r.rate_limits.clone();
                let data = r.data().await?;
                Ok((rate_limits, data))
            }
            Err(e) => {
                if let Some(conn_err) = e.downcast_ref::<errors::ConnectorError>() {
                    match conn_err {
                        connection_error::ConnectorClientError(msg) => {
                            log::error!("{} Client error: Check your request parameters. {}", key, msg);
                        }
                        connection_error::TooManyRequestsError(msg) => {
                            log::error!("{} Rate limit exceeded. Please wait and try again. {}", key, msg);
                        }
                        connection_error::RateLimitBanError(msg) => {
                            log::error!("{} IP address banned due to excessive rate limits. {}", key, msg);
                        }
                        errors::ConnectorError::ServerError { msg, status_code } => {
                            log::error!("{} Server error: {} (status code: {:?})", key, msg, status_code);
                        }
                        errors::ConnectorError::NetworkError(msg) => {
                            log::error!("{} Network error: Check your internet connection. {}", key, msg);
                        }
                        errors::ConnectorError::NotFoundError(msg) => {
                            log::error!("{} Resource not found. {}", key, msg);
                        }
                        connection_error::BadRequestError(msg) => {
                            log::error!("{} Bad request: Verify your input parameters. {}", key, msg);
                        }
                        other => {
                            log::error!("Unexpected ConnectionError variant: {:?}", other);
                        }
                    }
                } else {
                    log::error!("An unexpected error occurred for {}: {:#}", key, e);
                }
                Err(e.context(format!("Binance klines call failed for {}", key)))
            }
        }
    }

    /// Sleep to the start of the next minute when the used request weight
    /// leaves no headroom for another kline call.
    async fn respect_rate_limits(&self, key: &SeriesKey, rate_limits: &Option<Vec<RestApiRateLimit>>) {
        let Some(limits) = rate_limits else {
            return;
        };
        let headroom = BINANCE
            .limits
            .weight_limit_minute
            .saturating_sub(BINANCE.limits.kline_call_weight);
        for rate_limit in limits {
            if rate_limit.interval_num == 1 && rate_limit.interval == binance_interval::Minute {
                let current_weight = rate_limit.count;
                if current_weight > headroom {
                    let secs_into_min = (now_timestamp_ms() / 1000).rem_euclid(60) as u64;
                    let sleep_duration = Duration::from_secs(60 - secs_into_min);
                    log::info!(
                        "{} Current weight ({}) > headroom ({}), sleeping {:?} until the next minute",
                        key,
                        current_weight,
                        headroom,
                        sleep_duration
                    );
                    sleep(sleep_duration).await;
                }
            }
        }
    }
}

#[async_trait]
impl RemoteHistorySource for BinanceRestSource {
    async fn fetch(&self, key: &SeriesKey, start_ms: i64, end_ms: i64) -> Result<Vec<Bar>, CacheError> {
        let transient = |reason: String| CacheError::TransientFetch {
            key: key.clone(),
            reason,
        };

        let params = KlinesParams::builder(key.exchange_symbol(), klines_interval(key.interval))
            .limit(self.config.klines_limit)
            .start_time(Some(start_ms))
            .end_time(Some(end_ms))
            .build()
            .map_err(|e| transient(format!("{:#}", e)))?;

        let (rate_limits, rows) = self
            .fetch_klines_with_limits(key, params)
            .await
            .map_err(|e| transient(format!("{:#}", e)))?;
        self.respect_rate_limits(key, &rate_limits).await;

        let now_ms = now_timestamp_ms();
        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            match bar_from_kline(row, now_ms) {
                Ok(bar) => bars.push(bar),
                Err(reason) => log::warn!("{} skipping unparseable kline ({})", key, reason),
            }
        }
        Ok(bars)
    }

    fn page_limit(&self) -> usize {
        self.config.klines_limit.max(1) as usize
    }

    fn signature(&self) -> &'static str {
        "Binance REST klines"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> KlinesItemInner {
        KlinesItemInner::String(s.to_string())
    }

    fn row(open_time: i64, close_time: i64) -> Vec<KlinesItemInner> {
        vec![
            KlinesItemInner::Integer(open_time),
            text("100.5"),
            text("101.0"),
            text("99.5"),
            text("100.0"),
            text("12.5"),
            KlinesItemInner::Integer(close_time),
            text("1250.0"),
            KlinesItemInner::Integer(42),
            text("6.0"),
            text("600.0"),
            text("0"),
        ]
    }

    #[test]
    fn kline_row_maps_every_field() {
        let bar = bar_from_kline(row(0, 59_999), 60_000).unwrap();
        assert_eq!(bar.open_time, 0);
        assert_eq!(bar.close_time, 59_999);
        assert_eq!(bar.open, 100.5);
        assert_eq!(bar.close, 100.0);
        assert_eq!(bar.quote_volume, 1250.0);
        assert_eq!(bar.trade_count, 42);
        assert_eq!(bar.taker_buy_quote_volume, 600.0);
        assert!(bar.is_closed);
    }

    #[test]
    fn current_bucket_is_not_closed() {
        let bar = bar_from_kline(row(60_000, 119_999), 90_000).unwrap();
        assert!(!bar.is_closed);
    }

    #[test]
    fn short_row_is_rejected() {
        let mut short = row(0, 59_999);
        short.truncate(5);
        assert!(bar_from_kline(short, 60_000).is_err());
    }

    #[test]
    fn every_interval_has_an_exchange_code() {
        use strum::IntoEnumIterator;
        assert_eq!(Interval::iter().map(klines_interval).count(), 16);
    }
}
