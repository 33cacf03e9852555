use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::runtime::Runtime;

use kline_cache::config::BinanceApiConfig;
use kline_cache::utils::time_utils::{epoch_ms_to_utc, now_timestamp_ms};
use kline_cache::{
    BinanceRestSource, Cli, Interval, MarketDataService, NoRemoteSource, RemoteHistorySource,
    SeriesKey,
};

fn main() -> Result<()> {
    // A. Init Logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    // B. Parse Args
    let args = Cli::parse();
    #[cfg(debug_assertions)]
    log::info!("Parsed arguments: {:?}", args);

    let interval = Interval::parse(&args.interval)
        .with_context(|| format!("Bad --interval {:?}", args.interval))?;
    let key = SeriesKey::new(&args.symbol, interval);
    let (start, end) = args.range(now_timestamp_ms());
    if start > end {
        anyhow::bail!("Range start {} is after end {}", start, end);
    }

    // C. Remote source
    let source: Arc<dyn RemoteHistorySource> = if args.offline {
        Arc::new(NoRemoteSource)
    } else {
        Arc::new(
            BinanceRestSource::new(BinanceApiConfig::default())
                .context("Failed to build Binance REST client")?,
        )
    };
    log::info!("History source: {}", source.signature());

    let service = MarketDataService::new(args.service_config(), source)
        .context("Failed to build market data service")?;

    // D. Prepare (blocking on the reconciler)
    let rt = Runtime::new().context("Failed to create Tokio runtime")?;
    let bars = rt.block_on(service.prepare(&key, start, end));

    println!(
        "{}: {} bar(s) in [{}, {}]",
        key,
        bars.len(),
        epoch_ms_to_utc(start),
        epoch_ms_to_utc(end)
    );
    if let (Some(first), Some(last)) = (bars.first(), bars.last()) {
        println!(
            "  first open {}  last open {}  last close {}",
            epoch_ms_to_utc(first.open_time),
            epoch_ms_to_utc(last.open_time),
            last.close
        );
    }

    // E. Optional replay through the indicator engine
    if args.replay {
        let delivered = service.replay(&key, start, end);
        println!("  replayed {} bar(s), indicator phase {}", delivered, service.phase(&key));
        if let Some(signal) = service.indicators().latest_signal(&key) {
            println!(
                "  latest signal {} pv_corr={:?} zscore={:?}",
                epoch_ms_to_utc(signal.ts),
                signal.pv_corr,
                signal.zscore
            );
        }
    }

    // F. Status
    let status = service.status();
    if let Some(report) = &status.last_coverage {
        println!(
            "  coverage: {} gap(s), {} fetch call(s), {} row(s) fetched, {} appended",
            report.gaps.len(),
            report.fetch_calls,
            report.rows_fetched,
            report.rows_appended
        );
    }
    for series in &status.catalog.series {
        println!(
            "  store {}: {} bar(s), bounds {:?}",
            series.key, series.count, series.bounds
        );
    }

    service.shutdown();
    Ok(())
}
