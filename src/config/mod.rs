//! Configuration module for the kline cache.

pub mod archive;
pub mod binance;
pub mod indicator;
pub mod store;

mod debug; // Private: callers go through crate::config::DEBUG_FLAGS
pub use debug::DEBUG_FLAGS;

// Re-export commonly used items
pub use archive::{ARCHIVE, bar_table_filename, depth_table_filename};
pub use binance::{BINANCE, BinanceApiConfig};
pub use indicator::{INDICATOR, IndicatorConfig, VolumeSource};
pub use store::{CatalogConfig, ReconcilerConfig, STORE};
