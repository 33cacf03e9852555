// Remote history sources and archive reconciliation
pub mod binance_rest;
pub mod history_source;
pub mod reconciler;

// Re-export commonly used types
pub use binance_rest::BinanceRestSource;
pub use history_source::{NoRemoteSource, RemoteHistorySource};
pub use reconciler::{CoverageReport, GapReconciler, find_gaps};
