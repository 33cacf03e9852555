// Bounded in-memory stores and the per-key catalog
pub mod catalog;
pub mod depth_store;
pub mod series_store;

// Re-export commonly used types
pub use catalog::{CatalogStatus, SeriesCatalog, SeriesStatus};
pub use depth_store::DepthSnapshotStore;
pub use series_store::BoundedSeriesStore;
