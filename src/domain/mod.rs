// Domain types and value objects
pub mod bar;
pub mod depth;
pub mod series_key;
pub mod time_range;

// Re-export commonly used types
pub use bar::Bar;
pub use depth::DepthSnapshot;
pub use series_key::{Interval, SeriesKey, normalize_symbol};
pub use time_range::{Gap, TimeRange};
