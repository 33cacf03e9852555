// Streaming price/volume indicators
pub mod engine;
pub mod output;
pub mod rolling;

// Re-export commonly used types
pub use engine::{BaseRow, CoarseRow, Phase, StreamingIndicatorEngine, compute_window};
