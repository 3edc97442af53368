//! Time series module
//!
//! - Sliding windows with target masking
//! - Chronological train / validation / test splits

mod split;
mod windowing;

pub use split::{ChronologicalSplit, SplitRanges};
pub use windowing::{WindowedSamples, Windower};
