//! Synthetic sample generation
//!
//! Training windows are perturbed on the fly each time they are drawn, so
//! every epoch sees a different variant of the same series.

mod augment;

pub use augment::{AugmentConfig, Augmenter};
