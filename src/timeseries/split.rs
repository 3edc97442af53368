//! Chronological train / validation / test partitioning

use crate::error::{MamformerError, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Row ranges of the three splits. The test range starts `seq_len - 1`
/// rows before the training cut so its first window ends on the first
/// unseen timestep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRanges {
    pub train: Range<usize>,
    pub val: Range<usize>,
    pub test: Range<usize>,
}

/// Order-preserving splitter; never shuffles rows
#[derive(Debug, Clone)]
pub struct ChronologicalSplit {
    seq_len: usize,
    test_ratio: f64,
    val_ratio: f64,
}

impl ChronologicalSplit {
    pub fn new(seq_len: usize) -> Self {
        Self {
            seq_len,
            test_ratio: 0.15,
            val_ratio: 0.15,
        }
    }

    pub fn with_test_ratio(mut self, ratio: f64) -> Self {
        self.test_ratio = ratio;
        self
    }

    pub fn with_val_ratio(mut self, ratio: f64) -> Self {
        self.val_ratio = ratio;
        self
    }

    pub fn split(&self, n_rows: usize) -> Result<SplitRanges> {
        let cut = (n_rows as f64 * (1.0 - self.test_ratio)).floor() as usize;
        let train_size = (cut as f64 * (1.0 - self.val_ratio)).floor() as usize;
        let test_start = (cut + 1).saturating_sub(self.seq_len);

        let ranges = SplitRanges {
            train: 0..train_size,
            val: train_size..cut,
            test: test_start..n_rows,
        };

        for (name, r) in [("train split", &ranges.train), ("validation split", &ranges.val), ("test split", &ranges.test)] {
            if r.len() < self.seq_len {
                return Err(MamformerError::InsufficientData {
                    what: name.to_string(),
                    required: self.seq_len,
                    available: r.len(),
                });
            }
        }
        Ok(ranges)
    }
}
