//! Sliding-window sample construction

use crate::error::{MamformerError, Result};
use ndarray::{s, Array1, Array2, Array3, ArrayView2};

/// Supervised samples cut from a series: `x` is `(n, seq_len, n_features)`
/// and `y[i]` is the target at the last timestep of window `i`.
#[derive(Debug, Clone)]
pub struct WindowedSamples {
    pub x: Array3<f64>,
    pub y: Array1<f64>,
}

impl WindowedSamples {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn seq_len(&self) -> usize {
        self.x.shape()[1]
    }

    pub fn n_features(&self) -> usize {
        self.x.shape()[2]
    }

    pub fn window(&self, i: usize) -> ArrayView2<'_, f64> {
        self.x.slice(s![i, .., ..])
    }
}

/// Cuts overlapping windows of `seq_len` rows; the target column is zeroed
/// inside every window so the label never leaks into the inputs.
#[derive(Debug, Clone, Copy)]
pub struct Windower {
    seq_len: usize,
    target_index: usize,
}

impl Windower {
    pub fn new(seq_len: usize, target_index: usize) -> Result<Self> {
        if seq_len == 0 {
            return Err(MamformerError::invalid("seq_len", 0, "must be at least 1"));
        }
        Ok(Self { seq_len, target_index })
    }

    pub fn build(&self, data: &Array2<f64>) -> Result<WindowedSamples> {
        let (n_rows, n_cols) = data.dim();
        if self.target_index >= n_cols {
            return Err(MamformerError::ShapeError {
                expected: format!("target index < {}", n_cols),
                actual: self.target_index.to_string(),
            });
        }
        if n_rows < self.seq_len {
            return Err(MamformerError::InsufficientData {
                what: "windowing".to_string(),
                required: self.seq_len,
                available: n_rows,
            });
        }

        let n = n_rows - self.seq_len + 1;
        let mut x = Array3::<f64>::zeros((n, self.seq_len, n_cols));
        let mut y = Array1::<f64>::zeros(n);

        for i in 0..n {
            let mut w = x.slice_mut(s![i, .., ..]);
            w.assign(&data.slice(s![i..i + self.seq_len, ..]));
            w.column_mut(self.target_index).fill(0.0);
            y[i] = data[[i + self.seq_len - 1, self.target_index]];
        }

        Ok(WindowedSamples { x, y })
    }

    /// Single inference window from exactly `seq_len` rows
    pub fn single(&self, rows: &Array2<f64>) -> Result<Array2<f64>> {
        if rows.nrows() != self.seq_len {
            return Err(MamformerError::ShapeError {
                expected: format!("{} rows", self.seq_len),
                actual: format!("{} rows", rows.nrows()),
            });
        }
        let mut w = rows.clone();
        if self.target_index < w.ncols() {
            w.column_mut(self.target_index).fill(0.0);
        }
        Ok(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_and_labels() {
        // t = 0..9, col0 = t, target col1 = 10t
        let data = Array2::from_shape_fn((10, 2), |(i, j)| if j == 0 { i as f64 } else { 10.0 * i as f64 });
        let samples = Windower::new(4, 1).unwrap().build(&data).unwrap();

        assert_eq!(samples.len(), 7);
        assert_eq!(samples.y[0], 30.0);
        assert_eq!(samples.y[6], 90.0);
        assert_eq!(samples.window(2)[[3, 0]], 5.0);
        assert!(samples.x.slice(s![.., .., 1]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_exact_length_gives_one_window() {
        let data = Array2::from_elem((3, 2), 1.0);
        let samples = Windower::new(3, 0).unwrap().build(&data).unwrap();
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_too_short() {
        let data = Array2::from_elem((2, 2), 1.0);
        assert!(matches!(
            Windower::new(3, 0).unwrap().build(&data),
            Err(MamformerError::InsufficientData { .. })
        ));
    }
}
