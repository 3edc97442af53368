//! Tabular series loading.
//!
//! A [`Dataset`] is a named, row-ordered numeric table: rows are timesteps
//! (oldest first) and every column is a real-valued feature. One column is
//! later designated as the forecasting target.

use crate::error::{MamformerError, Result};
use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

/// Ordered numeric table with named columns
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    values: Array2<f64>,
}

/// Per-column descriptive statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Dataset {
    /// Build a dataset from column names and a `(rows, columns)` matrix
    pub fn from_columns(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(MamformerError::ShapeError {
                expected: format!("{} columns", columns.len()),
                actual: format!("{} columns", values.ncols()),
            });
        }
        for (i, name) in columns.iter().enumerate() {
            if columns[..i].contains(name) {
                return Err(MamformerError::DataError(format!("duplicate column '{}'", name)));
            }
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(MamformerError::DataError(
                "dataset contains non-finite values".to_string(),
            ));
        }
        Ok(Self { columns, values })
    }

    /// Convert a polars frame. Columns that cannot be read as numbers are
    /// dropped with a warning; missing values are rejected.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let n_rows = df.height();
        let mut names = Vec::new();
        let mut col_data: Vec<Vec<f64>> = Vec::new();

        for column in df.get_columns() {
            let name = column.name().to_string();
            if column.null_count() > 0 {
                return Err(MamformerError::DataError(format!(
                    "column '{}' has {} missing values",
                    name,
                    column.null_count()
                )));
            }
            let casted = match column.cast(&DataType::Float64) {
                Ok(c) if c.null_count() == 0 => c,
                _ => {
                    warn!(column = %name, dtype = %column.dtype(), "dropping non-numeric column");
                    continue;
                }
            };
            let values: Vec<f64> = casted.f64()?.into_no_null_iter().collect();
            names.push(name);
            col_data.push(values);
        }

        if names.is_empty() {
            return Err(MamformerError::DataError("no numeric columns found".to_string()));
        }

        let values = Array2::from_shape_fn((n_rows, names.len()), |(r, c)| col_data[c][r]);
        debug!(rows = n_rows, columns = names.len(), "loaded dataset");
        Self::from_columns(names, values)
    }

    /// Load a CSV file with a header row
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            MamformerError::DataError(format!("cannot open {}: {}", path.display(), e))
        })?;
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(1000))
            .into_reader_with_file_handle(file)
            .finish()?;
        Self::from_dataframe(&df)
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.values.ncols()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut Array2<f64> {
        &mut self.values
    }

    /// Position of a named column
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| MamformerError::FeatureNotFound(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        let idx = self.column_index(name)?;
        Ok(self.values.column(idx))
    }

    /// New dataset with exactly the named columns, in the given order
    pub fn select(&self, names: &[String]) -> Result<Self> {
        let indices = names
            .iter()
            .map(|n| self.column_index(n))
            .collect::<Result<Vec<_>>>()?;
        let values = self.values.select(Axis(1), &indices);
        Ok(Self {
            columns: names.to_vec(),
            values,
        })
    }

    /// Rows `[start, end)`
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        if start > end || end > self.n_rows() {
            return Err(MamformerError::ShapeError {
                expected: format!("row range within 0..{}", self.n_rows()),
                actual: format!("{}..{}", start, end),
            });
        }
        Ok(Self {
            columns: self.columns.clone(),
            values: self.values.slice(s![start..end, ..]).to_owned(),
        })
    }

    /// Split into `(features, target, feature_names)`
    pub fn feature_matrix(&self, target: &str) -> Result<(Array2<f64>, Array1<f64>, Vec<String>)> {
        let t = self.column_index(target)?;
        let feature_idx: Vec<usize> = (0..self.n_columns()).filter(|&i| i != t).collect();
        let names = feature_idx.iter().map(|&i| self.columns[i].clone()).collect();
        let x = self.values.select(Axis(1), &feature_idx);
        let y = self.values.column(t).to_owned();
        Ok((x, y, names))
    }

    pub fn summary(&self) -> Vec<ColumnSummary> {
        self.columns
            .iter()
            .zip(self.values.columns())
            .map(|(name, col)| {
                let n = col.len().max(1) as f64;
                let mean = col.sum() / n;
                let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                ColumnSummary {
                    name: name.clone(),
                    mean,
                    std: var.sqrt(),
                    min: col.iter().copied().fold(f64::INFINITY, f64::min),
                    max: col.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> Dataset {
        Dataset::from_columns(
            vec!["a".into(), "b".into(), "y".into()],
            array![[1.0, 10.0, 0.5], [2.0, 20.0, 1.5], [3.0, 30.0, 2.5]],
        )
        .unwrap()
    }

    #[test]
    fn test_from_dataframe_drops_text_columns() {
        let df = df! {
            "a" => &[1.0, 2.0, 3.0],
            "label" => &["x", "y", "z"],
            "y" => &[1i64, 2, 3],
        }
        .unwrap();
        let ds = Dataset::from_dataframe(&df).unwrap();
        assert_eq!(ds.columns(), &["a".to_string(), "y".to_string()]);
        assert_eq!(ds.values()[[2, 1]], 3.0);
    }

    #[test]
    fn test_from_dataframe_rejects_nulls() {
        let df = df! {
            "a" => &[Some(1.0), None, Some(3.0)],
        }
        .unwrap();
        assert!(matches!(
            Dataset::from_dataframe(&df),
            Err(MamformerError::DataError(_))
        ));
    }

    #[test]
    fn test_select_and_feature_matrix() {
        let ds = sample();
        let picked = ds.select(&["y".into(), "a".into()]).unwrap();
        assert_eq!(picked.values()[[1, 0]], 1.5);

        let (x, y, names) = ds.feature_matrix("y").unwrap();
        assert_eq!(x.ncols(), 2);
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(y[2], 2.5);
        assert!(matches!(ds.column_index("missing"), Err(MamformerError::FeatureNotFound(_))));
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let res = Dataset::from_columns(vec!["a".into(), "a".into()], array![[1.0, 2.0]]);
        assert!(res.is_err());
    }

    #[test]
    fn test_summary() {
        let summary = sample().summary();
        assert_eq!(summary[0].mean, 2.0);
        assert_eq!(summary[1].max, 30.0);
    }
}
