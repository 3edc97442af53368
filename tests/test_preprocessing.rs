//! Integration test: clipping, selection, splitting, scaling and windowing

use mamformer::data::Dataset;
use mamformer::preprocessing::{FeatureSelector, QuantileClipper, RobustScaler};
use mamformer::timeseries::{ChronologicalSplit, Windower};
use ndarray::{array, s, Array2};
use polars::prelude::*;
use proptest::prelude::*;

fn sample_df() -> DataFrame {
    let n = 80;
    let t: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let signal: Vec<f64> = t.iter().map(|v| (v / 6.0).sin()).collect();
    let noise: Vec<f64> = (0..n).map(|i| ((i * 37) % 11) as f64).collect();
    let target: Vec<f64> = signal.iter().zip(&noise).map(|(s, n)| 5.0 * s + 0.01 * n).collect();
    df!(
        "signal" => &signal,
        "noise" => &noise,
        "label" => &["a"; 80],
        "target" => &target,
    )
    .unwrap()
}

#[test]
fn test_dataframe_drops_text_columns() {
    let ds = Dataset::from_dataframe(&sample_df()).unwrap();
    assert_eq!(ds.columns(), &["signal", "noise", "target"]);
    assert_eq!(ds.n_rows(), 80);
}

#[test]
fn test_csv_round_trip_through_polars() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("series.csv");
    let mut df = sample_df();
    let mut file = std::fs::File::create(&path).unwrap();
    CsvWriter::new(&mut file).finish(&mut df).unwrap();

    let ds = Dataset::from_csv(&path).unwrap();
    assert_eq!(ds.n_columns(), 3);
    assert!((ds.column("target").unwrap()[3] - ds.values()[[3, 2]]).abs() < 1e-12);
}

#[test]
fn test_selection_prefers_signal() {
    let ds = Dataset::from_dataframe(&sample_df()).unwrap();
    let sel = FeatureSelector::new(1).with_n_estimators(10).select(&ds, "target").unwrap();
    assert_eq!(sel.features, vec!["signal".to_string()]);
    assert_eq!(sel.columns(), vec!["signal".to_string(), "target".to_string()]);
    assert_eq!(sel.scores.len(), 2);
}

#[test]
fn test_windows_never_see_target() {
    // 10 timesteps, feature = t, target = 100 + t
    let data = Array2::from_shape_fn((10, 2), |(i, j)| if j == 0 { i as f64 } else { 100.0 + i as f64 });
    let samples = Windower::new(3, 1).unwrap().build(&data).unwrap();

    assert_eq!(samples.len(), 8);
    for i in 0..samples.len() {
        let w = samples.window(i);
        assert!(w.column(1).iter().all(|v| *v == 0.0));
        assert_eq!(w[[2, 0]], (i + 2) as f64);
        assert_eq!(samples.y[i], 100.0 + (i + 2) as f64);
    }
}

#[test]
fn test_five_rows_three_windows() {
    let data = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0], [5.0, 50.0]];
    let samples = Windower::new(3, 1).unwrap().build(&data).unwrap();
    assert_eq!(samples.len(), 3);
    assert_eq!(samples.window(0), array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0]]);
    assert_eq!(samples.y[0], 30.0);
}

#[test]
fn test_scaler_median_iqr() {
    let data = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
    let mut scaler = RobustScaler::new();
    let scaled = scaler.fit_transform(&data).unwrap();

    assert_eq!(scaler.params()[0].center, 3.0);
    assert_eq!(scaler.params()[0].scale, 2.0);
    assert_eq!(scaled[[2, 0]], 0.0);
    assert_eq!(scaler.inverse_column(0, &[0.0]).unwrap()[0], 3.0);
}

#[test]
fn test_constant_column_scales_by_one() {
    let data = array![[7.0, 1.0], [7.0, 2.0], [7.0, 3.0]];
    let mut scaler = RobustScaler::new();
    let scaled = scaler.fit_transform(&data).unwrap();
    assert_eq!(scaler.params()[0].scale, 1.0);
    assert!(scaled.column(0).iter().all(|v| *v == 0.0));
}

#[test]
fn test_clipper_leaves_target_untouched() {
    let mut data = Array2::from_shape_fn((101, 2), |(i, _)| i as f64);
    data[[100, 0]] = 1e6;
    data[[100, 1]] = 1e6;

    let mut clipper = QuantileClipper::new(0.01, 0.99).unwrap();
    clipper.fit(&data, Some(1));
    clipper.transform_inplace(&mut data).unwrap();

    assert!(data[[100, 0]] < 1e6);
    assert_eq!(data[[100, 1]], 1e6);
    assert!(clipper.bounds()[1].is_none());
}

#[test]
fn test_split_then_window_counts() {
    let seq_len = 5;
    let n_rows = 200;
    let ranges = ChronologicalSplit::new(seq_len).split(n_rows).unwrap();
    let data = Array2::from_shape_fn((n_rows, 2), |(i, j)| (i * (j + 1)) as f64);
    let windower = Windower::new(seq_len, 1).unwrap();

    let test = windower
        .build(&data.slice(s![ranges.test.clone(), ..]).to_owned())
        .unwrap();
    // one test label per unseen row
    assert_eq!(test.len(), n_rows - ranges.val.end);
    assert_eq!(test.y[0], data[[ranges.val.end, 1]]);
}

#[test]
fn test_split_too_short() {
    assert!(ChronologicalSplit::new(12).split(20).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_window_count_and_labels(rows in 1usize..60, cols in 1usize..5, seq_len in 1usize..12, target in 0usize..5) {
        let target = target % cols;
        let data = Array2::from_shape_fn((rows, cols), |(i, j)| (i * 10 + j) as f64);
        let windower = Windower::new(seq_len, target).unwrap();
        match windower.build(&data) {
            Ok(samples) => {
                prop_assert!(rows >= seq_len);
                prop_assert_eq!(samples.len(), rows - seq_len + 1);
                for i in 0..samples.len() {
                    prop_assert_eq!(samples.y[i], data[[i + seq_len - 1, target]]);
                    prop_assert!(samples.window(i).column(target).iter().all(|v| *v == 0.0));
                }
            }
            Err(_) => prop_assert!(rows < seq_len),
        }
    }

    #[test]
    fn prop_scaler_inverse_recovers_unseen_values(
        fit_rows in proptest::collection::vec(proptest::collection::vec(-1e4f64..1e4, 3), 2..40),
        new_rows in proptest::collection::vec(proptest::collection::vec(-1e5f64..1e5, 3), 1..40),
    ) {
        let to_matrix = |rows: &[Vec<f64>]| {
            Array2::from_shape_vec((rows.len(), 3), rows.iter().flatten().copied().collect()).unwrap()
        };
        let x = to_matrix(&fit_rows);
        let y = to_matrix(&new_rows);

        let mut scaler = RobustScaler::new();
        scaler.fit(&x).unwrap();
        let back = scaler.inverse_transform(&scaler.transform(&y).unwrap()).unwrap();

        for (a, b) in back.iter().zip(y.iter()) {
            prop_assert!((a - b).abs() < 1e-6 * (1.0 + b.abs()));
        }
        // last column plays the target
        let target = scaler.transform(&y).unwrap().column(2).to_vec();
        let restored = scaler.inverse_column(2, &target).unwrap();
        for (a, b) in restored.iter().zip(y.column(2)) {
            prop_assert!((a - b).abs() < 1e-6 * (1.0 + b.abs()));
        }
    }

    #[test]
    fn prop_selector_cardinality(k in 1usize..6, n_features in 1usize..5) {
        let values = Array2::from_shape_fn((40, n_features + 1), |(i, j)| ((i * (j + 3)) % 11) as f64 + j as f64);
        let mut names: Vec<String> = (0..n_features).map(|j| format!("f{}", j)).collect();
        names.push("y".to_string());
        let ds = Dataset::from_columns(names, values).unwrap();

        let sel = FeatureSelector::new(k).with_n_estimators(3).select(&ds, "y").unwrap();
        prop_assert_eq!(sel.features.len(), k.min(n_features));
        let sel_columns = sel.columns();
        prop_assert_eq!(sel_columns.last().map(String::as_str), Some("y"));
    }

    #[test]
    fn prop_split_keeps_order(n_rows in 60usize..400, seq_len in 1usize..8) {
        if let Ok(r) = ChronologicalSplit::new(seq_len).split(n_rows) {
            prop_assert_eq!(r.train.start, 0);
            prop_assert_eq!(r.train.end, r.val.start);
            prop_assert_eq!(r.test.end, n_rows);
            prop_assert_eq!(r.test.start + seq_len - 1, r.val.end);
        }
    }
}
