//! Integration test: full training pipeline and checkpoint inference

use mamformer::architectures::ModelType;
use mamformer::data::Dataset;
use mamformer::device::DevicePreference;
use mamformer::inference::Predictor;
use mamformer::synthetic::AugmentConfig;
use mamformer::training::{CollectingSink, NoProgress, TrainingConfig, TrainingPipeline};
use ndarray::Array2;
use std::collections::HashMap;
use std::path::Path;

const N_ROWS: usize = 120;

fn series() -> Dataset {
    let values = Array2::from_shape_fn((N_ROWS, 4), |(i, j)| {
        let t = i as f64;
        match j {
            0 => (t / 5.0).sin(),
            1 => (t / 9.0).cos(),
            2 => ((i * 13) % 7) as f64,
            _ => 10.0 + 3.0 * (t / 5.0).sin() + (t / 9.0).cos(),
        }
    });
    Dataset::from_columns(
        vec!["a".into(), "b".into(), "noise".into(), "load".into()],
        values,
    )
    .unwrap()
}

fn tiny_config(model_dir: &Path) -> TrainingConfig {
    TrainingConfig::new(ModelType::Mamformer)
        .with_seq_len(4)
        .with_d_model(8)
        .with_n_layers(1)
        .with_batch_size(16)
        .with_epochs(2)
        .with_n_models(2)
        .with_top_k(2)
        .with_selector_trees(5)
        .with_device(DevicePreference::Cpu)
        .with_progress_every(1)
        .with_model_dir(model_dir)
}

#[test]
fn test_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = TrainingPipeline::new(tiny_config(dir.path())).unwrap();
    let sink = CollectingSink::new();

    let result = pipeline.run("series-1", &series(), "load", &sink).unwrap();

    // cut = floor(120 * 0.85) = 102, one test window per unseen row
    assert_eq!(result.predictions.len(), N_ROWS - 102);
    assert_eq!(result.true_values.len(), result.predictions.len());
    assert!(result.predictions.iter().all(|p| p.is_some()));
    assert_eq!(result.columns.len(), 3);
    assert_eq!(result.columns.last().unwrap(), "load");
    assert_eq!(result.feature_importance.len(), 3);
    assert_eq!(result.member_val_r2.len(), 2);
    assert!(result.metrics.rmse.is_some());
    assert!(result.model_path.exists());

    // progress is reported for the first member only
    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.overall_progress <= 50.0));
}

#[test]
fn test_checkpoint_serves_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = TrainingPipeline::new(tiny_config(dir.path())).unwrap();
    let result = pipeline.run("serve", &series(), "load", &NoProgress).unwrap();

    let predictor = Predictor::load(dir.path(), "serve").unwrap();
    assert_eq!(predictor.seq_len(), 4);
    assert_eq!(predictor.meta().columns, result.columns);

    let from_dataset = predictor.predict_dataset(&series()).unwrap();
    assert!(from_dataset.is_finite());

    // the target column may be omitted from records
    let data = series();
    let records: Vec<HashMap<String, f64>> = (N_ROWS - 4..N_ROWS)
        .map(|i| {
            result.columns[..result.columns.len() - 1]
                .iter()
                .map(|name| (name.clone(), data.column(name).unwrap()[i]))
                .collect()
        })
        .collect();
    let from_records = predictor.predict_records(&records).unwrap();
    assert!((from_records - from_dataset).abs() < 1e-9);

    let short = Array2::<f64>::zeros((3, result.columns.len()));
    assert!(predictor.predict(&short).is_err());

    let forecast = predictor.forecast_dataset(&series()).unwrap();
    assert!((forecast.value - from_dataset).abs() < 1e-9);
    assert_eq!(forecast.features, result.columns[..result.columns.len() - 1]);
    assert!(forecast.interval.0 <= forecast.value && forecast.value <= forecast.interval.1);
    let half = forecast.interval.1 - forecast.value;
    assert!((half - 0.196 * forecast.value.abs()).abs() < 1e-9);
}

#[test]
fn test_single_member_single_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config(dir.path()).with_n_models(1).with_epochs(1);
    let sink = CollectingSink::new();

    let result = TrainingPipeline::new(config)
        .unwrap()
        .run("one", &series(), "load", &sink)
        .unwrap();

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].epoch, 0);
    assert!((events[0].overall_progress - 0.0).abs() < 1e-12);
    assert_eq!(result.member_val_r2.len(), 1);
}

#[test]
fn test_auto_mamformer_runs_without_augmentation() {
    let dir = tempfile::tempdir().unwrap();
    let augment = AugmentConfig {
        mix_prob: 0.0,
        scale_prob: 0.0,
        noise_prob: 0.0,
        mask_prob: 0.0,
        ..AugmentConfig::default()
    };
    let config = tiny_config(dir.path())
        .with_model_type(ModelType::AutoMamformer)
        .with_d_model(16)
        .with_n_models(1)
        .with_augment(augment);

    let result = TrainingPipeline::new(config)
        .unwrap()
        .run("auto", &series(), "load", &NoProgress)
        .unwrap();
    assert_eq!(result.model_type, ModelType::AutoMamformer);
    assert!(result.metrics.mae.is_some());
}

#[test]
fn test_same_seed_same_result() {
    let dir = tempfile::tempdir().unwrap();
    let run = |id: &str| {
        TrainingPipeline::new(tiny_config(dir.path()).with_n_models(1))
            .unwrap()
            .run(id, &series(), "load", &NoProgress)
            .unwrap()
    };
    let first = run("seed-a");
    let second = run("seed-b");
    assert_eq!(first.columns, second.columns);
    for (a, b) in first.predictions.iter().zip(&second.predictions) {
        assert!((a.unwrap() - b.unwrap()).abs() < 1e-9);
    }
}

#[test]
fn test_rejects_bad_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = TrainingPipeline::new(tiny_config(dir.path())).unwrap();

    assert!(pipeline.run("missing", &series(), "nope", &NoProgress).is_err());
    assert!(pipeline.run("../escape", &series(), "load", &NoProgress).is_err());

    let short = Dataset::from_columns(
        vec!["a".into(), "load".into()],
        Array2::from_shape_fn((10, 2), |(i, j)| (i + j) as f64),
    )
    .unwrap();
    assert!(pipeline.run("short", &short, "load", &NoProgress).is_err());

    assert!(TrainingPipeline::new(TrainingConfig::new(ModelType::Mamformer).with_d_model(10)).is_err());
}

#[test]
fn test_config_from_json() {
    let cfg = TrainingConfig::from_json_str(r#"{"model_type": "auto-mamformer", "d_model": 32, "epochs": 3}"#).unwrap();
    assert_eq!(cfg.model_type, ModelType::AutoMamformer);
    assert_eq!(cfg.d_model, 32);
    assert_eq!(cfg.seq_len, 12);
    assert!((cfg.effective_dropout() - 0.15).abs() < 1e-12);

    assert!(TrainingConfig::from_json_str(r#"{"unknown_option": 1}"#).is_err());
}
