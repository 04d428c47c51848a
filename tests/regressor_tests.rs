use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::{Array1, Array3};
use pur_resnet::{
    transpose_series, Callback, EarlyStopping, Error, LambdaCallback, Metric, Optimizer, Regressor,
    RegressorConfig, ResNetRegressor,
};

const EPSILON: f32 = 1e-5;

/// `(n_instances, n_dimensions, series_length)` sine waves whose target is their frequency.
fn sine_dataset(n_instances: usize, n_dimensions: usize, series_length: usize) -> (Array3<f32>, Array1<f32>) {
    let y = Array1::from_shape_fn(n_instances, |i| 0.1 + 0.05 * i as f32);
    let x = Array3::from_shape_fn((n_instances, n_dimensions, series_length), |(i, d, t)| {
        (y[i] * t as f32 + d as f32).sin()
    });
    (x, y)
}

#[test]
fn test_scenario_six_epochs_without_bias() {
    let config = RegressorConfig::default()
        .with_n_epochs(6)
        .with_batch_size(4)
        .with_use_bias(false)
        .with_random_state(0);
    let mut regressor = ResNetRegressor::new(config).unwrap();
    let (x, y) = sine_dataset(10, 1, 24);

    regressor.fit(&x, &y).unwrap();

    let model = regressor.model().unwrap();
    assert_eq!(model.input_shape(), (24, 1));
    assert_eq!(model.output_shape(), (1,));
    assert!(!model.head().use_bias());
    assert_eq!(regressor.input_shape(), Some((24, 1)));

    let history = regressor.history().unwrap();
    assert_eq!(history.len(), 6);
    assert_eq!(history.params.steps, 3);
    let epochs: Vec<usize> = history.epochs().iter().map(|e| e.epoch).collect();
    assert_eq!(epochs, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(history.metric("mean_squared_error").map(|m| m.len()), Some(6));
}

#[test]
fn test_all_test_params_fit() {
    let (x, y) = sine_dataset(10, 1, 12);
    for params in ResNetRegressor::test_params("default") {
        let n_epochs = params.config.n_epochs;
        let mut regressor = ResNetRegressor::from_params(params).unwrap();
        regressor.fit(&x, &y).unwrap();

        let history = regressor.history().unwrap();
        assert!(!history.is_empty());
        assert_eq!(history.len(), n_epochs);

        let prediction = regressor.predict(&x).unwrap();
        assert_eq!(prediction.len(), 10);
    }
}

#[test]
fn test_transpose_is_its_own_inverse() {
    let (x, _) = sine_dataset(3, 2, 5);
    let transposed = transpose_series(&x);
    assert_eq!(transposed.dim(), (3, 5, 2));
    assert_eq!(transposed[[1, 4, 0]], x[[1, 0, 4]]);
    assert_eq!(transpose_series(&transposed), x);
}

#[test]
fn test_default_metric_and_optimizer() {
    let mut regressor = ResNetRegressor::new(RegressorConfig::default().with_n_epochs(1).with_batch_size(5)).unwrap();
    let (x, y) = sine_dataset(5, 1, 10);
    regressor.fit(&x, &y).unwrap();

    let model = regressor.model().unwrap();
    assert_eq!(model.metrics(), &[Metric::MeanSquaredError]);
    match model.optimizer() {
        Optimizer::Adam { learning_rate, .. } => assert!((learning_rate - 0.01).abs() < EPSILON),
        other => panic!("expected adam, got {:?}", other),
    }
}

#[test]
fn test_explicit_metrics_and_optimizer_verbatim() {
    let metrics = vec![Metric::MeanAbsoluteError, Metric::MeanSquaredError, Metric::RootMeanSquaredError];
    let optimizer = Optimizer::rmsprop(0.002);
    let config = RegressorConfig::default()
        .with_n_epochs(2)
        .with_batch_size(5)
        .with_metrics(metrics.clone())
        .with_optimizer(optimizer.clone());
    let mut regressor = ResNetRegressor::new(config).unwrap();
    let (x, y) = sine_dataset(5, 2, 10);
    regressor.fit(&x, &y).unwrap();

    assert_eq!(regressor.model().unwrap().metrics(), metrics.as_slice());
    assert_eq!(regressor.fitted_optimizer(), Some(&optimizer));
    let logs = regressor.history().unwrap().last().unwrap();
    let keys: Vec<&str> = logs.metrics.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["mean_absolute_error", "mean_squared_error", "root_mean_squared_error"]);
}

#[test]
fn test_callbacks_are_copied_per_fit() {
    let epochs_seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&epochs_seen);
    let callbacks: Vec<Box<dyn Callback>> = vec![
        Box::new(LambdaCallback::new().with_on_epoch_end(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
        Box::new(EarlyStopping::new("loss", 100)),
    ];
    let config = RegressorConfig::default().with_n_epochs(3).with_batch_size(4).with_random_state(1);
    let mut regressor = ResNetRegressor::with_callbacks(config, callbacks).unwrap();
    let (x, y) = sine_dataset(8, 1, 10);
    regressor.fit(&x, &y).unwrap();

    assert_eq!(epochs_seen.load(Ordering::SeqCst), 3);

    // The configured early stopping never saw an epoch; the copy that ran did
    let configured = regressor.callbacks()[1].as_any().downcast_ref::<EarlyStopping>().unwrap();
    assert_eq!(configured.best(), None);
    let fitted = regressor.fitted_callbacks()[1].as_any().downcast_ref::<EarlyStopping>().unwrap();
    assert!(fitted.best().is_some());
}

#[test]
fn test_early_stopping_shortens_history() {
    let callbacks: Vec<Box<dyn Callback>> = vec![Box::new(EarlyStopping::new("loss", 1).with_min_delta(1e6))];
    let config = RegressorConfig::default().with_n_epochs(50).with_batch_size(4).with_random_state(2);
    let mut regressor = ResNetRegressor::with_callbacks(config, callbacks).unwrap();
    let (x, y) = sine_dataset(8, 1, 10);
    regressor.fit(&x, &y).unwrap();

    assert_eq!(regressor.history().unwrap().len(), 2);
}

#[test]
fn test_seed_reproducibility() {
    let (x, y) = sine_dataset(8, 1, 16);
    let config = RegressorConfig::default().with_n_epochs(3).with_batch_size(4).with_random_state(42);

    let mut first = ResNetRegressor::new(config.clone()).unwrap();
    let mut second = ResNetRegressor::new(config).unwrap();
    first.fit(&x, &y).unwrap();
    second.fit(&x, &y).unwrap();

    assert_eq!(first.history().unwrap().losses(), second.history().unwrap().losses());
    assert_eq!(first.predict(&x).unwrap(), second.predict(&x).unwrap());
}

#[test]
fn test_refit_replaces_model() {
    let config = RegressorConfig::default().with_n_epochs(2).with_batch_size(4).with_random_state(3);
    let mut regressor = ResNetRegressor::new(config).unwrap();

    let (x, y) = sine_dataset(8, 1, 10);
    regressor.fit(&x, &y).unwrap();
    assert_eq!(regressor.input_shape(), Some((10, 1)));

    let (wider, y) = sine_dataset(6, 3, 14);
    regressor.fit(&wider, &y).unwrap();
    assert_eq!(regressor.input_shape(), Some((14, 3)));
    assert_eq!(regressor.model().unwrap().input_shape(), (14, 3));
    assert_eq!(regressor.history().unwrap().params.samples, 6);
}

#[test]
fn test_verbose_fit_matches_quiet_fit() {
    let (x, y) = sine_dataset(8, 1, 12);
    let config = RegressorConfig::default().with_n_epochs(3).with_batch_size(4).with_random_state(9);

    let mut quiet = ResNetRegressor::new(config.clone()).unwrap();
    let mut verbose = ResNetRegressor::new(config.with_verbose(true)).unwrap();
    quiet.fit(&x, &y).unwrap();
    verbose.fit(&x, &y).unwrap();

    assert!(verbose.config().verbose);
    assert_eq!(verbose.history().unwrap().len(), 3);
    assert_eq!(verbose.history(), quiet.history());
    assert!(verbose.model().unwrap().summary().contains("Total params"));
}

#[test]
fn test_predict_before_fit_fails() {
    let regressor = ResNetRegressor::new(RegressorConfig::default()).unwrap();
    let (x, y) = sine_dataset(2, 1, 8);
    assert!(matches!(regressor.predict(&x), Err(Error::NotFitted)));
    assert!(matches!(regressor.score(&x, &y), Err(Error::NotFitted)));
}

#[test]
fn test_score_is_r2() {
    let config = RegressorConfig::default().with_n_epochs(2).with_batch_size(4).with_random_state(4);
    let mut regressor = ResNetRegressor::new(config).unwrap();
    let (x, y) = sine_dataset(8, 1, 10);
    regressor.fit(&x, &y).unwrap();

    let prediction = regressor.predict(&x).unwrap();
    let expected = pur_resnet::r2_score(&prediction, &y);
    assert!((regressor.score(&x, &y).unwrap() - expected).abs() < EPSILON);
}

#[test]
fn test_save_and_load() {
    let config = RegressorConfig::default().with_n_epochs(2).with_batch_size(4).with_random_state(5);
    let callbacks: Vec<Box<dyn Callback>> = vec![Box::new(LambdaCallback::new())];
    let mut regressor = ResNetRegressor::with_callbacks(config, callbacks).unwrap();
    let (x, y) = sine_dataset(8, 2, 10);
    regressor.fit(&x, &y).unwrap();

    let path = std::env::temp_dir().join(format!("resnet_regressor_{}.json", std::process::id()));
    regressor.save(&path).unwrap();
    let loaded = ResNetRegressor::load(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(loaded.config(), regressor.config());
    assert_eq!(loaded.input_shape(), Some((10, 2)));
    assert_eq!(loaded.history(), regressor.history());
    assert!(loaded.callbacks().is_empty());

    let expected = regressor.predict(&x).unwrap();
    let actual = loaded.predict(&x).unwrap();
    for (a, b) in expected.iter().zip(actual.iter()) {
        assert!((a - b).abs() < EPSILON, "{} != {}", a, b);
    }
}

#[test]
fn test_config_from_json() {
    let config = RegressorConfig::from_json_str(r#"{"n_epochs": 3, "batch_size": 2, "loss": "mae", "activation": "relu"}"#)
        .unwrap();
    let mut regressor = ResNetRegressor::new(config).unwrap();
    let (x, y) = sine_dataset(4, 1, 8);
    regressor.fit(&x, &y).unwrap();

    assert_eq!(regressor.history().unwrap().len(), 3);
    assert!(regressor.predict(&x).unwrap().iter().all(|p| *p >= 0.0));
}

#[cfg(not(feature = "gpu"))]
#[test]
fn test_gpu_requires_feature() {
    use pur_resnet::Device;

    let config = RegressorConfig::default().with_device(Device::Gpu);
    assert!(matches!(ResNetRegressor::new(config), Err(Error::MissingCapability(_))));
}
