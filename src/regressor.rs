//! Residual network regressor for equal-length time series.
//!
//! Callers hand in series shaped `(n_instances, n_dimensions, series_length)`.
//! The network works channel-last, so every entry point swaps the last two axes
//! before data reaches the model.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::callbacks::{Callback, LambdaCallback};
use crate::error::{Error, Result};
use crate::executor::{self, ConvExecutor, CpuExecutor};
use crate::history::History;
use crate::hyperparameters::RegressorConfig;
use crate::layers::DenseLayer;
use crate::metrics::{r2_score, Metric};
use crate::model::Model;
use crate::network::ResNetNetwork;
use crate::optimizer::Optimizer;
use crate::utils::transpose_series;

/// Learning rate of the optimizer used when none is configured.
pub const DEFAULT_LEARNING_RATE: f32 = 0.01;

/// Fit/predict contract shared by regressors over `(n_instances, n_dimensions, series_length)` data.
pub trait Regressor {
    fn fit(&mut self, x: &Array3<f32>, y: &Array1<f32>) -> Result<&mut Self>;

    fn predict(&self, x: &Array3<f32>) -> Result<Array1<f32>>;

    fn is_fitted(&self) -> bool;

    /// Coefficient of determination of the predictions for `x` against `y`.
    fn score(&self, x: &Array3<f32>, y: &Array1<f32>) -> Result<f32> {
        let prediction = self.predict(x)?;
        if prediction.len() != y.len() {
            return Err(Error::InvalidInput(format!(
                "{} instances but {} targets",
                prediction.len(),
                y.len()
            )));
        }
        Ok(r2_score(&prediction, y))
    }
}

/// One literal configuration for conformance tests.
#[derive(Debug, Clone)]
pub struct ParameterSet {
    pub config: RegressorConfig,
    pub callbacks: Vec<Box<dyn Callback>>,
}

fn cpu_executor() -> Arc<dyn ConvExecutor> {
    Arc::new(CpuExecutor)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResNetRegressor {
    config: RegressorConfig,
    #[serde(skip)]
    callbacks: Vec<Box<dyn Callback>>,
    /// Copies that ran during the last fit.
    #[serde(skip)]
    fitted_callbacks: Vec<Box<dyn Callback>>,
    network: ResNetNetwork,
    input_shape: Option<(usize, usize)>,
    fitted_optimizer: Option<Optimizer>,
    model: Option<Model>,
    history: Option<History>,
    #[serde(skip, default = "cpu_executor")]
    executor: Arc<dyn ConvExecutor>,
}

impl ResNetRegressor {
    /// Fails with [`Error::MissingCapability`] if the configured device is unavailable.
    pub fn new(config: RegressorConfig) -> Result<Self> {
        Self::with_callbacks(config, Vec::new())
    }

    pub fn with_callbacks(config: RegressorConfig, callbacks: Vec<Box<dyn Callback>>) -> Result<Self> {
        let executor = executor::resolve(config.device)?;
        let network = ResNetNetwork::new(config.random_state);
        Ok(ResNetRegressor {
            config,
            callbacks,
            fitted_callbacks: Vec::new(),
            network,
            input_shape: None,
            fitted_optimizer: None,
            model: None,
            history: None,
            executor,
        })
    }

    /// Literal parameter sets that train in a handful of epochs.
    ///
    /// Every set name yields the same sets.
    pub fn test_params(_parameter_set: &str) -> Vec<ParameterSet> {
        vec![
            ParameterSet {
                config: RegressorConfig::default().with_n_epochs(6).with_batch_size(4).with_use_bias(false),
                callbacks: Vec::new(),
            },
            ParameterSet {
                config: RegressorConfig::default().with_n_epochs(4).with_batch_size(6).with_use_bias(true),
                callbacks: Vec::new(),
            },
            ParameterSet {
                config: RegressorConfig::default().with_n_epochs(2),
                callbacks: vec![Box::new(LambdaCallback::new())],
            },
        ]
    }

    pub fn from_params(params: ParameterSet) -> Result<Self> {
        Self::with_callbacks(params.config, params.callbacks)
    }

    /// Builds a compiled, untrained model for per-instance input `(series_length, dimensions)`.
    pub fn build_model(&mut self, input_shape: (usize, usize)) -> Result<Model> {
        let mut rng = self.network.rng();

        let optimizer = self
            .config
            .optimizer
            .clone()
            .unwrap_or_else(|| Optimizer::adam(DEFAULT_LEARNING_RATE));
        let metrics = self
            .config
            .metrics
            .clone()
            .unwrap_or_else(|| vec![Metric::MeanSquaredError]);

        let (input, backbone) = self.network.build_network(input_shape, &mut rng)?;
        let head = DenseLayer::new(
            backbone.output_features(),
            1,
            self.config.activation,
            self.config.use_bias,
            self.network.weight_init,
            &mut rng,
        );

        self.fitted_optimizer = Some(optimizer.clone());
        Model::compile(input, backbone, head, self.config.loss, optimizer, metrics, rng)
    }

    pub fn config(&self) -> &RegressorConfig {
        &self.config
    }

    pub fn network(&self) -> &ResNetNetwork {
        &self.network
    }

    /// Callbacks as configured; fits run on copies of these.
    pub fn callbacks(&self) -> &[Box<dyn Callback>] {
        &self.callbacks
    }

    pub fn fitted_callbacks(&self) -> &[Box<dyn Callback>] {
        &self.fitted_callbacks
    }

    pub fn input_shape(&self) -> Option<(usize, usize)> {
        self.input_shape
    }

    /// Optimizer resolved by the last build.
    pub fn fitted_optimizer(&self) -> Option<&Optimizer> {
        self.fitted_optimizer.as_ref()
    }

    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    pub fn history(&self) -> Option<&History> {
        self.history.as_ref()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Restores a saved regressor. Callbacks are not persisted, so the result has none.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut regressor: ResNetRegressor = serde_json::from_reader(reader)?;
        regressor.executor = executor::resolve(regressor.config.device)?;
        Ok(regressor)
    }
}

impl Regressor for ResNetRegressor {
    fn fit(&mut self, x: &Array3<f32>, y: &Array1<f32>) -> Result<&mut Self> {
        let (n_instances, n_dimensions, series_length) = x.dim();
        if n_instances == 0 {
            return Err(Error::InvalidInput("no instances given".to_string()));
        }
        if y.len() != n_instances {
            return Err(Error::InvalidInput(format!(
                "{} instances but {} targets",
                n_instances,
                y.len()
            )));
        }

        let x = transpose_series(x);
        let input_shape = (series_length, n_dimensions);

        let mut model = self.build_model(input_shape)?;
        if self.config.verbose {
            info!("\n{}", model.summary());
        }

        info!(
            n_instances,
            series_length,
            n_dimensions,
            epochs = self.config.n_epochs,
            batch_size = self.config.batch_size,
            "fitting resnet regressor"
        );
        let mut callbacks = self.callbacks.clone();
        let history = model.fit(
            &x,
            y,
            self.config.batch_size,
            self.config.n_epochs,
            self.config.verbose,
            &mut callbacks,
        )?;
        if let Some(last) = history.last() {
            info!(epochs = history.len(), loss = last.loss, "training finished");
        }

        self.input_shape = Some(input_shape);
        self.model = Some(model);
        self.history = Some(history);
        self.fitted_callbacks = callbacks;
        Ok(self)
    }

    fn predict(&self, x: &Array3<f32>) -> Result<Array1<f32>> {
        let model = self.model.as_ref().ok_or(Error::NotFitted)?;
        model.predict(&transpose_series(x), self.executor.as_ref())
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}
