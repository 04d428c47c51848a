use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activation::ActivationType;
use crate::error::Result;
use crate::executor::Device;
use crate::loss::Loss;
use crate::metrics::Metric;
use crate::optimizer::Optimizer;

/// Hyperparameters for the ResNet regressor
///
/// `metrics` and `optimizer` stay `None` unless set explicitly; the defaults
/// (`[mean_squared_error]` and Adam with learning rate 0.01) are resolved
/// when a model is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressorConfig {
    /// Number of training epochs
    pub n_epochs: usize,

    /// Samples per gradient update
    pub batch_size: usize,

    /// Seed for weight initialization and batch shuffling
    pub random_state: Option<u64>,

    /// Whether to log the model summary and every epoch at `info` level
    pub verbose: bool,

    pub loss: Loss,

    pub metrics: Option<Vec<Metric>>,

    /// Activation of the output layer
    pub activation: ActivationType,

    /// Whether the output layer has a bias
    pub use_bias: bool,

    pub optimizer: Option<Optimizer>,

    /// Where inference-mode convolutions run
    pub device: Device,
}

impl Default for RegressorConfig {
    fn default() -> Self {
        RegressorConfig {
            n_epochs: 1500,
            batch_size: 16,
            random_state: None,
            verbose: false,
            loss: Loss::MeanSquaredError,
            metrics: None,
            activation: ActivationType::Linear,
            use_bias: true,
            optimizer: None,
            device: Device::Cpu,
        }
    }
}

impl RegressorConfig {
    pub fn with_n_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = n_epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_random_state(mut self, random_state: u64) -> Self {
        self.random_state = Some(random_state);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<Metric>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_activation(mut self, activation: ActivationType) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_use_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Parses a JSON object; missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hyperparameters() {
        let hp = RegressorConfig::default();

        assert_eq!(hp.n_epochs, 1500);
        assert_eq!(hp.batch_size, 16);
        assert_eq!(hp.random_state, None);
        assert!(!hp.verbose);
        assert_eq!(hp.loss, Loss::MeanSquaredError);
        assert_eq!(hp.metrics, None);
        assert_eq!(hp.activation, ActivationType::Linear);
        assert!(hp.use_bias);
        assert_eq!(hp.optimizer, None);
        assert_eq!(hp.device, Device::Cpu);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let hp = RegressorConfig::from_json_str(
            r#"{"n_epochs": 6, "batch_size": 4, "use_bias": false, "metrics": ["mean_absolute_error"],
                "optimizer": {"name": "sgd", "learning_rate": 0.1, "momentum": 0.9}}"#,
        )
        .unwrap();

        assert_eq!(hp.n_epochs, 6);
        assert_eq!(hp.batch_size, 4);
        assert!(!hp.use_bias);
        assert_eq!(hp.metrics, Some(vec![Metric::MeanAbsoluteError]));
        assert_eq!(hp.optimizer, Some(Optimizer::sgd(0.1, 0.9)));
        assert_eq!(hp.loss, Loss::MeanSquaredError);
        assert_eq!(hp.activation, ActivationType::Linear);
    }

    #[test]
    fn test_unknown_identifier_is_rejected() {
        assert!(RegressorConfig::from_json_str(r#"{"loss": "hinge"}"#).is_err());
    }
}
