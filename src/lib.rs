mod activation;
mod callbacks;
mod error;
mod executor;
#[cfg(feature = "gpu")]
pub mod gpu_layers;
mod history;
mod hyperparameters;
pub mod layers;
mod loss;
mod metrics;
mod model;
mod network;
mod optimizer;
mod regressor;
mod utils;

pub use activation::ActivationType;
pub use callbacks::{Callback, CallbackAction, EarlyStopping, LambdaCallback};
pub use error::{Error, Result};
pub use executor::{resolve as resolve_executor, ConvExecutor, CpuExecutor, Device};
pub use history::{EpochLogs, History, TrainParams};
pub use hyperparameters::RegressorConfig;
pub use layers::{Layer, WeightInit};
pub use loss::Loss;
pub use metrics::{r2_score, Metric};
pub use model::Model;
pub use network::{Backbone, InputLayer, ResNetNetwork};
pub use optimizer::{Optimizer, Param};
pub use regressor::{ParameterSet, Regressor, ResNetRegressor, DEFAULT_LEARNING_RATE};
pub use utils::{flatten_steps, transpose_series, unflatten_steps};
