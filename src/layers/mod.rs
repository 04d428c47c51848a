pub mod batch_norm;
pub mod conv1d;
pub mod dense;
pub mod pooling;
pub mod residual;

use std::fmt::Debug;

use ndarray::{Array2, Array3};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::executor::ConvExecutor;
use crate::optimizer::Optimizer;

/// A layer over channel-last sequences shaped `(batch, steps, channels)`.
///
/// `forward` runs in training mode and caches what `backward` needs;
/// `infer` runs in inference mode and leaves the layer untouched.
pub trait Layer: Debug {
    fn forward(&mut self, input: &Array3<f32>) -> Array3<f32>;
    fn infer(&self, input: &Array3<f32>, executor: &dyn ConvExecutor) -> Result<Array3<f32>>;
    fn backward(&mut self, grad_output: &Array3<f32>) -> Array3<f32>;

    fn apply_gradients(&mut self, optimizer: &Optimizer, iteration: u64);
    fn zero_gradients(&mut self);

    fn parameter_count(&self) -> usize;
    fn non_trainable_count(&self) -> usize {
        0
    }
    fn output_channels(&self) -> usize;
    fn name(&self) -> String;
}

/// Weight initialization strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WeightInit {
    /// Xavier/Glorot uniform initialization
    #[default]
    GlorotUniform,

    /// He initialization (good for ReLU networks)
    HeNormal,
}

impl WeightInit {
    pub fn sample<R: Rng + ?Sized>(
        &self,
        shape: (usize, usize),
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Array2<f32> {
        match self {
            WeightInit::GlorotUniform => {
                let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
                Array2::from_shape_fn(shape, |_| rng.random_range(-limit..limit))
            }
            WeightInit::HeNormal => {
                let std_dev = (2.0 / fan_in.max(1) as f32).sqrt();
                Array2::from_shape_fn(shape, |_| {
                    let z: f32 = rng.sample(StandardNormal);
                    z * std_dev
                })
            }
        }
    }
}

pub use batch_norm::BatchNormLayer;
pub use conv1d::Conv1DLayer;
pub use dense::DenseLayer;
pub use pooling::GlobalAveragePooling1D;
pub use residual::ResidualBlock;
