use ndarray::{Array1, Array2, Array3, Axis, Ix1};
use serde::{Deserialize, Serialize};

use super::Layer;
use crate::error::Result;
use crate::executor::ConvExecutor;
use crate::optimizer::{Optimizer, Param};
use crate::utils::{flatten_steps, unflatten_steps};

pub const DEFAULT_MOMENTUM: f32 = 0.99;
pub const DEFAULT_EPSILON: f32 = 1e-3;

/// Per-channel batch normalization over the batch and time axes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNormLayer {
    pub gamma: Param<Ix1>,
    pub beta: Param<Ix1>,
    pub moving_mean: Array1<f32>,
    pub moving_variance: Array1<f32>,
    pub momentum: f32,
    pub epsilon: f32,
    label: String,
    #[serde(skip)]
    cache: Option<NormCache>,
}

#[derive(Debug, Clone)]
struct NormCache {
    normalized: Array2<f32>,
    inv_std: Array1<f32>,
    batch: usize,
    steps: usize,
}

impl BatchNormLayer {
    pub fn new(label: impl Into<String>, channels: usize) -> Self {
        BatchNormLayer {
            gamma: Param::new(Array1::ones(channels)),
            beta: Param::new(Array1::zeros(channels)),
            moving_mean: Array1::zeros(channels),
            moving_variance: Array1::ones(channels),
            momentum: DEFAULT_MOMENTUM,
            epsilon: DEFAULT_EPSILON,
            label: label.into(),
            cache: None,
        }
    }

    pub fn channels(&self) -> usize {
        self.gamma.len()
    }
}

impl Layer for BatchNormLayer {
    fn forward(&mut self, input: &Array3<f32>) -> Array3<f32> {
        let (batch, steps, channels) = input.dim();
        assert_eq!(channels, self.channels(), "Input channels do not match layer's channels");

        let x = flatten_steps(input);
        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(channels));
        let centered = &x - &mean;
        let variance = centered
            .mapv(|v| v * v)
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(channels));
        let inv_std = variance.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        let normalized = &centered * &inv_std;
        let output = &normalized * &self.gamma.value + &self.beta.value;

        self.moving_mean = &self.moving_mean * self.momentum + &mean * (1.0 - self.momentum);
        self.moving_variance = &self.moving_variance * self.momentum + &variance * (1.0 - self.momentum);
        self.cache = Some(NormCache { normalized, inv_std, batch, steps });

        unflatten_steps(&output, batch, steps)
    }

    fn infer(&self, input: &Array3<f32>, _executor: &dyn ConvExecutor) -> Result<Array3<f32>> {
        let (batch, steps, _) = input.dim();
        let inv_std = self.moving_variance.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        let x = flatten_steps(input);
        let output = (&x - &self.moving_mean) * &inv_std * &self.gamma.value + &self.beta.value;
        Ok(unflatten_steps(&output, batch, steps))
    }

    fn backward(&mut self, grad_output: &Array3<f32>) -> Array3<f32> {
        let Some(NormCache { normalized, inv_std, batch, steps }) = self.cache.take() else {
            panic!("BatchNorm backward called before forward");
        };
        let dy = flatten_steps(grad_output);
        let n = dy.nrows() as f32;

        self.gamma.grad += &(&dy * &normalized).sum_axis(Axis(0));
        self.beta.grad += &dy.sum_axis(Axis(0));

        let dnorm = &dy * &self.gamma.value;
        let sum_dnorm = dnorm.sum_axis(Axis(0));
        let sum_dnorm_norm = (&dnorm * &normalized).sum_axis(Axis(0));
        let dx = (&dnorm * n - &sum_dnorm - &normalized * &sum_dnorm_norm) * &inv_std / n;

        unflatten_steps(&dx, batch, steps)
    }

    fn apply_gradients(&mut self, optimizer: &Optimizer, iteration: u64) {
        optimizer.update(&mut self.gamma, iteration);
        optimizer.update(&mut self.beta, iteration);
    }

    fn zero_gradients(&mut self) {
        self.gamma.zero_grad();
        self.beta.zero_grad();
    }

    fn parameter_count(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }

    fn non_trainable_count(&self) -> usize {
        self.moving_mean.len() + self.moving_variance.len()
    }

    fn output_channels(&self) -> usize {
        self.channels()
    }

    fn name(&self) -> String {
        self.label.clone()
    }
}
