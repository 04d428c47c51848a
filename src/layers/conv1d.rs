use ndarray::{s, Array1, Array2, Array3, Axis, Ix1, Ix2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Layer, WeightInit};
use crate::error::Result;
use crate::executor::ConvExecutor;
use crate::optimizer::{Optimizer, Param};
use crate::utils::{flatten_steps, unflatten_steps};

/// 1D convolution over channel-last sequences with stride 1 and `same` padding.
///
/// Weights are stored as `(kernel_size * in_channels, filters)` so that the
/// forward pass is a single matrix product against the im2col expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv1DLayer {
    pub weights: Param<Ix2>,
    pub bias: Option<Param<Ix1>>,
    pub kernel_size: usize,
    pub in_channels: usize,
    pub filters: usize,
    label: String,
    #[serde(skip)]
    cached_cols: Option<Array2<f32>>,
    #[serde(skip)]
    cached_shape: Option<(usize, usize, usize)>,
}

impl Conv1DLayer {
    pub fn new<R: Rng + ?Sized>(
        label: impl Into<String>,
        in_channels: usize,
        filters: usize,
        kernel_size: usize,
        use_bias: bool,
        weight_init: WeightInit,
        rng: &mut R,
    ) -> Self {
        assert!(kernel_size > 0, "Kernel size must be positive");
        let fan_in = kernel_size * in_channels;
        let fan_out = kernel_size * filters;
        let weights = weight_init.sample((fan_in, filters), fan_in, fan_out, rng);
        let bias = use_bias.then(|| Param::new(Array1::zeros(filters)));

        Conv1DLayer {
            weights: Param::new(weights),
            bias,
            kernel_size,
            in_channels,
            filters,
            label: label.into(),
            cached_cols: None,
            cached_shape: None,
        }
    }

    /// Left padding of the `same` scheme; any odd remainder goes to the right.
    pub fn pad_before(&self) -> usize {
        (self.kernel_size - 1) / 2
    }

    fn im2col(&self, input: &Array3<f32>) -> Array2<f32> {
        let (batch, steps, channels) = input.dim();
        assert_eq!(channels, self.in_channels, "Input channels do not match layer's input channels");
        let pad = self.pad_before();

        let mut cols = Array2::zeros((batch * steps, self.kernel_size * channels));
        for b in 0..batch {
            for t in 0..steps {
                let row = b * steps + t;
                for j in 0..self.kernel_size {
                    let Some(src) = (t + j).checked_sub(pad).filter(|&src| src < steps) else {
                        continue;
                    };
                    cols.slice_mut(s![row, j * channels..(j + 1) * channels])
                        .assign(&input.slice(s![b, src, ..]));
                }
            }
        }
        cols
    }

    fn col2im(&self, cols: &Array2<f32>, batch: usize, steps: usize) -> Array3<f32> {
        let channels = self.in_channels;
        let pad = self.pad_before();

        let mut grad = Array3::zeros((batch, steps, channels));
        for b in 0..batch {
            for t in 0..steps {
                let row = b * steps + t;
                for j in 0..self.kernel_size {
                    let Some(src) = (t + j).checked_sub(pad).filter(|&src| src < steps) else {
                        continue;
                    };
                    let mut dst = grad.slice_mut(s![b, src, ..]);
                    dst += &cols.slice(s![row, j * channels..(j + 1) * channels]);
                }
            }
        }
        grad
    }

    fn project(&self, cols: &Array2<f32>, batch: usize, steps: usize) -> Array3<f32> {
        let mut output = cols.dot(&self.weights.value);
        if let Some(bias) = &self.bias {
            output += &bias.value;
        }
        unflatten_steps(&output, batch, steps)
    }

    /// Inference-mode convolution on the CPU.
    pub fn compute(&self, input: &Array3<f32>) -> Array3<f32> {
        let (batch, steps, _) = input.dim();
        let cols = self.im2col(input);
        self.project(&cols, batch, steps)
    }
}

impl Layer for Conv1DLayer {
    fn forward(&mut self, input: &Array3<f32>) -> Array3<f32> {
        let (batch, steps, channels) = input.dim();
        let cols = self.im2col(input);
        let output = self.project(&cols, batch, steps);
        self.cached_cols = Some(cols);
        self.cached_shape = Some((batch, steps, channels));
        output
    }

    fn infer(&self, input: &Array3<f32>, executor: &dyn ConvExecutor) -> Result<Array3<f32>> {
        executor.conv1d(self, input)
    }

    fn backward(&mut self, grad_output: &Array3<f32>) -> Array3<f32> {
        let (Some(cols), Some((batch, steps, _))) = (self.cached_cols.take(), self.cached_shape) else {
            panic!("Conv1D backward called before forward");
        };
        let grad = flatten_steps(grad_output);

        self.weights.grad += &cols.t().dot(&grad);
        if let Some(bias) = &mut self.bias {
            bias.grad += &grad.sum_axis(Axis(0));
        }

        let grad_cols = grad.dot(&self.weights.value.t());
        self.col2im(&grad_cols, batch, steps)
    }

    fn apply_gradients(&mut self, optimizer: &Optimizer, iteration: u64) {
        optimizer.update(&mut self.weights, iteration);
        if let Some(bias) = &mut self.bias {
            optimizer.update(bias, iteration);
        }
    }

    fn zero_gradients(&mut self) {
        self.weights.zero_grad();
        if let Some(bias) = &mut self.bias {
            bias.zero_grad();
        }
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.as_ref().map_or(0, Param::len)
    }

    fn output_channels(&self) -> usize {
        self.filters
    }

    fn name(&self) -> String {
        self.label.clone()
    }
}
