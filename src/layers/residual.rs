use ndarray::Array3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{BatchNormLayer, Conv1DLayer, Layer, WeightInit};
use crate::error::Result;
use crate::executor::ConvExecutor;
use crate::optimizer::Optimizer;

fn relu(x: &Array3<f32>) -> Array3<f32> {
    x.mapv(|v| v.max(0.0))
}

fn relu_backward(preactivation: &Array3<f32>, grad_output: &Array3<f32>) -> Array3<f32> {
    let mut grad = grad_output.clone();
    grad.zip_mut_with(preactivation, |g, &p| {
        if p <= 0.0 {
            *g = 0.0;
        }
    });
    grad
}

/// Three convolutions with batch normalization plus a shortcut branch.
///
/// ```text
/// x ─ conv(k0) ─ bn ─ relu ─ conv(k1) ─ bn ─ relu ─ conv(k2) ─ bn ─┐
///  └──────────── [conv(1)] ─ bn ──────────────────────────────────(+) ─ relu
/// ```
///
/// The shortcut convolution only exists when the block changes the channel count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidualBlock {
    pub convs: [Conv1DLayer; 3],
    pub norms: [BatchNormLayer; 3],
    pub shortcut_conv: Option<Conv1DLayer>,
    pub shortcut_norm: BatchNormLayer,
    label: String,
    #[serde(skip)]
    cache: Option<BlockCache>,
}

#[derive(Debug, Clone)]
struct BlockCache {
    first: Array3<f32>,
    second: Array3<f32>,
    merged: Array3<f32>,
}

impl ResidualBlock {
    pub fn new<R: Rng + ?Sized>(
        label: impl Into<String>,
        in_channels: usize,
        filters: usize,
        kernel_sizes: [usize; 3],
        weight_init: WeightInit,
        rng: &mut R,
    ) -> Self {
        let label = label.into();
        let convs = [
            Conv1DLayer::new(format!("{label}/conv_x"), in_channels, filters, kernel_sizes[0], true, weight_init, rng),
            Conv1DLayer::new(format!("{label}/conv_y"), filters, filters, kernel_sizes[1], true, weight_init, rng),
            Conv1DLayer::new(format!("{label}/conv_z"), filters, filters, kernel_sizes[2], true, weight_init, rng),
        ];
        let norms = [
            BatchNormLayer::new(format!("{label}/bn_x"), filters),
            BatchNormLayer::new(format!("{label}/bn_y"), filters),
            BatchNormLayer::new(format!("{label}/bn_z"), filters),
        ];
        let shortcut_conv = (in_channels != filters).then(|| {
            Conv1DLayer::new(format!("{label}/shortcut_conv"), in_channels, filters, 1, true, weight_init, rng)
        });
        let shortcut_norm = BatchNormLayer::new(format!("{label}/shortcut_bn"), filters);

        ResidualBlock {
            convs,
            norms,
            shortcut_conv,
            shortcut_norm,
            label,
            cache: None,
        }
    }

    fn sublayers_mut(&mut self) -> Vec<&mut dyn Layer> {
        let mut layers: Vec<&mut dyn Layer> = Vec::with_capacity(8);
        for (conv, norm) in self.convs.iter_mut().zip(self.norms.iter_mut()) {
            layers.push(conv);
            layers.push(norm);
        }
        if let Some(conv) = &mut self.shortcut_conv {
            layers.push(conv);
        }
        layers.push(&mut self.shortcut_norm);
        layers
    }

    fn sublayers(&self) -> Vec<&dyn Layer> {
        let mut layers: Vec<&dyn Layer> = Vec::with_capacity(8);
        for (conv, norm) in self.convs.iter().zip(self.norms.iter()) {
            layers.push(conv);
            layers.push(norm);
        }
        if let Some(conv) = &self.shortcut_conv {
            layers.push(conv);
        }
        layers.push(&self.shortcut_norm);
        layers
    }
}

impl Layer for ResidualBlock {
    fn forward(&mut self, input: &Array3<f32>) -> Array3<f32> {
        let first = self.norms[0].forward(&self.convs[0].forward(input));
        let second = self.norms[1].forward(&self.convs[1].forward(&relu(&first)));
        let third = self.norms[2].forward(&self.convs[2].forward(&relu(&second)));

        let shortcut = match &mut self.shortcut_conv {
            Some(conv) => self.shortcut_norm.forward(&conv.forward(input)),
            None => self.shortcut_norm.forward(input),
        };

        let merged = third + &shortcut;
        let output = relu(&merged);
        self.cache = Some(BlockCache { first, second, merged });
        output
    }

    fn infer(&self, input: &Array3<f32>, executor: &dyn ConvExecutor) -> Result<Array3<f32>> {
        let mut x = input.clone();
        for (i, (conv, norm)) in self.convs.iter().zip(self.norms.iter()).enumerate() {
            x = norm.infer(&conv.infer(&x, executor)?, executor)?;
            if i < 2 {
                x = relu(&x);
            }
        }

        let shortcut = match &self.shortcut_conv {
            Some(conv) => self.shortcut_norm.infer(&conv.infer(input, executor)?, executor)?,
            None => self.shortcut_norm.infer(input, executor)?,
        };

        Ok(relu(&(x + &shortcut)))
    }

    fn backward(&mut self, grad_output: &Array3<f32>) -> Array3<f32> {
        let Some(BlockCache { first, second, merged }) = self.cache.take() else {
            panic!("Residual block backward called before forward");
        };
        let grad_merged = relu_backward(&merged, grad_output);

        let grad = self.convs[2].backward(&self.norms[2].backward(&grad_merged));
        let grad = relu_backward(&second, &grad);
        let grad = self.convs[1].backward(&self.norms[1].backward(&grad));
        let grad = relu_backward(&first, &grad);
        let grad_main = self.convs[0].backward(&self.norms[0].backward(&grad));

        let grad_shortcut = self.shortcut_norm.backward(&grad_merged);
        let grad_shortcut = match &mut self.shortcut_conv {
            Some(conv) => conv.backward(&grad_shortcut),
            None => grad_shortcut,
        };

        grad_main + &grad_shortcut
    }

    fn apply_gradients(&mut self, optimizer: &Optimizer, iteration: u64) {
        for layer in self.sublayers_mut() {
            layer.apply_gradients(optimizer, iteration);
        }
    }

    fn zero_gradients(&mut self) {
        for layer in self.sublayers_mut() {
            layer.zero_gradients();
        }
    }

    fn parameter_count(&self) -> usize {
        self.sublayers().iter().map(|l| l.parameter_count()).sum()
    }

    fn non_trainable_count(&self) -> usize {
        self.sublayers().iter().map(|l| l.non_trainable_count()).sum()
    }

    fn output_channels(&self) -> usize {
        self.shortcut_norm.channels()
    }

    fn name(&self) -> String {
        self.label.clone()
    }
}
