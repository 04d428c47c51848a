//! Residual network topology for time series.
//!
//! Follows Wang et al., "Time series classification from scratch with deep
//! neural networks: A strong baseline" (IJCNN 2017): three residual blocks of
//! three convolutions each, followed by global average pooling. The topology
//! stops at the pooled features; task-specific heads are attached by callers.

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::executor::ConvExecutor;
use crate::layers::{GlobalAveragePooling1D, Layer, ResidualBlock, WeightInit};
use crate::optimizer::Optimizer;

/// Placeholder describing the per-instance input, `(series_length, dimensions)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLayer {
    pub series_length: usize,
    pub dimensions: usize,
}

impl InputLayer {
    pub fn shape(&self) -> (usize, usize) {
        (self.series_length, self.dimensions)
    }
}

/// Stacked residual blocks ending in global average pooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backbone {
    pub blocks: Vec<ResidualBlock>,
    pub pooling: GlobalAveragePooling1D,
}

impl Backbone {
    pub fn forward(&mut self, input: &Array3<f32>) -> Array2<f32> {
        let mut x = input.clone();
        for block in &mut self.blocks {
            x = block.forward(&x);
        }
        self.pooling.forward(&x)
    }

    pub fn infer(&self, input: &Array3<f32>, executor: &dyn ConvExecutor) -> Result<Array2<f32>> {
        let mut x = input.clone();
        for block in &self.blocks {
            x = block.infer(&x, executor)?;
        }
        Ok(self.pooling.infer(&x))
    }

    pub fn backward(&mut self, grad_output: &Array2<f32>) -> Array3<f32> {
        let mut grad = self.pooling.backward(grad_output);
        for block in self.blocks.iter_mut().rev() {
            grad = block.backward(&grad);
        }
        grad
    }

    pub fn apply_gradients(&mut self, optimizer: &Optimizer, iteration: u64) {
        for block in &mut self.blocks {
            block.apply_gradients(optimizer, iteration);
        }
    }

    pub fn zero_gradients(&mut self) {
        for block in &mut self.blocks {
            block.zero_gradients();
        }
    }

    /// Width of the pooled feature vector.
    pub fn output_features(&self) -> usize {
        self.blocks.last().map_or(0, |b| b.output_channels())
    }

    pub fn layers(&self) -> Vec<&dyn Layer> {
        self.blocks.iter().map(|b| b as &dyn Layer).collect()
    }
}

/// Builds the residual backbone for a given input shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResNetNetwork {
    pub n_feature_maps: usize,
    pub kernel_sizes: [usize; 3],
    pub weight_init: WeightInit,
    pub random_state: Option<u64>,
}

impl Default for ResNetNetwork {
    fn default() -> Self {
        ResNetNetwork {
            n_feature_maps: 64,
            kernel_sizes: [8, 5, 3],
            weight_init: WeightInit::GlorotUniform,
            random_state: None,
        }
    }
}

impl ResNetNetwork {
    pub fn new(random_state: Option<u64>) -> Self {
        ResNetNetwork {
            random_state,
            ..Default::default()
        }
    }

    pub fn with_n_feature_maps(mut self, n_feature_maps: usize) -> Self {
        self.n_feature_maps = n_feature_maps;
        self
    }

    pub fn with_kernel_sizes(mut self, kernel_sizes: [usize; 3]) -> Self {
        self.kernel_sizes = kernel_sizes;
        self
    }

    /// A fresh generator for one build. Seeded networks always hand out the
    /// same stream; unseeded ones draw from the OS.
    pub fn rng(&self) -> StdRng {
        match self.random_state {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    /// Filter counts of the three blocks: `n`, `2n`, `2n`.
    pub fn block_filters(&self) -> [usize; 3] {
        [self.n_feature_maps, self.n_feature_maps * 2, self.n_feature_maps * 2]
    }

    pub fn build_network(
        &self,
        input_shape: (usize, usize),
        rng: &mut StdRng,
    ) -> Result<(InputLayer, Backbone)> {
        let (series_length, dimensions) = input_shape;
        if series_length == 0 || dimensions == 0 {
            return Err(Error::InvalidInput(format!(
                "input shape must be non-empty, got (series_length, dimensions) = {:?}",
                input_shape
            )));
        }
        if self.n_feature_maps == 0 || self.kernel_sizes.contains(&0) {
            return Err(Error::InvalidInput(
                "feature maps and kernel sizes must be positive".to_string(),
            ));
        }

        let mut in_channels = dimensions;
        let mut blocks = Vec::with_capacity(3);
        for (i, filters) in self.block_filters().into_iter().enumerate() {
            blocks.push(ResidualBlock::new(
                format!("residual_block_{}", i + 1),
                in_channels,
                filters,
                self.kernel_sizes,
                self.weight_init,
                rng,
            ));
            in_channels = filters;
        }

        debug!(series_length, dimensions, blocks = blocks.len(), "built residual backbone");

        Ok((
            InputLayer { series_length, dimensions },
            Backbone {
                blocks,
                pooling: GlobalAveragePooling1D::new(),
            },
        ))
    }
}
