use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

/// Averages each channel over the time axis: `(batch, steps, channels)` to `(batch, channels)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalAveragePooling1D {
    #[serde(skip)]
    cached_steps: Option<usize>,
}

impl GlobalAveragePooling1D {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, input: &Array3<f32>) -> Array2<f32> {
        self.cached_steps = Some(input.dim().1);
        self.infer(input)
    }

    pub fn infer(&self, input: &Array3<f32>) -> Array2<f32> {
        let (batch, _, channels) = input.dim();
        input
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array2::zeros((batch, channels)))
    }

    pub fn backward(&mut self, grad_output: &Array2<f32>) -> Array3<f32> {
        let Some(steps) = self.cached_steps.take() else {
            panic!("Pooling backward called before forward");
        };
        let (batch, channels) = grad_output.dim();
        let scale = 1.0 / steps.max(1) as f32;
        Array3::from_shape_fn((batch, steps, channels), |(b, _, c)| grad_output[[b, c]] * scale)
    }
}
