use crate::activation::ActivationType;
use ndarray::{Array1, Array2, Axis, Ix1, Ix2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::WeightInit;
use crate::optimizer::{Optimizer, Param};

/// Fully-connected layer over `(batch, inputs)` matrices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub neurons: usize,
    pub inputs: usize,
    /// `(neurons, inputs)`
    pub weights: Param<Ix2>,
    pub bias: Option<Param<Ix1>>,
    pub activation: ActivationType,
    #[serde(skip)]
    input_cache: Option<Array2<f32>>,
    #[serde(skip)]
    preactivation_cache: Option<Array2<f32>>,
}

impl DenseLayer {
    pub fn new<R: Rng + ?Sized>(
        inputs: usize,
        neurons: usize,
        activation: ActivationType,
        use_bias: bool,
        weight_init: WeightInit,
        rng: &mut R,
    ) -> Self {
        let weights = weight_init.sample((neurons, inputs), inputs, neurons, rng);
        let bias = use_bias.then(|| Param::new(Array1::zeros(neurons)));

        DenseLayer {
            neurons,
            inputs,
            weights: Param::new(weights),
            bias,
            activation,
            input_cache: None,
            preactivation_cache: None,
        }
    }

    fn preactivation(&self, input: &Array2<f32>) -> Array2<f32> {
        assert_eq!(input.ncols(), self.inputs, "Input size does not match layer's input size");

        // weights is (neurons × inputs), input is (batch × inputs), result is (batch × neurons)
        let mut output = input.dot(&self.weights.value.t());
        if let Some(bias) = &self.bias {
            output += &bias.value;
        }
        output
    }

    pub fn forward(&mut self, input: &Array2<f32>) -> Array2<f32> {
        let preactivation = self.preactivation(input);
        let output = self.activation.forward(preactivation.clone());
        self.input_cache = Some(input.clone());
        self.preactivation_cache = Some(preactivation);
        output
    }

    pub fn infer(&self, input: &Array2<f32>) -> Array2<f32> {
        self.activation.forward(self.preactivation(input))
    }

    pub fn backward(&mut self, grad_output: &Array2<f32>) -> Array2<f32> {
        let (Some(input), Some(preactivation)) = (self.input_cache.take(), self.preactivation_cache.take()) else {
            panic!("Dense backward called before forward");
        };

        // Gradient with respect to preactivation, (batch × neurons)
        let dlayer = self.activation.backward(&preactivation, grad_output);

        if let Some(bias) = &mut self.bias {
            bias.grad += &dlayer.sum_axis(Axis(0));
        }
        self.weights.grad += &dlayer.t().dot(&input);

        // Gradient for previous layer, (batch × inputs)
        dlayer.dot(&self.weights.value)
    }

    pub fn apply_gradients(&mut self, optimizer: &Optimizer, iteration: u64) {
        optimizer.update(&mut self.weights, iteration);
        if let Some(bias) = &mut self.bias {
            optimizer.update(bias, iteration);
        }
    }

    pub fn zero_gradients(&mut self) {
        self.weights.zero_grad();
        if let Some(bias) = &mut self.bias {
            bias.zero_grad();
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.as_ref().map_or(0, Param::len)
    }

    pub fn use_bias(&self) -> bool {
        self.bias.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_layer_initialization() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = DenseLayer::new(3, 4, ActivationType::ReLU, true, WeightInit::GlorotUniform, &mut rng);

        assert_eq!(layer.inputs, 3);
        assert_eq!(layer.neurons, 4);
        assert_eq!(layer.weights.value.dim(), (4, 3));
        assert_eq!(layer.bias.as_ref().unwrap().len(), 4);
        assert_eq!(layer.parameter_count(), 3 * 4 + 4);
    }

    #[test]
    fn test_forward_without_bias() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = DenseLayer::new(2, 1, ActivationType::Linear, false, WeightInit::GlorotUniform, &mut rng);
        layer.weights.value = array![[2.0, -1.0]];
        let out = layer.forward(&array![[1.0, 1.0], [3.0, 2.0]]);
        assert_eq!(out, array![[1.0], [4.0]]);
        assert_eq!(layer.parameter_count(), 2);
    }

    #[test]
    fn test_backward_accumulates_gradients() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = DenseLayer::new(2, 1, ActivationType::Linear, true, WeightInit::GlorotUniform, &mut rng);
        layer.weights.value = array![[0.5, 0.25]];
        layer.forward(&array![[1.0, 2.0], [3.0, 4.0]]);
        let grad_input = layer.backward(&array![[1.0], [-1.0]]);

        assert_eq!(layer.weights.grad, array![[-2.0, -2.0]]);
        assert_eq!(layer.bias.as_ref().unwrap().grad, array![0.0]);
        assert_eq!(grad_input, array![[0.5, 0.25], [-0.5, -0.25]]);
    }

    #[test]
    #[should_panic(expected = "Input size does not match layer's input size")]
    fn test_forward_invalid_input_size() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = DenseLayer::new(3, 2, ActivationType::ReLU, true, WeightInit::GlorotUniform, &mut rng);
        layer.forward(&array![[1.0, 2.0]]);
    }
}
