use std::fmt;
use std::str::FromStr;

use ndarray::{Array, Dimension};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Enum representing different activation function types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivationType {
    #[serde(rename = "sigmoid")]
    Sigmoid,
    #[serde(rename = "relu")]
    ReLU,
    #[serde(rename = "tanh")]
    Tanh,
    #[default]
    #[serde(rename = "linear")]
    Linear,
}

impl ActivationType {
    /// Applies the activation function to a given input
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            ActivationType::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationType::ReLU => x.max(0.0),
            ActivationType::Tanh => x.tanh(),
            ActivationType::Linear => x,
        }
    }

    /// Computes the derivative of the activation function at the preactivation `x`
    pub fn derivative(&self, x: f32) -> f32 {
        match self {
            ActivationType::Sigmoid => {
                let sigmoid = 1.0 / (1.0 + (-x).exp());
                sigmoid * (1.0 - sigmoid)
            },
            ActivationType::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationType::Tanh => 1.0 - x.tanh().powi(2),
            ActivationType::Linear => 1.0,
        }
    }

    /// Element-wise activation of a whole array.
    pub fn forward<D: Dimension>(&self, preactivation: Array<f32, D>) -> Array<f32, D> {
        match self {
            ActivationType::Linear => preactivation,
            _ => preactivation.mapv_into(|x| self.apply(x)),
        }
    }

    /// Multiplies `grad_output` by the derivative evaluated at `preactivation`.
    pub fn backward<D: Dimension>(
        &self,
        preactivation: &Array<f32, D>,
        grad_output: &Array<f32, D>,
    ) -> Array<f32, D> {
        match self {
            ActivationType::Linear => grad_output.clone(),
            _ => grad_output * &preactivation.mapv(|x| self.derivative(x)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActivationType::Sigmoid => "sigmoid",
            ActivationType::ReLU => "relu",
            ActivationType::Tanh => "tanh",
            ActivationType::Linear => "linear",
        }
    }
}

impl fmt::Display for ActivationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActivationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sigmoid" => Ok(ActivationType::Sigmoid),
            "relu" => Ok(ActivationType::ReLU),
            "tanh" => Ok(ActivationType::Tanh),
            "linear" | "identity" | "none" => Ok(ActivationType::Linear),
            _ => Err(Error::UnknownIdentifier {
                kind: "activation",
                name: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::f32::EPSILON;

    #[test]
    fn test_activation_functions() {
        // Sigmoid tests
        assert!((ActivationType::Sigmoid.apply(0.0) - 0.5).abs() < EPSILON);

        // ReLU tests
        assert_eq!(ActivationType::ReLU.apply(-1.0), 0.0);
        assert_eq!(ActivationType::ReLU.apply(2.0), 2.0);

        // Tanh tests
        assert!((ActivationType::Tanh.apply(0.0)).abs() < EPSILON);

        // Linear tests
        assert_eq!(ActivationType::Linear.apply(5.0), 5.0);
    }

    #[test]
    fn test_activation_derivatives() {
        assert!((ActivationType::Sigmoid.derivative(0.0) - 0.25).abs() < EPSILON);
        assert_eq!(ActivationType::ReLU.derivative(-1.0), 0.0);
        assert_eq!(ActivationType::ReLU.derivative(2.0), 1.0);
        assert!((ActivationType::Tanh.derivative(0.0) - 1.0).abs() < EPSILON);
        assert_eq!(ActivationType::Linear.derivative(5.0), 1.0);
    }

    #[test]
    fn test_backward_masks_relu() {
        let pre = array![-1.0_f32, 0.5, 2.0];
        let grad = array![3.0_f32, 3.0, 3.0];
        assert_eq!(ActivationType::ReLU.backward(&pre, &grad), array![0.0, 3.0, 3.0]);
    }

    #[test]
    fn test_default_is_linear() {
        assert_eq!(ActivationType::default(), ActivationType::Linear);
    }

    #[test]
    fn test_parse_identifiers() {
        assert_eq!("linear".parse::<ActivationType>().unwrap(), ActivationType::Linear);
        assert_eq!("ReLU".parse::<ActivationType>().unwrap(), ActivationType::ReLU);
        assert!("softplus".parse::<ActivationType>().is_err());
    }
}
