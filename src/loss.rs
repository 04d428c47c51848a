use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::Error;

const HUBER_DELTA: f32 = 1.0;

/// Regression losses, averaged over the instances of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Loss {
    #[default]
    #[serde(rename = "mean_squared_error", alias = "mse")]
    MeanSquaredError,
    #[serde(rename = "mean_absolute_error", alias = "mae")]
    MeanAbsoluteError,
    #[serde(rename = "huber", alias = "huber_loss")]
    Huber,
}

impl Loss {
    pub fn calculate(&self, prediction: &Array1<f32>, target: &Array1<f32>) -> f32 {
        assert_eq!(prediction.len(), target.len(), "Prediction and target lengths differ");
        if prediction.is_empty() {
            return 0.0;
        }
        let diff = prediction - target;
        let total: f32 = match self {
            Loss::MeanSquaredError => diff.mapv(|d| d * d).sum(),
            Loss::MeanAbsoluteError => diff.mapv(f32::abs).sum(),
            Loss::Huber => diff
                .mapv(|d| {
                    let a = d.abs();
                    if a <= HUBER_DELTA {
                        0.5 * d * d
                    } else {
                        HUBER_DELTA * (a - 0.5 * HUBER_DELTA)
                    }
                })
                .sum(),
        };
        total / prediction.len() as f32
    }

    /// Gradient of the batch-mean loss with respect to each prediction.
    pub fn gradient(&self, prediction: &Array1<f32>, target: &Array1<f32>) -> Array1<f32> {
        assert_eq!(prediction.len(), target.len(), "Prediction and target lengths differ");
        let n = prediction.len().max(1) as f32;
        let diff = prediction - target;
        match self {
            Loss::MeanSquaredError => diff.mapv(|d| 2.0 * d / n),
            Loss::MeanAbsoluteError => diff.mapv(|d| {
                if d > 0.0 {
                    1.0 / n
                } else if d < 0.0 {
                    -1.0 / n
                } else {
                    0.0
                }
            }),
            Loss::Huber => diff.mapv(|d| d.clamp(-HUBER_DELTA, HUBER_DELTA) / n),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Loss::MeanSquaredError => "mean_squared_error",
            Loss::MeanAbsoluteError => "mean_absolute_error",
            Loss::Huber => "huber",
        }
    }
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Loss {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mean_squared_error" | "mse" => Ok(Loss::MeanSquaredError),
            "mean_absolute_error" | "mae" => Ok(Loss::MeanAbsoluteError),
            "huber" | "huber_loss" => Ok(Loss::Huber),
            _ => Err(Error::UnknownIdentifier {
                kind: "loss",
                name: s.to_string(),
            }),
        }
    }
}
