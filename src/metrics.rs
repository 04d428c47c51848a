use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Metrics reported in the training history, keyed by [`Metric::name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "mean_squared_error", alias = "mse")]
    MeanSquaredError,
    #[serde(rename = "mean_absolute_error", alias = "mae")]
    MeanAbsoluteError,
    #[serde(rename = "root_mean_squared_error", alias = "rmse")]
    RootMeanSquaredError,
    #[serde(rename = "mean_absolute_percentage_error", alias = "mape")]
    MeanAbsolutePercentageError,
}

impl Metric {
    pub fn compute(&self, prediction: &Array1<f32>, target: &Array1<f32>) -> f32 {
        assert_eq!(prediction.len(), target.len(), "Prediction and target lengths differ");
        if prediction.is_empty() {
            return 0.0;
        }
        let n = prediction.len() as f32;
        let diff = prediction - target;
        match self {
            Metric::MeanSquaredError => diff.mapv(|d| d * d).sum() / n,
            Metric::MeanAbsoluteError => diff.mapv(f32::abs).sum() / n,
            Metric::RootMeanSquaredError => (diff.mapv(|d| d * d).sum() / n).sqrt(),
            Metric::MeanAbsolutePercentageError => {
                let total: f32 = diff
                    .iter()
                    .zip(target.iter())
                    .map(|(d, t)| (d / t.abs().max(f32::EPSILON)).abs())
                    .sum();
                100.0 * total / n
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::MeanSquaredError => "mean_squared_error",
            Metric::MeanAbsoluteError => "mean_absolute_error",
            Metric::RootMeanSquaredError => "root_mean_squared_error",
            Metric::MeanAbsolutePercentageError => "mean_absolute_percentage_error",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mean_squared_error" | "mse" => Ok(Metric::MeanSquaredError),
            "mean_absolute_error" | "mae" => Ok(Metric::MeanAbsoluteError),
            "root_mean_squared_error" | "rmse" => Ok(Metric::RootMeanSquaredError),
            "mean_absolute_percentage_error" | "mape" => Ok(Metric::MeanAbsolutePercentageError),
            _ => Err(Error::UnknownIdentifier {
                kind: "metric",
                name: s.to_string(),
            }),
        }
    }
}

/// Coefficient of determination. A constant target scores 1.0 only for an exact fit.
pub fn r2_score(prediction: &Array1<f32>, target: &Array1<f32>) -> f32 {
    assert_eq!(prediction.len(), target.len(), "Prediction and target lengths differ");
    let mean = target.mean().unwrap_or(0.0);
    let ss_res: f32 = (target - prediction).mapv(|d| d * d).sum();
    let ss_tot: f32 = target.mapv(|t| (t - mean) * (t - mean)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_metric_values() {
        let pred = array![1.0_f32, 2.0, 5.0];
        let target = array![1.0_f32, 4.0, 4.0];
        assert!((Metric::MeanSquaredError.compute(&pred, &target) - 5.0 / 3.0).abs() < 1e-6);
        assert!((Metric::MeanAbsoluteError.compute(&pred, &target) - 1.0).abs() < 1e-6);
        assert!((Metric::RootMeanSquaredError.compute(&pred, &target) - (5.0_f32 / 3.0).sqrt()).abs() < 1e-6);
        assert!((Metric::MeanAbsolutePercentageError.compute(&pred, &target) - 25.0).abs() < 1e-4);
    }

    #[test]
    fn test_r2_score() {
        let target = array![1.0_f32, 2.0, 3.0];
        assert_eq!(r2_score(&target, &target), 1.0);
        let mean_pred = array![2.0_f32, 2.0, 2.0];
        assert!(r2_score(&mean_pred, &target).abs() < 1e-6);
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!("rmse".parse::<Metric>().unwrap(), Metric::RootMeanSquaredError);
        assert!("accuracy".parse::<Metric>().is_err());
    }
}
