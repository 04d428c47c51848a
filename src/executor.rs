use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::Arc;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layers::Conv1DLayer;

/// Where inference-mode convolutions run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Gpu => f.write_str("gpu"),
        }
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "gpu" => Ok(Device::Gpu),
            _ => Err(Error::UnknownIdentifier {
                kind: "device",
                name: s.to_string(),
            }),
        }
    }
}

/// Runs the inference-mode forward pass of a [`Conv1DLayer`].
pub trait ConvExecutor: Debug + Send + Sync {
    fn conv1d(&self, layer: &Conv1DLayer, input: &Array3<f32>) -> Result<Array3<f32>>;
    fn device(&self) -> Device;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuExecutor;

impl ConvExecutor for CpuExecutor {
    fn conv1d(&self, layer: &Conv1DLayer, input: &Array3<f32>) -> Result<Array3<f32>> {
        Ok(layer.compute(input))
    }

    fn device(&self) -> Device {
        Device::Cpu
    }
}

/// Resolves `device` to an executor, failing if this build or host cannot provide it.
pub fn resolve(device: Device) -> Result<Arc<dyn ConvExecutor>> {
    match device {
        Device::Cpu => Ok(Arc::new(CpuExecutor)),
        #[cfg(feature = "gpu")]
        Device::Gpu => Ok(Arc::new(crate::gpu_layers::Conv1DGpu::new()?)),
        #[cfg(not(feature = "gpu"))]
        Device::Gpu => Err(Error::MissingCapability(
            "device `gpu` requires building with the `gpu` feature".to_string(),
        )),
    }
}
