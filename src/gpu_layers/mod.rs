pub mod conv1d;

pub use conv1d::{Conv1DGpu, ConvParams};
