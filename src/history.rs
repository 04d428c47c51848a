use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Loss and metric values at the end of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    /// 0-based epoch index.
    pub epoch: usize,
    pub loss: f32,
    pub metrics: BTreeMap<String, f32>,
}

impl EpochLogs {
    pub fn new(epoch: usize, loss: f32) -> Self {
        EpochLogs {
            epoch,
            loss,
            metrics: BTreeMap::new(),
        }
    }

    /// Looks up `"loss"` or a metric by name.
    pub fn get(&self, key: &str) -> Option<f32> {
        if key == "loss" {
            Some(self.loss)
        } else {
            self.metrics.get(key).copied()
        }
    }
}

/// Settings of a training run, handed to callbacks before the first epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainParams {
    pub epochs: usize,
    pub batch_size: usize,
    pub steps: usize,
    pub samples: usize,
}

/// Per-epoch record of one fit call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub params: TrainParams,
    epochs: Vec<EpochLogs>,
}

impl History {
    pub fn new(params: TrainParams) -> Self {
        History {
            params,
            epochs: Vec::new(),
        }
    }

    pub fn record(&mut self, logs: EpochLogs) {
        self.epochs.push(logs);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn epochs(&self) -> &[EpochLogs] {
        &self.epochs
    }

    pub fn last(&self) -> Option<&EpochLogs> {
        self.epochs.last()
    }

    pub fn losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.loss).collect()
    }

    /// Values of `name` across epochs, or `None` if it was never recorded.
    pub fn metric(&self, name: &str) -> Option<Vec<f32>> {
        self.epochs.iter().map(|e| e.get(name)).collect()
    }
}
