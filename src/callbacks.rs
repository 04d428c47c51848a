//! Hooks into the training loop.
//!
//! Callbacks are cloned through [`Callback::clone_box`] before every fit, so
//! state they accumulate belongs to that run and never leaks back into the
//! instances the caller configured.

use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::history::{EpochLogs, History, TrainParams};

/// Whether training should go on after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

pub trait Callback: Debug + Send {
    fn on_train_begin(&mut self, _params: &TrainParams) -> Result<()> {
        Ok(())
    }

    fn on_epoch_begin(&mut self, _epoch: usize) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self, _epoch: usize, _logs: &EpochLogs) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    fn on_train_end(&mut self, _history: &History) -> Result<()> {
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Callback>;

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Callback> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

type TrainBeginFn = Arc<dyn Fn(&TrainParams) + Send + Sync>;
type EpochBeginFn = Arc<dyn Fn(usize) + Send + Sync>;
type EpochEndFn = Arc<dyn Fn(usize, &EpochLogs) + Send + Sync>;
type TrainEndFn = Arc<dyn Fn(&History) + Send + Sync>;

/// Callback built from optional closures; the default instance does nothing.
#[derive(Clone, Default)]
pub struct LambdaCallback {
    on_train_begin: Option<TrainBeginFn>,
    on_epoch_begin: Option<EpochBeginFn>,
    on_epoch_end: Option<EpochEndFn>,
    on_train_end: Option<TrainEndFn>,
}

impl LambdaCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_train_begin(mut self, f: impl Fn(&TrainParams) + Send + Sync + 'static) -> Self {
        self.on_train_begin = Some(Arc::new(f));
        self
    }

    pub fn with_on_epoch_begin(mut self, f: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_epoch_begin = Some(Arc::new(f));
        self
    }

    pub fn with_on_epoch_end(mut self, f: impl Fn(usize, &EpochLogs) + Send + Sync + 'static) -> Self {
        self.on_epoch_end = Some(Arc::new(f));
        self
    }

    pub fn with_on_train_end(mut self, f: impl Fn(&History) + Send + Sync + 'static) -> Self {
        self.on_train_end = Some(Arc::new(f));
        self
    }
}

impl Debug for LambdaCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaCallback")
            .field("on_train_begin", &self.on_train_begin.is_some())
            .field("on_epoch_begin", &self.on_epoch_begin.is_some())
            .field("on_epoch_end", &self.on_epoch_end.is_some())
            .field("on_train_end", &self.on_train_end.is_some())
            .finish()
    }
}

impl Callback for LambdaCallback {
    fn on_train_begin(&mut self, params: &TrainParams) -> Result<()> {
        if let Some(f) = &self.on_train_begin {
            f(params);
        }
        Ok(())
    }

    fn on_epoch_begin(&mut self, epoch: usize) -> Result<()> {
        if let Some(f) = &self.on_epoch_begin {
            f(epoch);
        }
        Ok(())
    }

    fn on_epoch_end(&mut self, epoch: usize, logs: &EpochLogs) -> Result<CallbackAction> {
        if let Some(f) = &self.on_epoch_end {
            f(epoch, logs);
        }
        Ok(CallbackAction::Continue)
    }

    fn on_train_end(&mut self, history: &History) -> Result<()> {
        if let Some(f) = &self.on_train_end {
            f(history);
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Callback> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Stops training once the monitored value has not improved for `patience` epochs.
///
/// Lower is better, which holds for every loss and metric in this crate.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    pub monitor: String,
    pub min_delta: f32,
    pub patience: usize,
    best: Option<f32>,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl Default for EarlyStopping {
    fn default() -> Self {
        EarlyStopping::new("loss", 0)
    }
}

impl EarlyStopping {
    pub fn new(monitor: impl Into<String>, patience: usize) -> Self {
        EarlyStopping {
            monitor: monitor.into(),
            min_delta: 0.0,
            patience,
            best: None,
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f32) -> Self {
        self.min_delta = min_delta.abs();
        self
    }

    pub fn best(&self) -> Option<f32> {
        self.best
    }

    /// Epoch in which training was stopped, if it was.
    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

impl Callback for EarlyStopping {
    fn on_train_begin(&mut self, _params: &TrainParams) -> Result<()> {
        self.best = None;
        self.wait = 0;
        self.stopped_epoch = None;
        Ok(())
    }

    fn on_epoch_end(&mut self, epoch: usize, logs: &EpochLogs) -> Result<CallbackAction> {
        let value = logs.get(&self.monitor).ok_or_else(|| {
            Error::Callback(format!("early stopping monitors `{}`, which is not recorded", self.monitor))
        })?;

        match self.best {
            Some(best) if value >= best - self.min_delta => {
                self.wait += 1;
                if self.wait >= self.patience {
                    self.stopped_epoch = Some(epoch);
                    return Ok(CallbackAction::Stop);
                }
            }
            _ => {
                self.best = Some(value);
                self.wait = 0;
            }
        }
        Ok(CallbackAction::Continue)
    }

    fn clone_box(&self) -> Box<dyn Callback> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
