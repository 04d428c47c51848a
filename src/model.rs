use std::collections::BTreeMap;
use std::fmt::Write as _;

use ndarray::{s, Array1, Array3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::callbacks::{Callback, CallbackAction};
use crate::error::{Error, Result};
use crate::executor::ConvExecutor;
use crate::history::{EpochLogs, History, TrainParams};
use crate::layers::DenseLayer;
use crate::loss::Loss;
use crate::metrics::Metric;
use crate::network::{Backbone, InputLayer};
use crate::optimizer::Optimizer;

const PREDICT_BATCH_SIZE: usize = 32;

fn fresh_rng() -> StdRng {
    StdRng::from_os_rng()
}

/// A compiled network: input placeholder, residual backbone and a dense head,
/// bound to a loss, an optimizer and a list of metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    input: InputLayer,
    backbone: Backbone,
    head: DenseLayer,
    loss: Loss,
    optimizer: Optimizer,
    metrics: Vec<Metric>,
    iterations: u64,
    #[serde(skip, default = "fresh_rng")]
    rng: StdRng,
}

impl Model {
    /// Binds the assembled graph to its training configuration.
    ///
    /// `rng` drives batch shuffling, so a seeded generator makes training reproducible.
    pub fn compile(
        input: InputLayer,
        backbone: Backbone,
        head: DenseLayer,
        loss: Loss,
        optimizer: Optimizer,
        metrics: Vec<Metric>,
        rng: StdRng,
    ) -> Result<Self> {
        if head.inputs != backbone.output_features() {
            return Err(Error::InvalidInput(format!(
                "output layer expects {} features, backbone produces {}",
                head.inputs,
                backbone.output_features()
            )));
        }
        Ok(Model {
            input,
            backbone,
            head,
            loss,
            optimizer,
            metrics,
            iterations: 0,
            rng,
        })
    }

    /// Per-instance input shape, `(series_length, dimensions)`.
    pub fn input_shape(&self) -> (usize, usize) {
        self.input.shape()
    }

    /// Per-instance output shape.
    pub fn output_shape(&self) -> (usize,) {
        (self.head.neurons,)
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }

    pub fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn backbone(&self) -> &Backbone {
        &self.backbone
    }

    pub fn head(&self) -> &DenseLayer {
        &self.head
    }

    /// Optimizer steps taken so far.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn parameter_count(&self) -> usize {
        self.backbone.layers().iter().map(|l| l.parameter_count()).sum::<usize>() + self.head.parameter_count()
    }

    pub fn non_trainable_count(&self) -> usize {
        self.backbone.layers().iter().map(|l| l.non_trainable_count()).sum()
    }

    fn check_input(&self, x: &Array3<f32>) -> Result<()> {
        let (n, series_length, dimensions) = x.dim();
        if n == 0 {
            return Err(Error::InvalidInput("no instances given".to_string()));
        }
        if (series_length, dimensions) != self.input_shape() {
            return Err(Error::ShapeMismatch {
                expected: self.input_shape(),
                found: (series_length, dimensions),
            });
        }
        Ok(())
    }

    fn zero_gradients(&mut self) {
        self.backbone.zero_gradients();
        self.head.zero_gradients();
    }

    /// One optimizer step on a batch. Returns the batch loss and the
    /// training-mode predictions made before the update.
    fn train_step(&mut self, x: &Array3<f32>, y: &Array1<f32>) -> (f32, Array1<f32>) {
        self.zero_gradients();

        let features = self.backbone.forward(x);
        let prediction = self.head.forward(&features).column(0).to_owned();
        let loss = self.loss.calculate(&prediction, y);
        if !loss.is_finite() {
            return (loss, prediction);
        }

        let grad = self.loss.gradient(&prediction, y).insert_axis(Axis(1));
        let grad_features = self.head.backward(&grad);
        self.backbone.backward(&grad_features);

        self.iterations += 1;
        self.head.apply_gradients(&self.optimizer, self.iterations);
        self.backbone.apply_gradients(&self.optimizer, self.iterations);

        (loss, prediction)
    }

    /// Trains on channel-last data `x` shaped `(n_instances, series_length, dimensions)`.
    ///
    /// Instances are reshuffled every epoch. Training stops early only when a
    /// callback asks for it; a non-finite loss aborts with an error.
    pub fn fit(
        &mut self,
        x: &Array3<f32>,
        y: &Array1<f32>,
        batch_size: usize,
        epochs: usize,
        verbose: bool,
        callbacks: &mut [Box<dyn Callback>],
    ) -> Result<History> {
        self.check_input(x)?;
        let n = x.dim().0;
        if y.len() != n {
            return Err(Error::InvalidInput(format!("{} instances but {} targets", n, y.len())));
        }
        if batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be positive".to_string()));
        }

        let params = TrainParams {
            epochs,
            batch_size,
            steps: n.div_ceil(batch_size),
            samples: n,
        };
        let mut history = History::new(params.clone());
        for callback in callbacks.iter_mut() {
            callback.on_train_begin(&params)?;
        }

        let mut indices: Vec<usize> = (0..n).collect();
        for epoch in 0..epochs {
            for callback in callbacks.iter_mut() {
                callback.on_epoch_begin(epoch)?;
            }

            indices.shuffle(&mut self.rng);
            let mut predictions = Array1::zeros(n);
            let mut targets = Array1::zeros(n);
            let mut loss_sum = 0.0;
            let mut offset = 0;

            for batch in indices.chunks(batch_size) {
                let xb = x.select(Axis(0), batch);
                let yb = y.select(Axis(0), batch);
                let (batch_loss, prediction) = self.train_step(&xb, &yb);
                if !batch_loss.is_finite() {
                    return Err(Error::NonFiniteLoss { epoch, loss: batch_loss });
                }

                loss_sum += batch_loss * batch.len() as f32;
                predictions.slice_mut(s![offset..offset + batch.len()]).assign(&prediction);
                targets.slice_mut(s![offset..offset + batch.len()]).assign(&yb);
                offset += batch.len();
            }

            let mut logs = EpochLogs::new(epoch, loss_sum / n as f32);
            for metric in &self.metrics {
                logs.metrics.insert(metric.name().to_string(), metric.compute(&predictions, &targets));
            }

            let line = format_epoch(epoch, epochs, &logs);
            if verbose {
                info!("{}", line);
            } else {
                debug!("{}", line);
            }

            let mut stop = false;
            for callback in callbacks.iter_mut() {
                if callback.on_epoch_end(epoch, &logs)? == CallbackAction::Stop {
                    stop = true;
                }
            }
            history.record(logs);

            if stop {
                warn!(epoch, "training stopped early by a callback");
                break;
            }
        }

        for callback in callbacks.iter_mut() {
            callback.on_train_end(&history)?;
        }
        Ok(history)
    }

    /// Inference-mode predictions for channel-last data, one value per instance.
    pub fn predict(&self, x: &Array3<f32>, executor: &dyn ConvExecutor) -> Result<Array1<f32>> {
        self.check_input(x)?;
        let mut output = Vec::with_capacity(x.dim().0);
        for chunk in x.axis_chunks_iter(Axis(0), PREDICT_BATCH_SIZE) {
            let features = self.backbone.infer(&chunk.to_owned(), executor)?;
            output.extend(self.head.infer(&features).column(0).iter().copied());
        }
        Ok(Array1::from(output))
    }

    /// Loss and metrics of inference-mode predictions, keyed like [`EpochLogs`].
    pub fn evaluate(
        &self,
        x: &Array3<f32>,
        y: &Array1<f32>,
        executor: &dyn ConvExecutor,
    ) -> Result<BTreeMap<String, f32>> {
        let prediction = self.predict(x, executor)?;
        if prediction.len() != y.len() {
            return Err(Error::InvalidInput(format!(
                "{} instances but {} targets",
                prediction.len(),
                y.len()
            )));
        }
        let mut results = BTreeMap::new();
        results.insert("loss".to_string(), self.loss.calculate(&prediction, y));
        for metric in &self.metrics {
            results.insert(metric.name().to_string(), metric.compute(&prediction, y));
        }
        Ok(results)
    }

    /// Layer table in the style of a Keras model summary.
    pub fn summary(&self) -> String {
        let rule = "=".repeat(72);
        let thin = "-".repeat(72);
        let (series_length, dimensions) = self.input_shape();

        let mut out = String::new();
        let _ = writeln!(out, "Model: \"resnet_regressor\"");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "{:<36}{:<24}{:>12}", "Layer (type)", "Output Shape", "Param #");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(
            out,
            "{:<36}{:<24}{:>12}",
            "input (InputLayer)",
            format!("(None, {}, {})", series_length, dimensions),
            0
        );
        for layer in self.backbone.layers() {
            let _ = writeln!(out, "{}", thin);
            let _ = writeln!(
                out,
                "{:<36}{:<24}{:>12}",
                format!("{} (ResidualBlock)", layer.name()),
                format!("(None, {}, {})", series_length, layer.output_channels()),
                layer.parameter_count() + layer.non_trainable_count()
            );
        }
        let _ = writeln!(out, "{}", thin);
        let _ = writeln!(
            out,
            "{:<36}{:<24}{:>12}",
            "global_average_pooling1d",
            format!("(None, {})", self.backbone.output_features()),
            0
        );
        let _ = writeln!(out, "{}", thin);
        let _ = writeln!(
            out,
            "{:<36}{:<24}{:>12}",
            format!("dense (Dense, {})", self.head.activation),
            format!("(None, {})", self.head.neurons),
            self.head.parameter_count()
        );
        let _ = writeln!(out, "{}", rule);

        let trainable = self.parameter_count();
        let non_trainable = self.non_trainable_count();
        let _ = writeln!(out, "Total params: {}", trainable + non_trainable);
        let _ = writeln!(out, "Trainable params: {}", trainable);
        let _ = write!(out, "Non-trainable params: {}", non_trainable);
        out
    }
}

fn format_epoch(epoch: usize, epochs: usize, logs: &EpochLogs) -> String {
    let mut line = format!("Epoch {}/{} - loss: {:.4}", epoch + 1, epochs, logs.loss);
    for (name, value) in &logs.metrics {
        let _ = write!(line, " - {}: {:.4}", name, value);
    }
    line
}
