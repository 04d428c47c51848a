use ndarray::{Array, Dimension, Zip};
use serde::{Deserialize, Serialize};

/// Gradient-based update rules. Hyperparameter defaults follow the usual Keras values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Optimizer {
    Adam {
        learning_rate: f32,
        beta_1: f32,
        beta_2: f32,
        epsilon: f32,
    },
    Sgd {
        learning_rate: f32,
        momentum: f32,
    },
    RmsProp {
        learning_rate: f32,
        rho: f32,
        epsilon: f32,
    },
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::adam(0.01)
    }
}

impl Optimizer {
    pub fn adam(learning_rate: f32) -> Self {
        Optimizer::Adam {
            learning_rate,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-7,
        }
    }

    pub fn sgd(learning_rate: f32, momentum: f32) -> Self {
        Optimizer::Sgd { learning_rate, momentum }
    }

    pub fn rmsprop(learning_rate: f32) -> Self {
        Optimizer::RmsProp {
            learning_rate,
            rho: 0.9,
            epsilon: 1e-7,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match *self {
            Optimizer::Adam { learning_rate, .. }
            | Optimizer::Sgd { learning_rate, .. }
            | Optimizer::RmsProp { learning_rate, .. } => learning_rate,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Optimizer::Adam { .. } => "adam",
            Optimizer::Sgd { .. } => "sgd",
            Optimizer::RmsProp { .. } => "rmsprop",
        }
    }

    /// Applies one update to `param` from its accumulated gradient.
    ///
    /// `iteration` is the 1-based count of optimizer steps taken so far,
    /// used by Adam's bias correction.
    pub fn update<D: Dimension>(&self, param: &mut Param<D>, iteration: u64) {
        param.ensure_buffers();
        match *self {
            Optimizer::Adam { learning_rate, beta_1, beta_2, epsilon } => {
                let t = iteration.max(1) as f32;
                let lr_t = learning_rate * (1.0 - beta_2.powf(t)).sqrt() / (1.0 - beta_1.powf(t));
                Zip::from(&mut param.value)
                    .and(&param.grad)
                    .and(&mut param.moment1)
                    .and(&mut param.moment2)
                    .for_each(|w, &g, m, v| {
                        *m = beta_1 * *m + (1.0 - beta_1) * g;
                        *v = beta_2 * *v + (1.0 - beta_2) * g * g;
                        *w -= lr_t * *m / (v.sqrt() + epsilon);
                    });
            }
            Optimizer::Sgd { learning_rate, momentum } => {
                Zip::from(&mut param.value)
                    .and(&param.grad)
                    .and(&mut param.moment1)
                    .for_each(|w, &g, velocity| {
                        *velocity = momentum * *velocity - learning_rate * g;
                        *w += *velocity;
                    });
            }
            Optimizer::RmsProp { learning_rate, rho, epsilon } => {
                Zip::from(&mut param.value)
                    .and(&param.grad)
                    .and(&mut param.moment2)
                    .for_each(|w, &g, v| {
                        *v = rho * *v + (1.0 - rho) * g * g;
                        *w -= learning_rate * g / (v.sqrt() + epsilon);
                    });
            }
        }
    }
}

/// A trainable tensor together with its gradient and optimizer slots.
///
/// Only `value` is persisted; the other buffers are rebuilt on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "D: Serialize", deserialize = "D: Deserialize<'de>"))]
pub struct Param<D: Dimension> {
    pub value: Array<f32, D>,
    #[serde(skip)]
    pub grad: Array<f32, D>,
    #[serde(skip)]
    moment1: Array<f32, D>,
    #[serde(skip)]
    moment2: Array<f32, D>,
}

impl<D: Dimension> Param<D> {
    pub fn new(value: Array<f32, D>) -> Self {
        let grad = Array::zeros(value.raw_dim());
        let moment1 = Array::zeros(value.raw_dim());
        let moment2 = Array::zeros(value.raw_dim());
        Param { value, grad, moment1, moment2 }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn zero_grad(&mut self) {
        if self.grad.shape() == self.value.shape() {
            self.grad.fill(0.0);
        } else {
            self.grad = Array::zeros(self.value.raw_dim());
        }
    }

    fn ensure_buffers(&mut self) {
        if self.grad.shape() != self.value.shape() {
            self.grad = Array::zeros(self.value.raw_dim());
        }
        if self.moment1.shape() != self.value.shape() {
            self.moment1 = Array::zeros(self.value.raw_dim());
        }
        if self.moment2.shape() != self.value.shape() {
            self.moment2 = Array::zeros(self.value.raw_dim());
        }
    }
}
