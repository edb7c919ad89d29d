use ndarray::{Array2, ArrayD, ArrayView3, Axis};

use crate::genomics::CHANNELS;

use super::{ArchitectureParams, Model, ModelError, Trainable};

/// Per-task least-squares line from window GC fraction to label.
///
/// Useful as a sanity baseline and as a stand-in model for pipeline runs.
#[derive(Debug, Clone, PartialEq)]
pub struct GcContentModel {
    outputs: usize,
    slope: Vec<f32>,
    intercept: Vec<f32>,
    stats: Vec<RegressionSums>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RegressionSums {
    n: f64,
    x: f64,
    y: f64,
    xx: f64,
    xy: f64,
}

impl RegressionSums {
    fn push(&mut self, x: f64, y: f64) {
        self.n += 1.0;
        self.x += x;
        self.y += y;
        self.xx += x * x;
        self.xy += x * y;
    }

    /// `(slope, intercept)`; flat at the label mean when GC never varies.
    fn fit(&self) -> (f32, f32) {
        if self.n == 0.0 {
            return (0.0, 0.0);
        }
        let denom = self.n * self.xx - self.x * self.x;
        if denom.abs() < 1e-12 {
            return (0.0, (self.y / self.n) as f32);
        }
        let slope = (self.n * self.xy - self.x * self.y) / denom;
        let intercept = (self.y - slope * self.x) / self.n;
        (slope as f32, intercept as f32)
    }
}

impl GcContentModel {
    /// Registered name.
    pub const NAME: &'static str = "gc_content";

    /// Untrained model predicting the GC fraction itself for every task.
    pub fn new(outputs: usize) -> Self {
        Self {
            outputs,
            slope: vec![1.0; outputs],
            intercept: vec![0.0; outputs],
            stats: vec![RegressionSums::default(); outputs],
        }
    }

    pub(crate) fn build(params: &ArchitectureParams) -> Result<Box<dyn Trainable>, ModelError> {
        if params.outputs == 0 {
            return Err(ModelError::Failed("gc_content needs at least one output".into()));
        }
        Ok(Box::new(Self::new(params.outputs)))
    }

    /// Fitted `(slope, intercept)` of task `task`.
    pub fn coefficients(&self, task: usize) -> Option<(f32, f32)> {
        Some((*self.slope.get(task)?, *self.intercept.get(task)?))
    }

    /// GC fraction of every example; windows without known bases score 0.
    pub fn gc_fraction(inputs: &ArrayD<f32>) -> Result<Vec<f32>, ModelError> {
        let windows = as_windows(inputs)?;
        Ok(windows
            .outer_iter()
            .map(|window| {
                let known = window.sum();
                if known == 0.0 {
                    0.0
                } else {
                    (window.column(1).sum() + window.column(2).sum()) / known
                }
            })
            .collect())
    }
}

/// View any `(n, ..., 4)` tensor as `(n, L, 4)`.
fn as_windows(inputs: &ArrayD<f32>) -> Result<ArrayView3<'_, f32>, ModelError> {
    let shape = inputs.shape();
    let shape_error = |message: &str| ModelError::Shape {
        found: shape.to_vec(),
        message: message.to_string(),
    };
    if shape.len() < 2 || shape[shape.len() - 1] != CHANNELS {
        return Err(shape_error("last axis must hold 4 channels"));
    }
    let examples = shape[0];
    let positions = if examples == 0 {
        0
    } else {
        inputs.len() / (examples * CHANNELS)
    };
    inputs
        .view()
        .into_shape((examples, positions, CHANNELS))
        .map_err(|_| shape_error("tensor is not contiguous"))
}

impl Model for GcContentModel {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn predict_batch(&mut self, inputs: &ArrayD<f32>) -> Result<Array2<f32>, ModelError> {
        let gc = Self::gc_fraction(inputs)?;
        let mut out = Array2::zeros((gc.len(), self.outputs));
        for (mut row, fraction) in out.axis_iter_mut(Axis(0)).zip(gc) {
            for (task, value) in row.iter_mut().enumerate() {
                *value = self.intercept[task] + self.slope[task] * fraction;
            }
        }
        Ok(out)
    }
}

impl Trainable for GcContentModel {
    fn train_step(&mut self, inputs: &ArrayD<f32>, labels: &Array2<f32>) -> Result<(), ModelError> {
        let gc = Self::gc_fraction(inputs)?;
        if labels.dim() != (gc.len(), self.outputs) {
            return Err(ModelError::Labels {
                expected: (gc.len(), self.outputs),
                found: labels.dim(),
            });
        }
        for (row, fraction) in labels.outer_iter().zip(&gc) {
            for (task, &label) in row.iter().enumerate() {
                self.stats[task].push(f64::from(*fraction), f64::from(label));
            }
        }
        for task in 0..self.outputs {
            let (slope, intercept) = self.stats[task].fit();
            self.slope[task] = slope;
            self.intercept[task] = intercept;
        }
        Ok(())
    }
}
