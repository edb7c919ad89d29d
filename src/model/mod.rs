//! Model seams: prediction, generator-driven fitting and named architectures.

mod baseline;
mod registry;

use ndarray::{Array2, ArrayD};
use thiserror::Error;
use tracing::{debug, info};

use crate::generator::{BatchSource, GeneratorError};

pub use baseline::GcContentModel;
pub use registry::{
    ArchitectureBuilder, ArchitectureInfo, ArchitectureParams, ArchitectureRegistry, RegistryError,
};

/// Errors raised by models.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Input tensor does not have the expected layout.
    #[error("unexpected input shape {found:?}: {message}")]
    Shape {
        /// Shape that was received.
        found: Vec<usize>,
        /// What was expected.
        message: String,
    },
    /// Labels do not line up with the inputs.
    #[error("labels have shape {found:?}, expected {expected:?}")]
    Labels {
        /// Expected `(rows, columns)`.
        expected: (usize, usize),
        /// Received `(rows, columns)`.
        found: (usize, usize),
    },
    /// A batch could not be produced while fitting.
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    /// Model-specific failure.
    #[error("model failure: {0}")]
    Failed(String),
}

/// Opaque predictor over one-hot batches.
pub trait Model {
    /// Architecture name.
    fn name(&self) -> &str;

    /// Predict one row per example.
    fn predict_batch(&mut self, inputs: &ArrayD<f32>) -> Result<Array2<f32>, ModelError>;
}

/// Step counts for one fit, derived from example counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitPlan {
    /// Passes over the training generator.
    pub epochs: usize,
    /// Training batches per epoch (`num_train / batch_size`).
    pub steps_per_epoch: usize,
    /// Validation batches per epoch (`num_valid / batch_size`).
    pub validation_steps: usize,
}

impl FitPlan {
    /// Derive step counts from example counts and the nominal batch size.
    pub fn new(num_train: usize, num_valid: usize, batch_size: usize, epochs: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            epochs,
            steps_per_epoch: num_train / batch_size,
            validation_steps: num_valid / batch_size,
        }
    }
}

/// Counters accumulated by [`Trainable::fit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FitReport {
    /// Epochs completed.
    pub epochs: usize,
    /// Training batches consumed.
    pub train_batches: usize,
    /// Training examples consumed.
    pub train_examples: usize,
    /// Validation batches predicted.
    pub validation_batches: usize,
}

/// Model that can be fitted from a batch generator.
pub trait Trainable: Model {
    /// Update the model from one batch.
    fn train_step(&mut self, inputs: &ArrayD<f32>, labels: &Array2<f32>)
        -> Result<(), ModelError>;

    /// Drive training for `plan.epochs` epochs.
    ///
    /// Steps wrap around the generator when `steps_per_epoch` exceeds its
    /// length. The training generator sees `on_epoch_end` after every epoch;
    /// the validation generator is only predicted.
    fn fit(
        &mut self,
        train: &mut dyn BatchSource,
        valid: Option<&dyn BatchSource>,
        plan: &FitPlan,
    ) -> Result<FitReport, ModelError> {
        let mut report = FitReport::default();
        if train.is_empty() {
            return Ok(report);
        }
        for epoch in 0..plan.epochs {
            for step in 0..plan.steps_per_epoch {
                let (inputs, labels) = train.get_batch(step % train.len())?.into_training();
                self.train_step(&inputs, &labels)?;
                report.train_batches += 1;
                report.train_examples += labels.nrows();
            }
            if let Some(valid) = valid.filter(|valid| !valid.is_empty()) {
                for step in 0..plan.validation_steps {
                    let (inputs, _) = valid.get_batch(step % valid.len())?.into_training();
                    self.predict_batch(&inputs)?;
                    report.validation_batches += 1;
                }
            }
            train.on_epoch_end();
            report.epochs += 1;
            debug!(epoch, batches = report.train_batches, "epoch finished");
        }
        info!(
            model = self.name(),
            epochs = report.epochs,
            examples = report.train_examples,
            "fit finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_uses_floor_division() {
        let plan = FitPlan::new(1000, 250, 128, 3);
        assert_eq!(plan.steps_per_epoch, 7);
        assert_eq!(plan.validation_steps, 1);
        assert_eq!(plan.epochs, 3);
    }
}
