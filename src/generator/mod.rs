//! Indexed batch generators.
//!
//! [`BatchGenerator`] ties a [`RegionIndex`], a [`SamplingPolicy`] and a
//! [`Materializer`] together behind random access by batch number.
//! [`SnpBatchGenerator`] scores alleles at fixed sites. Both implement
//! [`BatchSource`] so the inference pipeline can drive either one.

mod config;
mod snp;

use std::sync::Arc;

use ndarray::{s, Array2, ArrayD};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::info;

use crate::genomics::{
    Interval, ReferenceError, ReferenceSource, VariantError, VariantLookup, VariantSource,
};
use crate::labels::{load_label_table, LabelError, LabelTable, RegionIndex};
use crate::materialize::{MaterializeError, MaterializeOptions, Materializer};
use crate::sampling::{SamplingError, SamplingMode, SamplingPolicy};

pub use config::{DataSource, GeneratorConfig};
pub use snp::{load_allele_table, AlleleTable, SnpBatchGenerator, SnpGeneratorConfig};

/// Errors raised while constructing generators or producing batches.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Invalid construction parameters.
    #[error("invalid generator configuration: {0}")]
    Config(String),
    /// Sampling policy could not be built.
    #[error(transparent)]
    Sampling(#[from] SamplingError),
    /// Label tables could not be loaded.
    #[error(transparent)]
    Label(#[from] LabelError),
    /// Reference handle could not be opened.
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    /// Variant handle could not be opened.
    #[error(transparent)]
    Variant(#[from] VariantError),
    /// Batch materialization failed.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    /// Requested batch lies past the end of the epoch.
    #[error("batch {index} out of range for an epoch of {len} batches")]
    OutOfRange {
        /// Requested batch.
        index: usize,
        /// Batches per epoch.
        len: usize,
    },
    /// A scored site sits too close to the contig start for its flank.
    #[error("site {chrom}:{position} has fewer than {flank} upstream bases")]
    SiteBounds {
        /// Contig of the site.
        chrom: Arc<str>,
        /// 1-based site position.
        position: u64,
        /// Requested flank.
        flank: u64,
    },
}

/// One materialized batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// One-hot inputs, `(n, L, 4)` or `(n, 1, L, 4)`.
    pub inputs: ArrayD<f32>,
    /// Label rows, `(n, tasks)`.
    pub labels: Array2<f32>,
    /// Source interval of every example.
    pub positions: Vec<Interval>,
}

impl Batch {
    /// Number of examples.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` for a batch without examples.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Inputs and labels, as consumed by training.
    pub fn into_training(self) -> (ArrayD<f32>, Array2<f32>) {
        (self.inputs, self.labels)
    }

    /// Positions, inputs and labels, as consumed by evaluation.
    pub fn into_evaluation(self) -> (Vec<Interval>, ArrayD<f32>, Array2<f32>) {
        (self.positions, self.inputs, self.labels)
    }
}

/// Random-access batch producer.
pub trait BatchSource: Send + Sync {
    /// Batches per epoch.
    fn len(&self) -> usize;

    /// Returns `true` when an epoch has no batches.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize batch `index`.
    fn get_batch(&self, index: usize) -> Result<Batch, GeneratorError>;

    /// Label column names, in label-row order.
    fn label_columns(&self) -> &[String];

    /// Seed behind the source's random draws, if it has any.
    ///
    /// Sources built with the same seed must map every batch index to the
    /// same windows.
    fn seed(&self) -> Option<u64> {
        None
    }

    /// Epoch boundary hook.
    fn on_epoch_end(&mut self) {}
}

/// Batch generator over labelled genomic windows.
pub struct BatchGenerator {
    config: GeneratorConfig,
    index: RegionIndex,
    policy: SamplingPolicy,
    materializer: Materializer,
    reference: Arc<dyn ReferenceSource>,
    variants: Option<Arc<dyn VariantSource>>,
    rng: StdRng,
    seed: u64,
    epoch: u64,
}

impl std::fmt::Debug for BatchGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchGenerator")
            .field("config", &self.config)
            .field("rows", &self.index.len())
            .field("batches", &self.policy.len())
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// Load the label tables named by `config`.
pub fn load_region_index(config: &GeneratorConfig) -> Result<RegionIndex, LabelError> {
    let tasks = config.tasks.as_deref();
    let chroms = config.chroms.as_deref();
    match &config.source {
        DataSource::Single(path) => Ok(RegionIndex::Single(load_label_table(path, tasks, chroms)?)),
        DataSource::Split {
            nonzero_bins,
            universal_negatives,
        } => {
            let nonzero_bins = load_label_table(nonzero_bins, tasks, chroms)?;
            // Only positions are needed; label columns are never parsed.
            let universal_negatives = load_label_table(universal_negatives, Some(&[]), chroms)?;
            Ok(RegionIndex::Split {
                nonzero_bins,
                universal_negatives,
            })
        }
    }
}

impl BatchGenerator {
    /// Load label tables and build the generator.
    pub fn new(
        config: GeneratorConfig,
        reference: Arc<dyn ReferenceSource>,
        variants: Option<Arc<dyn VariantSource>>,
    ) -> Result<Self, GeneratorError> {
        let index = load_region_index(&config)?;
        Self::from_index(config, index, reference, variants)
    }

    /// Build the generator over an already assembled index.
    ///
    /// `config.source`, `config.tasks` and `config.chroms` are not consulted.
    pub fn from_index(
        config: GeneratorConfig,
        index: RegionIndex,
        reference: Arc<dyn ReferenceSource>,
        variants: Option<Arc<dyn VariantSource>>,
    ) -> Result<Self, GeneratorError> {
        let batch_size = config.effective_batch_size()?;
        match (config.variant_encoding, variants.is_some()) {
            (Some(encoding), false) => {
                return Err(GeneratorError::Config(format!(
                    "{encoding:?} variant encoding requires a variant source"
                )))
            }
            (None, true) => {
                return Err(GeneratorError::Config(
                    "variant source given without a variant encoding".to_string(),
                ))
            }
            _ => {}
        }

        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let mut rng = StdRng::seed_from_u64(seed);
        let policy = SamplingPolicy::new(&index, config.mode, batch_size, config.shuffle, &mut rng)?;
        let materializer = Materializer::new(MaterializeOptions {
            reverse_complement: config.reverse_complement,
            shuffled_negatives: config.mode == SamplingMode::ShuffledReferenceNegatives,
            expand_dims: config.expand_dims,
            variant_encoding: config.variant_encoding,
        });

        info!(
            rows = index.len(),
            tasks = index.width(),
            batches = policy.len(),
            batch_size,
            mode = ?config.mode,
            "batch generator ready"
        );

        Ok(Self {
            config,
            index,
            policy,
            materializer,
            reference,
            variants,
            rng,
            seed,
            epoch: 0,
        })
    }

    /// Batches per epoch.
    pub fn len(&self) -> usize {
        self.policy.len()
    }

    /// Returns `true` when an epoch has no batches.
    pub fn is_empty(&self) -> bool {
        self.policy.is_empty()
    }

    /// Construction parameters.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Underlying region index.
    pub fn index(&self) -> &RegionIndex {
        &self.index
    }

    /// Sampling state.
    pub fn policy(&self) -> &SamplingPolicy {
        &self.policy
    }

    /// Seed every random draw derives from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Completed epochs.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Every label row in index order, universal negatives zero-filled.
    pub fn labels(&self) -> LabelTable {
        self.index.labels()
    }

    /// Materialize batch `index`.
    ///
    /// Opens its own reference and variant handles and drops them on return,
    /// so concurrent calls never share a handle.
    pub fn get_batch(&self, index: usize) -> Result<Batch, GeneratorError> {
        let out_of_range = || GeneratorError::OutOfRange {
            index,
            len: self.policy.len(),
        };
        let selection = self.policy.select(index).ok_or_else(out_of_range)?;
        let (mut intervals, labeled) = self
            .index
            .resolve_many(&selection.labeled)
            .ok_or_else(out_of_range)?;
        let (negatives, _) = self
            .index
            .resolve_many(&selection.zero_labeled)
            .ok_or_else(out_of_range)?;

        let mut base_labels = Array2::zeros((intervals.len() + negatives.len(), self.index.width()));
        base_labels
            .slice_mut(s![..intervals.len(), ..])
            .assign(&labeled);
        intervals.extend(negatives);

        let mut reference = self.reference.open()?;
        let mut variants = match &self.variants {
            Some(source) => Some(source.open()?),
            None => None,
        };
        let mut rng = StdRng::seed_from_u64(self.seed ^ (self.epoch << 32) ^ index as u64);
        let materialized = self.materializer.materialize(
            &intervals,
            reference.as_mut(),
            variants
                .as_mut()
                .map(|lookup| &mut **lookup as &mut dyn VariantLookup),
            &mut rng,
        )?;

        Ok(Batch {
            inputs: materialized.inputs,
            labels: expand_labels(&base_labels, self.materializer.options()),
            positions: materialized.positions,
        })
    }

    /// Reshuffle index orders when shuffling is on and advance the epoch.
    pub fn on_epoch_end(&mut self) {
        self.policy.reshuffle(&mut self.rng);
        self.epoch += 1;
    }
}

impl BatchSource for BatchGenerator {
    fn len(&self) -> usize {
        BatchGenerator::len(self)
    }

    fn get_batch(&self, index: usize) -> Result<Batch, GeneratorError> {
        BatchGenerator::get_batch(self, index)
    }

    fn label_columns(&self) -> &[String] {
        self.index.columns()
    }

    fn seed(&self) -> Option<u64> {
        Some(self.seed)
    }

    fn on_epoch_end(&mut self) {
        BatchGenerator::on_epoch_end(self)
    }
}

/// Lay label rows out to match the materialized example order: the source
/// rows, repeated for reverse complements, then zeros for shuffled copies.
fn expand_labels(base: &Array2<f32>, options: MaterializeOptions) -> Array2<f32> {
    let rows = base.nrows();
    let mut labels = Array2::zeros((rows * options.multiplier(), base.ncols()));
    let labeled_copies = if options.reverse_complement { 2 } else { 1 };
    for copy in 0..labeled_copies {
        labels
            .slice_mut(s![copy * rows..(copy + 1) * rows, ..])
            .assign(base);
    }
    labels
}
