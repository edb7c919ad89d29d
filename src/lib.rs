//! # seqbatch
//!
//! Fixed-size batches of one-hot encoded genomic windows for sequence models,
//! and a parallel inference pipeline that streams predictions to disk.
//!
//! ## Data flow
//!
//! 1. **Region index**: label tables map an integer index space onto
//!    intervals and label rows (optionally split into nonzero bins and
//!    universal negatives)
//! 2. **Sampling**: each batch number selects indices, either as contiguous
//!    slices or with a fixed fraction of positives
//! 3. **Materialization**: reference fetch, variant injection, reverse
//!    complement and shuffled negatives, then one-hot encoding
//! 4. **Inference**: worker threads materialize batches, the controller
//!    predicts them, writer threads append labels and predictions
//!
//! ## Usage Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use seqbatch::{BatchGenerator, FastaReference, GeneratorConfig};
//!
//! let reference = Arc::new(FastaReference::new("hg38.fa"));
//! let config = GeneratorConfig::single("labels.tsv.gz").with_batch_size(256);
//! let mut generator = BatchGenerator::new(config, reference, None)?;
//! for idx in 0..generator.len() {
//!     let (x, y) = generator.get_batch(idx)?.into_training();
//! }
//! generator.on_epoch_end();
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod genomics;    // Intervals, codecs and sequence/variant sources
pub mod labels;      // Label tables and the region index
pub mod sampling;    // Per-batch index selection
pub mod materialize; // Window materialization and encoding
pub mod generator;   // Random-access batch generators
pub mod model;       // Model traits and architecture registry
pub mod pipeline;    // Parallel inference and writeback

// Re-exports for convenience
pub use genomics::{
    FastaReference, InMemoryReference, InMemoryVariants, Interval, ReferenceSource,
    TabixVariants, VariantEncoding, VariantRecord, VariantSource,
};
pub use labels::{load_label_table, LabelTable, RegionIndex};
pub use sampling::{SamplingMode, SamplingPolicy};
pub use materialize::{MaterializeOptions, Materializer};
pub use generator::{
    Batch, BatchGenerator, BatchSource, GeneratorConfig, GeneratorError, SnpBatchGenerator,
    SnpGeneratorConfig,
};
pub use model::{ArchitectureRegistry, FitPlan, Model, Trainable};
pub use pipeline::{CancelToken, InferencePipeline, PipelineConfig, PipelineError, PipelineSummary};
