use std::path::PathBuf;

use crate::genomics::VariantEncoding;
use crate::sampling::SamplingMode;

use super::GeneratorError;

/// Where the label tables come from.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataSource {
    /// One table holding every interval.
    Single(PathBuf),
    /// Nonzero bins plus a table of universal negatives.
    Split {
        /// Table of bins with at least one positive task.
        nonzero_bins: PathBuf,
        /// Positions assumed negative for every task (label columns ignored).
        universal_negatives: PathBuf,
    },
}

/// Construction parameters for [`BatchGenerator`](super::BatchGenerator).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeneratorConfig {
    /// Label table location.
    pub source: DataSource,
    /// Task columns to keep, in this order; all columns when `None`.
    pub tasks: Option<Vec<String>>,
    /// Chromosome allow-list; all chromosomes when `None`.
    pub chroms: Option<Vec<String>>,
    /// Nominal batch size, before augmentation halving.
    pub batch_size: usize,
    /// Append reverse complements.
    pub reverse_complement: bool,
    /// Sampling mode.
    pub mode: SamplingMode,
    /// Shuffle index orders at construction and on every epoch end.
    pub shuffle: bool,
    /// Insert a singleton axis into the input tensor.
    pub expand_dims: bool,
    /// Variant injection mode; requires a variant source.
    pub variant_encoding: Option<VariantEncoding>,
    /// Seed for every random draw; drawn from entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            source: DataSource::Single(PathBuf::new()),
            tasks: None,
            chroms: None,
            batch_size: 128,
            reverse_complement: true,
            mode: SamplingMode::Upsampled { ratio: 0.1 },
            shuffle: true,
            expand_dims: true,
            variant_encoding: None,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    /// Configuration reading a single label table.
    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self {
            source: DataSource::Single(path.into()),
            ..Self::default()
        }
    }

    /// Configuration reading nonzero bins and universal negatives.
    pub fn split(nonzero_bins: impl Into<PathBuf>, universal_negatives: impl Into<PathBuf>) -> Self {
        Self {
            source: DataSource::Split {
                nonzero_bins: nonzero_bins.into(),
                universal_negatives: universal_negatives.into(),
            },
            ..Self::default()
        }
    }

    /// Configuration for ordered, unaugmented inference over every row.
    pub fn inference(path: impl Into<PathBuf>) -> Self {
        Self::single(path)
            .with_mode(SamplingMode::Basic)
            .with_reverse_complement(false)
            .with_shuffle(false)
    }

    /// Restrict to the named task columns.
    pub fn with_tasks(mut self, tasks: Vec<String>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Restrict to the named chromosomes.
    pub fn with_chroms(mut self, chroms: Vec<String>) -> Self {
        self.chroms = Some(chroms);
        self
    }

    /// Set the nominal batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Toggle reverse-complement augmentation.
    pub fn with_reverse_complement(mut self, enabled: bool) -> Self {
        self.reverse_complement = enabled;
        self
    }

    /// Select the sampling mode.
    pub fn with_mode(mut self, mode: SamplingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Toggle shuffling.
    pub fn with_shuffle(mut self, enabled: bool) -> Self {
        self.shuffle = enabled;
        self
    }

    /// Toggle the singleton input axis.
    pub fn with_expand_dims(mut self, enabled: bool) -> Self {
        self.expand_dims = enabled;
        self
    }

    /// Enable variant injection.
    pub fn with_variant_encoding(mut self, encoding: VariantEncoding) -> Self {
        self.variant_encoding = Some(encoding);
        self
    }

    /// Fix the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Adopt `seed` when one is given; `None` keeps the current setting.
    ///
    /// Used by pipeline factories so every worker replays the first source's draws.
    pub fn with_pinned_seed(mut self, seed: Option<u64>) -> Self {
        if seed.is_some() {
            self.seed = seed;
        }
        self
    }

    /// Number of augmentation steps that halve the nominal batch size.
    pub fn augmentations(&self) -> u32 {
        u32::from(self.reverse_complement)
            + u32::from(self.mode == SamplingMode::ShuffledReferenceNegatives)
    }

    /// Batch size after augmentation halving, validated.
    pub fn effective_batch_size(&self) -> Result<usize, GeneratorError> {
        let divisor = 1usize << self.augmentations();
        if self.batch_size % divisor != 0 {
            return Err(GeneratorError::Config(format!(
                "batch size {} is not divisible by {divisor} with {} augmentation(s)",
                self.batch_size,
                self.augmentations()
            )));
        }
        let effective = self.batch_size / divisor;
        if effective == 0 {
            return Err(GeneratorError::Config(
                "effective batch size must be > 0".to_string(),
            ));
        }
        Ok(effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(128, true, SamplingMode::Basic => Some(64); "revcomp halves")]
    #[test_case(128, true, SamplingMode::ShuffledReferenceNegatives => Some(32); "both halve twice")]
    #[test_case(6, true, SamplingMode::ShuffledReferenceNegatives => None; "not divisible by four")]
    #[test_case(0, false, SamplingMode::Basic => None; "zero batch")]
    #[test_case(7, false, SamplingMode::Basic => Some(7); "no augmentation")]
    fn effective_size(batch: usize, revcomp: bool, mode: SamplingMode) -> Option<usize> {
        GeneratorConfig::single("labels.tsv")
            .with_batch_size(batch)
            .with_reverse_complement(revcomp)
            .with_mode(mode)
            .effective_batch_size()
            .ok()
    }

    #[test_case(None, None => None)]
    #[test_case(None, Some(4) => Some(4))]
    #[test_case(Some(9), Some(4) => Some(4))]
    #[test_case(Some(9), None => Some(9))]
    fn pinned_seed(initial: Option<u64>, pinned: Option<u64>) -> Option<u64> {
        let mut config = GeneratorConfig::single("labels.tsv");
        config.seed = initial;
        config.with_pinned_seed(pinned).seed
    }

    #[test]
    fn inference_preset_is_ordered() {
        let config = GeneratorConfig::inference("labels.tsv");
        assert_eq!(config.mode, SamplingMode::Basic);
        assert!(!config.shuffle);
        assert!(!config.reverse_complement);
    }
}
