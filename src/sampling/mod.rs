//! Per-batch selection of region indices.
//!
//! A [`SamplingPolicy`] is fixed at construction to one of three modes and
//! answers, for a batch number, which indices of the [`RegionIndex`] to
//! materialize and which of them receive synthesized all-zero labels.

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

use crate::labels::RegionIndex;

/// Sampling mode selected at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SamplingMode {
    /// Contiguous slices of the (optionally pre-shuffled) index space.
    Basic,
    /// Fixed fraction of positives per batch.
    Upsampled {
        /// Fraction of each batch drawn from the positive class.
        ratio: f64,
    },
    /// Basic slices, each positive paired with a dinucleotide-shuffled negative.
    ShuffledReferenceNegatives,
}

/// Invalid sampling configurations.
#[derive(Debug, Error, PartialEq)]
pub enum SamplingError {
    /// Batch size reduced to zero.
    #[error("effective batch size must be > 0")]
    EmptyBatch,
    /// Upsample ratio outside `(0, 1)`.
    #[error("upsample ratio {0} must lie strictly between 0 and 1")]
    InvalidRatio(f64),
    /// The ratio leaves one class without slots in a batch.
    #[error("upsample ratio {ratio} with batch size {batch_size} gives {positives} positive and {negatives} negative slots")]
    EmptySlots {
        /// Requested ratio.
        ratio: f64,
        /// Effective batch size.
        batch_size: usize,
        /// Positive slots per batch.
        positives: usize,
        /// Negative slots per batch.
        negatives: usize,
    },
    /// One class has no rows to draw from.
    #[error("no {0} rows available for upsampling")]
    EmptyClass(&'static str),
}

/// Indices chosen for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    /// Indices whose stored label rows are used.
    pub labeled: Vec<usize>,
    /// Indices materialized with all-zero labels (upsampled negatives).
    pub zero_labeled: Vec<usize>,
}

impl Selection {
    /// Total number of selected windows.
    pub fn len(&self) -> usize {
        self.labeled.len() + self.zero_labeled.len()
    }

    /// Returns `true` when nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Positive/negative draw orders for upsampled batches.
#[derive(Debug, Clone)]
pub struct UpsampleIndices {
    positive_rows: Vec<usize>,
    negative_rows: Vec<usize>,
    /// Class-local positions into `positive_rows`, tiled to length.
    pos_indices: Vec<usize>,
    /// Class-local positions into `negative_rows`, tiled to length.
    neg_indices: Vec<usize>,
    pos_count: usize,
    neg_count: usize,
}

impl UpsampleIndices {
    /// Positive draw order (class-local positions).
    pub fn pos_indices(&self) -> &[usize] {
        &self.pos_indices
    }

    /// Negative draw order (class-local positions).
    pub fn neg_indices(&self) -> &[usize] {
        &self.neg_indices
    }

    /// Positive slots per batch.
    pub fn pos_count(&self) -> usize {
        self.pos_count
    }

    /// Negative slots per batch.
    pub fn neg_count(&self) -> usize {
        self.neg_count
    }

    /// Region indices of the positive class.
    pub fn positive_rows(&self) -> &[usize] {
        &self.positive_rows
    }

    /// Region indices of the negative class.
    pub fn negative_rows(&self) -> &[usize] {
        &self.negative_rows
    }

    fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.pos_indices.shuffle(rng);
        self.neg_indices.shuffle(rng);
    }
}

/// Repeat `0..base` end to end until `target` entries, then truncate.
///
/// Every base position appears at least once whenever `target >= base`.
pub fn tile_indices(base: usize, target: usize) -> Vec<usize> {
    if base == 0 {
        return Vec::new();
    }
    (0..base).cycle().take(target).collect()
}

fn div_ceil(numerator: usize, denominator: usize) -> usize {
    (numerator + denominator - 1) / denominator
}

/// Selection state for one generator.
#[derive(Debug, Clone)]
pub struct SamplingPolicy {
    mode: SamplingMode,
    batch_size: usize,
    shuffle: bool,
    order: Vec<usize>,
    upsample: Option<UpsampleIndices>,
    num_batches: usize,
}

impl SamplingPolicy {
    /// Build the policy for `index`; `batch_size` is the effective size after
    /// augmentation halving.
    pub fn new<R: Rng + ?Sized>(
        index: &RegionIndex,
        mode: SamplingMode,
        batch_size: usize,
        shuffle: bool,
        rng: &mut R,
    ) -> Result<Self, SamplingError> {
        if batch_size == 0 {
            return Err(SamplingError::EmptyBatch);
        }
        let total = index.len();
        let mut order: Vec<usize> = (0..total).collect();
        let mut num_batches = div_ceil(total, batch_size);

        let upsample = match mode {
            SamplingMode::Upsampled { ratio } => {
                let (built, batches) =
                    Self::build_upsample(index, ratio, batch_size, total, rng, shuffle)?;
                num_batches = batches;
                Some(built)
            }
            _ => {
                if shuffle {
                    order.shuffle(rng);
                }
                None
            }
        };

        Ok(Self {
            mode,
            batch_size,
            shuffle,
            order,
            upsample,
            num_batches,
        })
    }

    fn build_upsample<R: Rng + ?Sized>(
        index: &RegionIndex,
        ratio: f64,
        batch_size: usize,
        total: usize,
        rng: &mut R,
        shuffle: bool,
    ) -> Result<(UpsampleIndices, usize), SamplingError> {
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(SamplingError::InvalidRatio(ratio));
        }
        let pos_count = (batch_size as f64 * ratio).floor() as usize;
        let neg_count = batch_size - pos_count;
        if pos_count == 0 || neg_count == 0 {
            return Err(SamplingError::EmptySlots {
                ratio,
                batch_size,
                positives: pos_count,
                negatives: neg_count,
            });
        }

        let (positive_rows, negative_rows) = match index {
            RegionIndex::Single(table) => (table.positive_rows(), table.negative_rows()),
            RegionIndex::Split {
                nonzero_bins,
                universal_negatives,
            } => {
                let offset = nonzero_bins.len();
                (
                    (0..offset).collect(),
                    (offset..offset + universal_negatives.len()).collect(),
                )
            }
        };
        if positive_rows.is_empty() {
            return Err(SamplingError::EmptyClass("positive"));
        }
        if negative_rows.is_empty() {
            return Err(SamplingError::EmptyClass("negative"));
        }

        // An epoch covers the index space and every row of both classes.
        let num_batches = div_ceil(total, batch_size)
            .max(div_ceil(negative_rows.len(), neg_count))
            .max(div_ceil(positive_rows.len(), pos_count));
        // Draw arrays hold exactly one epoch of slots.
        let pos_target = num_batches * pos_count;
        let neg_target = num_batches * neg_count;

        let mut upsample = UpsampleIndices {
            pos_indices: tile_indices(positive_rows.len(), pos_target),
            neg_indices: tile_indices(negative_rows.len(), neg_target),
            positive_rows,
            negative_rows,
            pos_count,
            neg_count,
        };
        if shuffle {
            upsample.shuffle(rng);
        }
        Ok((upsample, num_batches))
    }

    /// Mode chosen at construction.
    pub fn mode(&self) -> SamplingMode {
        self.mode
    }

    /// Effective batch size (before augmentation doubling).
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches in one epoch.
    pub fn len(&self) -> usize {
        self.num_batches
    }

    /// Returns `true` when an epoch has no batches.
    pub fn is_empty(&self) -> bool {
        self.num_batches == 0
    }

    /// Current basic-mode index order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Upsampling state, when upsampling is active.
    pub fn upsample(&self) -> Option<&UpsampleIndices> {
        self.upsample.as_ref()
    }

    /// Indices for batch `batch`, or `None` past the end of the epoch.
    pub fn select(&self, batch: usize) -> Option<Selection> {
        if batch >= self.num_batches {
            return None;
        }
        match &self.upsample {
            Some(up) => {
                let pick = |draw: &[usize], rows: &[usize], count: usize| -> Vec<usize> {
                    let lo = (batch * count).min(draw.len());
                    let hi = ((batch + 1) * count).min(draw.len());
                    draw[lo..hi].iter().map(|&local| rows[local]).collect()
                };
                Some(Selection {
                    labeled: pick(&up.pos_indices, &up.positive_rows, up.pos_count),
                    zero_labeled: pick(&up.neg_indices, &up.negative_rows, up.neg_count),
                })
            }
            None => {
                let lo = batch * self.batch_size;
                let hi = (lo + self.batch_size).min(self.order.len());
                Some(Selection {
                    labeled: self.order[lo..hi].to_vec(),
                    zero_labeled: Vec::new(),
                })
            }
        }
    }

    /// Epoch-boundary reshuffle: permutes the draw orders in place when
    /// shuffling is enabled (positive and negative orders independently).
    pub fn reshuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if !self.shuffle {
            return;
        }
        match &mut self.upsample {
            Some(up) => up.shuffle(rng),
            None => self.order.shuffle(rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::Interval;
    use crate::labels::LabelTable;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn single_index(labels: &[f32]) -> RegionIndex {
        let intervals = (0..labels.len() as u64)
            .map(|i| Interval::new("chr1", i * 10, i * 10 + 10))
            .collect();
        let values = Array2::from_shape_vec((labels.len(), 1), labels.to_vec()).unwrap();
        RegionIndex::Single(LabelTable::new(vec!["t".into()], intervals, values).unwrap())
    }

    #[test]
    fn tiling_covers_every_index() {
        assert_eq!(tile_indices(3, 7), vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(tile_indices(5, 2), vec![0, 1]);
        assert!(tile_indices(0, 4).is_empty());
    }

    #[test]
    fn basic_slices_without_shuffle() {
        let index = single_index(&[0.0; 5]);
        let mut rng = StdRng::seed_from_u64(0);
        let policy = SamplingPolicy::new(&index, SamplingMode::Basic, 2, false, &mut rng).unwrap();
        assert_eq!(policy.len(), 3);
        assert_eq!(policy.select(1).unwrap().labeled, vec![2, 3]);
        assert_eq!(policy.select(2).unwrap().labeled, vec![4]);
        assert!(policy.select(3).is_none());
    }

    #[test]
    fn upsample_rejects_empty_slots() {
        let index = single_index(&[1.0, 0.0, 0.0]);
        let mut rng = StdRng::seed_from_u64(0);
        let err = SamplingPolicy::new(&index, SamplingMode::Upsampled { ratio: 0.1 }, 4, true, &mut rng)
            .unwrap_err();
        assert!(matches!(err, SamplingError::EmptySlots { positives: 0, .. }));
        let err = SamplingPolicy::new(&index, SamplingMode::Upsampled { ratio: 1.0 }, 4, true, &mut rng)
            .unwrap_err();
        assert_eq!(err, SamplingError::InvalidRatio(1.0));
    }

    #[test]
    fn upsample_requires_both_classes() {
        let index = single_index(&[0.0, 0.0]);
        let mut rng = StdRng::seed_from_u64(0);
        let err = SamplingPolicy::new(&index, SamplingMode::Upsampled { ratio: 0.5 }, 2, true, &mut rng)
            .unwrap_err();
        assert_eq!(err, SamplingError::EmptyClass("positive"));
    }

    #[test]
    fn reshuffle_is_noop_without_shuffle() {
        let index = single_index(&[0.0; 6]);
        let mut rng = StdRng::seed_from_u64(3);
        let mut policy = SamplingPolicy::new(&index, SamplingMode::Basic, 2, false, &mut rng).unwrap();
        policy.reshuffle(&mut rng);
        assert_eq!(policy.order(), &[0, 1, 2, 3, 4, 5]);
    }
}
