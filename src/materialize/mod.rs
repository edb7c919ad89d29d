//! Turning intervals into one-hot input tensors.
//!
//! Steps run in a fixed order, each toggled independently: fetch, personal
//! variant substitution, reverse complement, dinucleotide-shuffled negatives,
//! one-hot encoding with frequency-mode allele splits.

use std::collections::HashSet;

use ndarray::{Array3, ArrayD, Axis};
use rand::Rng;
use thiserror::Error;

use crate::genomics::{
    base_index, dinucleotide_shuffle, encode_into, reverse_complement, Interval, ReferenceError,
    SequenceFetcher, VariantEncoding, VariantError, VariantLookup, CHANNELS,
};

/// Errors raised while materializing a batch.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// Reference fetch failed.
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    /// Variant lookup failed.
    #[error(transparent)]
    Variant(#[from] VariantError),
    /// A variant landed outside the window it was reported for.
    #[error("variant at {position} lies at offset {offset} outside window {interval} (length {window})")]
    VariantOffset {
        /// Window being materialized.
        interval: Interval,
        /// 0-based variant position.
        position: u64,
        /// Computed offset (negative when before the window start).
        offset: i64,
        /// Window length.
        window: usize,
    },
    /// Frequency encoding found a reference allele that disagrees with the genome.
    #[error("reference allele {expected} at {position} does not match base {found} in {interval}")]
    ReferenceMismatch {
        /// Window being materialized.
        interval: Interval,
        /// 0-based variant position.
        position: u64,
        /// Reference allele from the variant record.
        expected: char,
        /// Base found in the fetched window.
        found: char,
    },
    /// Windows in one batch differ in length.
    #[error("window {interval} has length {found}, batch expects {expected}")]
    RaggedWindows {
        /// Offending window.
        interval: Interval,
        /// Length of the first window.
        expected: usize,
        /// Length of the offending window.
        found: usize,
    },
}

/// Toggles for the materialization steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MaterializeOptions {
    /// Append the reverse complement of every sequence.
    pub reverse_complement: bool,
    /// Append a dinucleotide shuffle of every (possibly complemented) sequence.
    pub shuffled_negatives: bool,
    /// Insert a singleton axis: `(n, 1, L, 4)`.
    pub expand_dims: bool,
    /// Variant injection mode; requires a variant lookup at call time.
    pub variant_encoding: Option<VariantEncoding>,
}

impl MaterializeOptions {
    /// Number of examples produced per input interval.
    pub fn multiplier(&self) -> usize {
        let mut copies = 1;
        if self.reverse_complement {
            copies *= 2;
        }
        if self.shuffled_negatives {
            copies *= 2;
        }
        copies
    }
}

/// Materialized inputs for one batch.
#[derive(Debug, Clone)]
pub struct Materialized {
    /// One-hot tensor `(n, L, 4)` or `(n, 1, L, 4)`.
    pub inputs: ArrayD<f32>,
    /// Source interval of every example, in example order.
    pub positions: Vec<Interval>,
}

/// Heterozygous split recorded for frequency encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AlleleSplit {
    offset: usize,
    reference: usize,
    alternate: usize,
}

impl AlleleSplit {
    /// Same site seen on the reverse-complement strand.
    fn complemented(self, window: usize) -> Self {
        Self {
            offset: window - 1 - self.offset,
            reference: CHANNELS - 1 - self.reference,
            alternate: CHANNELS - 1 - self.alternate,
        }
    }
}

/// Stateless materializer configured by [`MaterializeOptions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Materializer {
    options: MaterializeOptions,
}

impl Materializer {
    /// Create a materializer.
    pub fn new(options: MaterializeOptions) -> Self {
        Self { options }
    }

    /// Active options.
    pub fn options(&self) -> MaterializeOptions {
        self.options
    }

    /// Materialize `intervals` using the caller's own handles.
    ///
    /// Example order: the fetched windows, then their reverse complements,
    /// then one shuffled copy of each of those.
    pub fn materialize<R: Rng + ?Sized>(
        &self,
        intervals: &[Interval],
        reference: &mut dyn SequenceFetcher,
        mut variants: Option<&mut dyn VariantLookup>,
        rng: &mut R,
    ) -> Result<Materialized, MaterializeError> {
        let window = window_length(intervals)?;

        let mut sequences = Vec::with_capacity(intervals.len() * self.options.multiplier());
        let mut splits: Vec<Vec<AlleleSplit>> = Vec::with_capacity(intervals.len());
        for interval in intervals {
            let mut bases = reference.fetch(&interval.chrom, interval.start, interval.end)?;
            let mut site_splits = Vec::new();
            match (self.options.variant_encoding, variants.as_deref_mut()) {
                (Some(VariantEncoding::Personal), Some(lookup)) => {
                    apply_personal(interval, &mut bases, lookup)?;
                }
                (Some(VariantEncoding::Frequency), Some(lookup)) => {
                    site_splits = frequency_splits(interval, &bases, lookup)?;
                }
                _ => {}
            }
            sequences.push(bases);
            splits.push(site_splits);
        }

        let mut positions: Vec<Interval> = intervals.to_vec();
        if self.options.reverse_complement {
            let complemented: Vec<Vec<u8>> =
                sequences.iter().map(|seq| reverse_complement(seq)).collect();
            sequences.extend(complemented);
            let mirrored: Vec<Vec<AlleleSplit>> = splits
                .iter()
                .map(|sites| sites.iter().map(|s| s.complemented(window)).collect())
                .collect();
            splits.extend(mirrored);
            positions.extend_from_slice(intervals);
        }
        if self.options.shuffled_negatives {
            let shuffled: Vec<Vec<u8>> = sequences
                .iter()
                .map(|seq| dinucleotide_shuffle(seq, rng))
                .collect();
            sequences.extend(shuffled);
            splits.extend(std::iter::repeat_with(Vec::new).take(positions.len()));
            positions.extend_from_within(..);
        }

        let mut encoded = Array3::<f32>::zeros((sequences.len(), window, CHANNELS));
        for (example, (seq, sites)) in sequences.iter().zip(&splits).enumerate() {
            let mut view = encoded.index_axis_mut(Axis(0), example);
            encode_into(seq, view.view_mut());
            for site in sites {
                view[[site.offset, site.reference]] = 0.5;
                view[[site.offset, site.alternate]] = 0.5;
            }
        }

        Ok(Materialized {
            inputs: finish_tensor(encoded, self.options.expand_dims),
            positions,
        })
    }
}

/// Insert the singleton channel axis when requested and erase the rank.
pub fn finish_tensor(encoded: Array3<f32>, expand_dims: bool) -> ArrayD<f32> {
    if expand_dims {
        encoded.insert_axis(Axis(1)).into_dyn()
    } else {
        encoded.into_dyn()
    }
}

/// Encode equal-length sequences into `(n, L, 4)` (or `(n, 1, L, 4)`).
pub fn encode_batch(sequences: &[Vec<u8>], window: usize, expand_dims: bool) -> ArrayD<f32> {
    let mut encoded = Array3::<f32>::zeros((sequences.len(), window, CHANNELS));
    for (example, seq) in sequences.iter().enumerate() {
        let len = seq.len().min(window);
        encode_into(&seq[..len], encoded.index_axis_mut(Axis(0), example));
    }
    finish_tensor(encoded, expand_dims)
}

fn window_length(intervals: &[Interval]) -> Result<usize, MaterializeError> {
    let Some(first) = intervals.first() else {
        return Ok(0);
    };
    let expected = first.len() as usize;
    for interval in intervals {
        let found = interval.len() as usize;
        if found != expected {
            return Err(MaterializeError::RaggedWindows {
                interval: interval.clone(),
                expected,
                found,
            });
        }
    }
    Ok(expected)
}

/// Offset of a variant inside the window, or `None` when it sits exactly on
/// the closed end boundary. Anything further out is fatal.
fn checked_offset(
    interval: &Interval,
    position: u64,
    window: usize,
) -> Result<Option<usize>, MaterializeError> {
    let offset = position as i64 - interval.start as i64;
    if offset < 0 || offset > window as i64 {
        return Err(MaterializeError::VariantOffset {
            interval: interval.clone(),
            position,
            offset,
            window,
        });
    }
    let offset = offset as usize;
    Ok((offset < window).then_some(offset))
}

fn apply_personal(
    interval: &Interval,
    bases: &mut [u8],
    lookup: &mut dyn VariantLookup,
) -> Result<(), MaterializeError> {
    let window = bases.len();
    let mut applied = HashSet::new();
    for record in lookup.query(interval)? {
        if !record.is_snp() || !record.is_homozygous_alt() {
            continue;
        }
        let Some(alt) = record.alternate_base() else {
            continue;
        };
        if let Some(offset) = checked_offset(interval, record.position, window)? {
            if applied.insert(offset) {
                bases[offset] = alt;
            }
        }
    }
    Ok(())
}

fn frequency_splits(
    interval: &Interval,
    bases: &[u8],
    lookup: &mut dyn VariantLookup,
) -> Result<Vec<AlleleSplit>, MaterializeError> {
    let window = bases.len();
    let mut seen = HashSet::new();
    let mut splits = Vec::new();
    for record in lookup.query(interval)? {
        if !record.is_snp() {
            continue;
        }
        let (Some(ref_base), Some(alt_base)) = (record.reference_base(), record.alternate_base())
        else {
            continue;
        };
        let (Some(reference), Some(alternate)) = (base_index(ref_base), base_index(alt_base)) else {
            continue;
        };
        let Some(offset) = checked_offset(interval, record.position, window)? else {
            continue;
        };
        if base_index(bases[offset]) != Some(reference) {
            return Err(MaterializeError::ReferenceMismatch {
                interval: interval.clone(),
                position: record.position,
                expected: ref_base as char,
                found: bases[offset] as char,
            });
        }
        if reference != alternate && seen.insert(offset) {
            splits.push(AlleleSplit {
                offset,
                reference,
                alternate,
            });
        }
    }
    Ok(splits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{
        one_hot_decode, InMemoryReference, InMemoryVariants, ReferenceSource, VariantRecord,
        VariantSource,
    };
    use ndarray::{s, Ix2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const CONTIG: &[u8] = b"ACGTACGTACGTACGTACGTACGTACGTACGT";

    fn reference() -> InMemoryReference {
        InMemoryReference::new().with_contig("chr1", CONTIG)
    }

    fn decode(inputs: &ArrayD<f32>, example: usize) -> Vec<u8> {
        let view = inputs
            .index_axis(Axis(0), example)
            .into_dimensionality::<Ix2>()
            .unwrap();
        one_hot_decode(&view.to_owned())
    }

    #[test]
    fn basic_shapes_and_expand_dims() {
        let reference = reference();
        let mut handle = reference.open().unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let intervals = vec![Interval::new("chr1", 0, 8), Interval::new("chr1", 8, 16)];

        let plain = Materializer::default()
            .materialize(&intervals, handle.as_mut(), None, &mut rng)
            .unwrap();
        assert_eq!(plain.inputs.shape(), &[2, 8, 4]);

        let expanded = Materializer::new(MaterializeOptions {
            expand_dims: true,
            ..Default::default()
        })
        .materialize(&intervals, handle.as_mut(), None, &mut rng)
        .unwrap();
        assert_eq!(expanded.inputs.shape(), &[2, 1, 8, 4]);
    }

    #[test]
    fn ragged_windows_are_rejected() {
        let reference = reference();
        let mut handle = reference.open().unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let intervals = vec![Interval::new("chr1", 0, 8), Interval::new("chr1", 8, 12)];
        let err = Materializer::default()
            .materialize(&intervals, handle.as_mut(), None, &mut rng)
            .unwrap_err();
        assert!(matches!(err, MaterializeError::RaggedWindows { found: 4, .. }));
    }

    #[test]
    fn shuffled_negatives_follow_complements() {
        let reference = reference();
        let mut handle = reference.open().unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let intervals = vec![Interval::new("chr1", 0, 12)];
        let out = Materializer::new(MaterializeOptions {
            reverse_complement: true,
            shuffled_negatives: true,
            ..Default::default()
        })
        .materialize(&intervals, handle.as_mut(), None, &mut rng)
        .unwrap();
        assert_eq!(out.inputs.shape(), &[4, 12, 4]);
        assert_eq!(out.positions.len(), 4);
        assert_eq!(decode(&out.inputs, 0), b"ACGTACGTACGT");
        assert_eq!(decode(&out.inputs, 1), reverse_complement(b"ACGTACGTACGT"));
        assert_eq!(out.inputs.slice(s![2, .., ..]).sum(), 12.0);
    }

    #[test]
    fn variant_before_window_is_fatal() {
        let reference = reference();
        let variants = InMemoryVariants::new(vec![VariantRecord::new(
            "chr1",
            3,
            "T",
            "A",
            Some("1/1".into()),
        )]);
        let mut handle = reference.open().unwrap();
        let mut lookup = variants.open().unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let err = Materializer::new(MaterializeOptions {
            variant_encoding: Some(VariantEncoding::Personal),
            ..Default::default()
        })
        .materialize(
            &[Interval::new("chr1", 4, 8)],
            handle.as_mut(),
            Some(&mut Skewed(lookup.as_mut())),
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, MaterializeError::VariantOffset { offset: -1, .. }));
    }

    /// Returns every record of the wrapped lookup regardless of the window.
    struct Skewed<'a>(&'a mut dyn VariantLookup);

    impl VariantLookup for Skewed<'_> {
        fn query(&mut self, _interval: &Interval) -> Result<Vec<VariantRecord>, VariantError> {
            self.0.query(&Interval::new("chr1", 0, 32))
        }
    }

    #[test]
    fn variant_on_closed_end_is_skipped() {
        let reference = reference();
        let variants = InMemoryVariants::new(vec![VariantRecord::new(
            "chr1",
            8,
            "A",
            "G",
            Some("1/1".into()),
        )]);
        let mut handle = reference.open().unwrap();
        let mut lookup = variants.open().unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let out = Materializer::new(MaterializeOptions {
            variant_encoding: Some(VariantEncoding::Personal),
            ..Default::default()
        })
        .materialize(
            &[Interval::new("chr1", 0, 8)],
            handle.as_mut(),
            Some(lookup.as_mut()),
            &mut rng,
        )
        .unwrap();
        assert_eq!(decode(&out.inputs, 0), b"ACGTACGT");
    }

    #[test]
    fn frequency_reference_mismatch() {
        let reference = reference();
        let variants =
            InMemoryVariants::new(vec![VariantRecord::new("chr1", 2, "T", "A", None)]);
        let mut handle = reference.open().unwrap();
        let mut lookup = variants.open().unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let err = Materializer::new(MaterializeOptions {
            variant_encoding: Some(VariantEncoding::Frequency),
            ..Default::default()
        })
        .materialize(
            &[Interval::new("chr1", 0, 8)],
            handle.as_mut(),
            Some(lookup.as_mut()),
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, MaterializeError::ReferenceMismatch { position: 2, .. }));
    }
}
