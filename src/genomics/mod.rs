//! Genomic primitives used by batch materialization.
//!
//! Intervals and variant records, the one-hot codec, dinucleotide shuffling,
//! and the reference/variant sources that hand out per-call handles.

mod dinuc;
mod onehot;
mod reference;
mod types;
mod variants;

pub use dinuc::dinucleotide_shuffle;
pub use onehot::{
    base_index, complement, encode_into, one_hot_decode, one_hot_encode, reverse_complement,
    reverse_complement_encoded, CHANNELS,
};
pub use reference::{
    FastaReference, InMemoryReference, ReferenceError, ReferenceSource, SequenceFetcher,
};
pub use types::{Interval, VariantRecord};
pub use variants::{
    parse_vcf_line, InMemoryVariants, TabixVariants, VariantEncoding, VariantError,
    VariantLookup, VariantSource,
};
