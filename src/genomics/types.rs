use std::fmt;
use std::sync::Arc;

/// Half-open, 0-based genomic window `[start, end)` on a chromosome.
///
/// Intervals are the join key between sequence data and label rows, so two
/// intervals are equal only when all three coordinates match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Interval {
    /// Chromosome/contig name.
    pub chrom: Arc<str>,
    /// 0-based inclusive start.
    pub start: u64,
    /// 0-based exclusive end.
    pub end: u64,
}

impl Interval {
    /// Construct a new interval.
    pub fn new(chrom: impl Into<Arc<str>>, start: u64, end: u64) -> Self {
        Self {
            chrom: chrom.into(),
            start,
            end,
        }
    }

    /// Window length in bases.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Returns `true` when the interval covers no bases.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a 0-based position lies in the closed range `[start, end]`.
    ///
    /// Variant lookups use closed semantics, so a record sitting exactly on
    /// `end` is still reported for the window.
    pub fn contains_closed(&self, position: u64) -> bool {
        position >= self.start && position <= self.end
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

/// A single VCF-style record restricted to the fields batch materialization needs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VariantRecord {
    /// Chromosome/contig name.
    pub chrom: Arc<str>,
    /// 0-based genomic coordinate.
    pub position: u64,
    /// Reference allele as written in the source.
    pub reference: String,
    /// Alternate allele field as written in the source (may be a comma list).
    pub alternate: String,
    /// Genotype string of the first sample (e.g. `1/1`), when present.
    pub genotype: Option<String>,
}

impl VariantRecord {
    /// Construct a new record.
    pub fn new(
        chrom: impl Into<Arc<str>>,
        position: u64,
        reference: impl Into<String>,
        alternate: impl Into<String>,
        genotype: Option<String>,
    ) -> Self {
        Self {
            chrom: chrom.into(),
            position,
            reference: reference.into(),
            alternate: alternate.into(),
            genotype,
        }
    }

    /// Single-base substitution with equal-length alleles; indels and
    /// multi-allelic ALT fields are not eligible.
    pub fn is_snp(&self) -> bool {
        self.reference.len() == 1 && self.alternate.len() == 1
    }

    /// Whether the genotype is exactly homozygous alternate (`1/1`).
    ///
    /// Missing or malformed genotypes never qualify.
    pub fn is_homozygous_alt(&self) -> bool {
        self.genotype.as_deref() == Some("1/1")
    }

    /// Reference base as an uppercase ASCII byte (SNPs only).
    pub fn reference_base(&self) -> Option<u8> {
        single_base(&self.reference)
    }

    /// Alternate base as an uppercase ASCII byte (SNPs only).
    pub fn alternate_base(&self) -> Option<u8> {
        single_base(&self.alternate)
    }
}

fn single_base(allele: &str) -> Option<u8> {
    match allele.as_bytes() {
        [base] => Some(base.to_ascii_uppercase()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_containment_includes_end() {
        let interval = Interval::new("chr1", 10, 20);
        assert!(interval.contains_closed(10));
        assert!(interval.contains_closed(20));
        assert!(!interval.contains_closed(21));
        assert_eq!(interval.len(), 10);
    }

    #[test]
    fn snp_eligibility() {
        let snp = VariantRecord::new("chr1", 5, "A", "g", Some("1/1".into()));
        assert!(snp.is_snp());
        assert!(snp.is_homozygous_alt());
        assert_eq!(snp.alternate_base(), Some(b'G'));

        let multi = VariantRecord::new("chr1", 5, "A", "G,T", Some("0/1".into()));
        assert!(!multi.is_snp());
        assert!(!multi.is_homozygous_alt());

        let missing = VariantRecord::new("chr1", 5, "A", "G", None);
        assert!(!missing.is_homozygous_alt());
    }
}
