use rand::seq::SliceRandom;
use rand::Rng;

/// Shuffle a sequence while preserving its dinucleotide composition.
///
/// Every base keeps its list of successors; each list is permuted except for
/// its final entry. The final successors form a tree rooted at the last base
/// of the input, so walking the permuted lists from the first base always
/// yields an Eulerian path of the same length. First and last bases are
/// preserved.
pub fn dinucleotide_shuffle<R: Rng + ?Sized>(sequence: &[u8], rng: &mut R) -> Vec<u8> {
    if sequence.len() < 3 {
        return sequence.to_vec();
    }

    let mut successors: [Vec<usize>; 256] = std::array::from_fn(|_| Vec::new());
    for (idx, window) in sequence.windows(2).enumerate() {
        successors[window[0] as usize].push(idx + 1);
    }

    for next in successors.iter_mut() {
        if next.len() > 1 {
            let last = next.len() - 1;
            next[..last].shuffle(rng);
        }
    }

    let mut counters = [0usize; 256];
    let mut out = Vec::with_capacity(sequence.len());
    let mut cursor = 0usize;
    out.push(sequence[cursor]);
    for _ in 1..sequence.len() {
        let token = sequence[cursor] as usize;
        cursor = successors[token][counters[token]];
        counters[token] += 1;
        out.push(sequence[cursor]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn dinucleotides(seq: &[u8]) -> HashMap<(u8, u8), usize> {
        let mut counts = HashMap::new();
        for window in seq.windows(2) {
            *counts.entry((window[0], window[1])).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn preserves_dinucleotide_counts() {
        let seq = b"ACGTTGCAAGCTAGCTAGGATCCAN";
        let mut rng = StdRng::seed_from_u64(7);
        let shuffled = dinucleotide_shuffle(seq, &mut rng);
        assert_eq!(shuffled.len(), seq.len());
        assert_eq!(dinucleotides(&shuffled), dinucleotides(seq));
        assert_eq!(shuffled.first(), seq.first());
        assert_eq!(shuffled.last(), seq.last());
    }

    #[test]
    fn short_sequences_are_untouched() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(dinucleotide_shuffle(b"AC", &mut rng), b"AC");
        assert!(dinucleotide_shuffle(b"", &mut rng).is_empty());
    }
}
