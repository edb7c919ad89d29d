use ndarray::{s, Array2, ArrayViewMut2};

/// Number of one-hot channels per base (A, C, G, T).
pub const CHANNELS: usize = 4;

/// Channel index of a base, `None` for anything outside `ACGT`.
pub fn base_index(base: u8) -> Option<usize> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

fn decode_index(idx: usize) -> u8 {
    match idx {
        0 => b'A',
        1 => b'C',
        2 => b'G',
        3 => b'T',
        _ => b'N',
    }
}

/// Watson-Crick complement preserving case; unknown bases map to `N`.
pub fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        b'a' => b't',
        b'c' => b'g',
        b'g' => b'c',
        b't' => b'a',
        b'n' => b'n',
        _ => b'N',
    }
}

/// Reverse complement of a sequence.
pub fn reverse_complement(sequence: &[u8]) -> Vec<u8> {
    sequence.iter().rev().map(|&base| complement(base)).collect()
}

/// One-hot encode into a `(len, 4)` matrix.
pub fn one_hot_encode(sequence: &[u8]) -> Array2<f32> {
    let mut out = Array2::zeros((sequence.len(), CHANNELS));
    encode_into(sequence, out.view_mut());
    out
}

/// Encode into a pre-allocated `(len, 4)` view. The view must be zeroed.
///
/// # Panics
/// Panics if the view has fewer rows than `sequence`.
pub fn encode_into(sequence: &[u8], mut out: ArrayViewMut2<'_, f32>) {
    assert!(
        out.nrows() >= sequence.len(),
        "output view too small: {} < {}",
        out.nrows(),
        sequence.len()
    );
    for (row, &base) in sequence.iter().enumerate() {
        if let Some(idx) = base_index(base) {
            out[[row, idx]] = 1.0;
        }
    }
}

/// Decode by per-position argmax. All-zero rows decode to `N`.
pub fn one_hot_decode(encoded: &Array2<f32>) -> Vec<u8> {
    encoded
        .rows()
        .into_iter()
        .map(|row| {
            let mut best: Option<(usize, f32)> = None;
            for (idx, &value) in row.iter().enumerate() {
                if value > 0.0 && best.map_or(true, |(_, b)| value > b) {
                    best = Some((idx, value));
                }
            }
            best.map_or(b'N', |(idx, _)| decode_index(idx))
        })
        .collect()
}

/// Reverse complement of an encoded window: positions reversed and channels
/// mirrored (A<->T, C<->G), which keeps fractional allele splits intact.
pub fn reverse_complement_encoded(encoded: &Array2<f32>) -> Array2<f32> {
    encoded.slice(s![..;-1, ..;-1]).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_and_decode_roundtrip() {
        let seq = b"ACGTacgt";
        let encoded = one_hot_encode(seq);
        assert_eq!(encoded.dim(), (8, 4));
        assert_eq!(one_hot_decode(&encoded), b"ACGTACGT");
    }

    #[test]
    fn unknown_bases_are_zero() {
        let encoded = one_hot_encode(b"ANR-");
        for row in 1..4 {
            assert_eq!(encoded.row(row).sum(), 0.0);
        }
        assert_eq!(one_hot_decode(&encoded), b"ANNN");
    }

    #[test]
    fn reverse_complement_handles_case_and_ambiguity() {
        assert_eq!(reverse_complement(b"AACGTn"), b"nACGTT");
        assert_eq!(reverse_complement(b"AXG"), b"CNT");
    }

    #[test]
    fn encoded_reverse_complement_matches_sequence_reverse_complement() {
        let seq = b"AACGTTGCAN";
        let via_sequence = one_hot_encode(&reverse_complement(seq));
        let via_tensor = reverse_complement_encoded(&one_hot_encode(seq));
        assert_eq!(via_sequence, via_tensor);
    }
}
