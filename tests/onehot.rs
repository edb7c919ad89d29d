use proptest::prelude::*;
use seqbatch::genomics::{
    dinucleotide_shuffle, one_hot_decode, one_hot_encode, reverse_complement,
    reverse_complement_encoded,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use test_case::test_case;

fn acgt() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(prop_oneof![Just(b'A'), Just(b'C'), Just(b'G'), Just(b'T')], 1..128)
}

#[test_case(b'A' => vec![1.0, 0.0, 0.0, 0.0])]
#[test_case(b'c' => vec![0.0, 1.0, 0.0, 0.0])]
#[test_case(b'G' => vec![0.0, 0.0, 1.0, 0.0])]
#[test_case(b't' => vec![0.0, 0.0, 0.0, 1.0])]
#[test_case(b'N' => vec![0.0, 0.0, 0.0, 0.0])]
#[test_case(b'-' => vec![0.0, 0.0, 0.0, 0.0])]
fn single_base_encoding(base: u8) -> Vec<f32> {
    one_hot_encode(&[base]).row(0).to_vec()
}

proptest! {
    #[test]
    fn known_bases_round_trip(seq in acgt()) {
        let encoded = one_hot_encode(&seq);
        prop_assert!(encoded.rows().into_iter().all(|row| row.sum() == 1.0));
        prop_assert_eq!(one_hot_decode(&encoded), seq);
    }

    #[test]
    fn tensor_and_sequence_complements_agree(seq in acgt()) {
        prop_assert_eq!(
            reverse_complement_encoded(&one_hot_encode(&seq)),
            one_hot_encode(&reverse_complement(&seq))
        );
    }

    #[test]
    fn dinucleotide_shuffle_keeps_pair_counts(seq in acgt(), seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let shuffled = dinucleotide_shuffle(&seq, &mut rng);
        let pairs = |s: &[u8]| {
            let mut pairs: Vec<(u8, u8)> = s.windows(2).map(|w| (w[0], w[1])).collect();
            pairs.sort_unstable();
            pairs
        };
        prop_assert_eq!(shuffled.len(), seq.len());
        prop_assert_eq!(shuffled.first(), seq.first());
        prop_assert_eq!(shuffled.last(), seq.last());
        prop_assert_eq!(pairs(&shuffled), pairs(&seq));
    }
}
