mod common;

use std::sync::Arc;

use ndarray::s;
use seqbatch::genomics::{InMemoryVariants, VariantRecord};
use seqbatch::{
    BatchGenerator, GeneratorConfig, InMemoryReference, Interval, LabelTable, RegionIndex,
    SamplingMode, VariantEncoding,
};

use common::{decode_example, reference, single_task_index, synthetic_contig};

fn ordered(batch_size: usize) -> GeneratorConfig {
    GeneratorConfig::single("unused")
        .with_batch_size(batch_size)
        .with_mode(SamplingMode::Basic)
        .with_shuffle(false)
        .with_expand_dims(false)
        .with_reverse_complement(false)
        .with_seed(9)
}

#[test]
fn reverse_complement_doubles_inputs_and_labels() {
    let config = ordered(6).with_reverse_complement(true);
    let generator = BatchGenerator::from_index(config, single_task_index(2, 4, 10), reference(60), None)
        .expect("generator builds");
    let batch = generator.get_batch(0).expect("batch materializes");

    assert_eq!(batch.inputs.shape(), &[6, 10, 4]);
    assert_eq!(batch.labels.nrows(), 6);
    assert_eq!(batch.positions.len(), 6);
    for example in 0..3 {
        assert_eq!(batch.labels.row(example), batch.labels.row(example + 3));
        assert_eq!(batch.positions[example], batch.positions[example + 3]);
        let forward = decode_example(&batch.inputs, example);
        let reverse = decode_example(&batch.inputs, example + 3);
        assert_eq!(seqbatch::genomics::reverse_complement(&forward), reverse);
    }
}

#[test]
fn expand_dims_inserts_singleton_axis() {
    let config = ordered(2).with_expand_dims(true);
    let generator = BatchGenerator::from_index(config, single_task_index(1, 1, 10), reference(20), None)
        .expect("generator builds");
    let batch = generator.get_batch(0).expect("batch materializes");
    assert_eq!(batch.inputs.shape(), &[2, 1, 10, 4]);
}

#[test]
fn personal_snp_changes_only_its_offset() {
    let contig = synthetic_contig(20, 4);
    let original = contig[10];
    let alternate = if original == b'A' { "C" } else { "A" };
    let reference = Arc::new(InMemoryReference::new().with_contig("chr1", &contig));
    let variants = Arc::new(InMemoryVariants::new(vec![
        VariantRecord::new("chr1", 10, (original as char).to_string(), alternate, Some("1/1".into())),
        // Heterozygous and missing genotypes never qualify.
        VariantRecord::new("chr1", 3, (contig[3] as char).to_string(), "G", Some("0/1".into())),
        VariantRecord::new("chr1", 5, (contig[5] as char).to_string(), "G", None),
    ]));
    let table = LabelTable::new(
        vec!["task".into()],
        vec![Interval::new("chr1", 0, 20)],
        ndarray::array![[1.0]],
    )
    .unwrap();

    let config = ordered(1).with_variant_encoding(VariantEncoding::Personal);
    let generator =
        BatchGenerator::from_index(config, RegionIndex::Single(table), reference, Some(variants))
            .expect("generator builds");
    let decoded = decode_example(&generator.get_batch(0).unwrap().inputs, 0);

    let mut expected = contig.clone();
    expected[10] = alternate.as_bytes()[0];
    assert_eq!(decoded, expected);
}

#[test]
fn frequency_split_is_mirrored_on_the_complement() {
    let contig = synthetic_contig(16, 8);
    let offset = 5usize;
    let ref_base = contig[offset];
    let alt_base = if ref_base == b'G' { b'T' } else { b'G' };
    let reference = Arc::new(InMemoryReference::new().with_contig("chr1", &contig));
    let variants = Arc::new(InMemoryVariants::new(vec![VariantRecord::new(
        "chr1",
        offset as u64,
        (ref_base as char).to_string(),
        (alt_base as char).to_string(),
        None,
    )]));
    let table = LabelTable::new(
        vec!["task".into()],
        vec![Interval::new("chr1", 0, 16)],
        ndarray::array![[0.0]],
    )
    .unwrap();

    let config = ordered(2)
        .with_reverse_complement(true)
        .with_variant_encoding(VariantEncoding::Frequency);
    let generator =
        BatchGenerator::from_index(config, RegionIndex::Single(table), reference, Some(variants))
            .expect("generator builds");
    let inputs = generator.get_batch(0).unwrap().inputs;
    assert_eq!(inputs.shape(), &[2, 16, 4]);

    let channel = |base: u8| seqbatch::genomics::base_index(base).unwrap();
    for example in 0..2 {
        let window = inputs.slice(s![example, .., ..]);
        let site = if example == 0 { offset } else { 16 - 1 - offset };
        for position in 0..16 {
            assert_eq!(window.row(position).sum(), 1.0, "position {position}");
        }
        let halves: Vec<usize> = (0..4).filter(|&c| window[[site, c]] == 0.5).collect();
        let mut expected = if example == 0 {
            vec![channel(ref_base), channel(alt_base)]
        } else {
            vec![3 - channel(ref_base), 3 - channel(alt_base)]
        };
        expected.sort_unstable();
        assert_eq!(halves, expected);
    }
}

#[test]
fn shuffled_negatives_preserve_composition() {
    let config = ordered(4).with_mode(SamplingMode::ShuffledReferenceNegatives);
    let generator = BatchGenerator::from_index(config, single_task_index(3, 0, 12), reference(36), None)
        .expect("generator builds");
    assert_eq!(generator.len(), 2);
    let batch = generator.get_batch(0).unwrap();
    assert_eq!(batch.inputs.shape(), &[4, 12, 4]);
    assert_eq!(batch.labels.column(0).to_vec(), vec![1.0, 1.0, 0.0, 0.0]);
    for example in 0..2 {
        let mut original = decode_example(&batch.inputs, example);
        let mut shuffled = decode_example(&batch.inputs, example + 2);
        original.sort_unstable();
        shuffled.sort_unstable();
        assert_eq!(original, shuffled);
    }
}
