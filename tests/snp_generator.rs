mod common;

use std::fs;
use std::sync::Arc;

use seqbatch::generator::{load_allele_table, BatchSource, GeneratorError};
use seqbatch::{InMemoryReference, SnpBatchGenerator, SnpGeneratorConfig};

use common::{decode_example, synthetic_contig};

const FLANK: u64 = 6;

fn allele_file(dir: &tempfile::TempDir, rows: &str) -> std::path::PathBuf {
    let path = dir.path().join("alleles.tsv");
    fs::write(&path, format!("CHR\tPOS\tref\talt\n{rows}")).unwrap();
    path
}

#[test]
fn swapping_columns_changes_only_the_site() {
    let dir = tempfile::tempdir().unwrap();
    let contig = synthetic_contig(64, 5);
    // 1-based positions 20 and 40.
    let ref20 = contig[19] as char;
    let ref40 = contig[39] as char;
    let path = allele_file(&dir, &format!("chr1\t20\t{ref20}\tT,G\nchr1\t40\t{ref40}\tC\n"));
    let reference = Arc::new(InMemoryReference::new().with_contig("chr1", &contig));

    let config = SnpGeneratorConfig::new(&path, "ref")
        .with_flank(FLANK)
        .with_batch_size(4)
        .with_expand_dims(false);
    let mut generator = SnpBatchGenerator::new(config, reference).expect("generator builds");
    assert_eq!(generator.len(), 1);
    assert_eq!(generator.label_columns().len(), 0);

    let reference_batch = generator.get_batch(0).unwrap();
    assert_eq!(reference_batch.inputs.shape(), &[2, 12, 4]);
    assert_eq!(reference_batch.labels.dim(), (2, 0));
    assert_eq!(reference_batch.positions[0].start, 19 - FLANK);
    assert_eq!(reference_batch.positions[0].end, 19 + FLANK);
    assert_eq!(decode_example(&reference_batch.inputs, 0), contig[13..25].to_vec());

    generator.set_allele_column("alt").unwrap();
    let alt_batch = generator.get_batch(0).unwrap();
    assert_eq!(alt_batch.positions, reference_batch.positions);
    let expected = [(0usize, b'T'), (1, b'C')];
    for (example, base) in expected {
        let before = decode_example(&reference_batch.inputs, example);
        let after = decode_example(&alt_batch.inputs, example);
        for offset in 0..before.len() {
            if offset == FLANK as usize {
                assert_eq!(after[offset], base);
            } else {
                assert_eq!(after[offset], before[offset]);
            }
        }
    }

    let err = generator.set_allele_column("missing").unwrap_err();
    assert!(matches!(err, GeneratorError::Config(_)));
}

#[test]
fn reverse_complement_halves_sites_per_batch() {
    let dir = tempfile::tempdir().unwrap();
    let contig = synthetic_contig(64, 6);
    let path = allele_file(&dir, "chr1\t20\tA\tC\nchr1\t30\tA\tC\nchr1\t40\tA\tC\n");
    let reference = Arc::new(InMemoryReference::new().with_contig("chr1", &contig));
    let config = SnpGeneratorConfig::new(&path, "alt")
        .with_flank(FLANK)
        .with_batch_size(4)
        .with_reverse_complement(true)
        .with_expand_dims(true);
    let generator = SnpBatchGenerator::new(config, reference).unwrap();

    assert_eq!(generator.len(), 2);
    assert_eq!(generator.get_batch(0).unwrap().inputs.shape(), &[4, 1, 12, 4]);
    assert_eq!(generator.get_batch(1).unwrap().inputs.shape(), &[2, 1, 12, 4]);
    assert!(matches!(
        generator.get_batch(2),
        Err(GeneratorError::OutOfRange { .. })
    ));
}

#[test]
fn site_near_contig_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = allele_file(&dir, "chr1\t3\tA\tC\n");
    let table = Arc::new(load_allele_table(&path).unwrap());
    let reference = Arc::new(InMemoryReference::new().with_contig("chr1", synthetic_contig(32, 7)));
    let config = SnpGeneratorConfig::new(&path, "alt").with_flank(FLANK);
    let generator = SnpBatchGenerator::from_table(config, table, reference).unwrap();

    match generator.get_batch(0).unwrap_err() {
        GeneratorError::SiteBounds { position, flank, .. } => {
            assert_eq!(position, 3);
            assert_eq!(flank, FLANK);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn zero_position_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let path = allele_file(&dir, "chr1\t0\tA\tC\n");
    assert!(load_allele_table(&path).is_err());
}
