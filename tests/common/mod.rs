//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array2, ArrayD, Ix2};
use seqbatch::genomics::{one_hot_decode, InMemoryReference};
use seqbatch::{Interval, LabelTable, RegionIndex};

/// Deterministic pseudo-random contig of `len` bases.
pub fn synthetic_contig(len: usize, salt: u64) -> Vec<u8> {
    let mut state = 0x9E37_79B9_7F4A_7C15u64 ^ salt;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            b"ACGT"[(state % 4) as usize]
        })
        .collect()
}

/// Reference with a single synthetic `chr1`.
pub fn reference(len: usize) -> Arc<InMemoryReference> {
    Arc::new(InMemoryReference::new().with_contig("chr1", synthetic_contig(len, 1)))
}

/// Back-to-back windows of `width` bases on `chr1`.
pub fn windows(count: usize, width: u64) -> Vec<Interval> {
    (0..count as u64)
        .map(|i| Interval::new("chr1", i * width, (i + 1) * width))
        .collect()
}

/// Single-task table: the first `positives` rows are labelled 1.
pub fn single_task_index(positives: usize, negatives: usize, width: u64) -> RegionIndex {
    let total = positives + negatives;
    let values = Array2::from_shape_fn((total, 1), |(row, _)| if row < positives { 1.0 } else { 0.0 });
    let table = LabelTable::new(vec!["task".into()], windows(total, width), values)
        .expect("shape matches");
    RegionIndex::Single(table)
}

/// Write a tab-separated label file into `dir`.
pub fn write_labels(dir: &Path, name: &str, header: &[&str], rows: &[(&str, u64, u64, &[f32])]) -> PathBuf {
    let mut contents = header.join("\t");
    contents.push('\n');
    for (chrom, start, end, values) in rows {
        contents.push_str(&format!("{chrom}\t{start}\t{end}"));
        for value in values.iter() {
            contents.push_str(&format!("\t{value}"));
        }
        contents.push('\n');
    }
    let path = dir.join(name);
    fs::write(&path, contents).expect("write label file");
    path
}

/// Decode example `example` of an `(n, L, 4)` tensor.
pub fn decode_example(inputs: &ArrayD<f32>, example: usize) -> Vec<u8> {
    let view = inputs
        .index_axis(ndarray::Axis(0), example)
        .into_dimensionality::<Ix2>()
        .expect("rank-3 inputs");
    one_hot_decode(&view.to_owned())
}

/// Byte fingerprint of a tensor for determinism checks.
pub fn fingerprint(inputs: &ArrayD<f32>, labels: &Array2<f32>) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for value in inputs.iter().chain(labels.iter()) {
        hasher.update(&value.to_le_bytes());
    }
    hasher.finalize()
}
