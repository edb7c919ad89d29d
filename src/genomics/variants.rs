use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use rust_htslib::tbx::{self, Read as TbxRead};
use thiserror::Error;

use super::{Interval, VariantRecord};

/// How qualifying variants are written into a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VariantEncoding {
    /// Hard substitution of homozygous-alternate SNPs for a single sample.
    Personal,
    /// 0.5/0.5 reference/alternate channel split for every SNP.
    Frequency,
}

impl FromStr for VariantEncoding {
    type Err = VariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(Self::Personal),
            "freq" | "frequency" => Ok(Self::Frequency),
            other => Err(VariantError::UnknownEncoding(other.to_string())),
        }
    }
}

/// Errors from variant sources.
#[derive(Debug, Error)]
pub enum VariantError {
    /// The tabix-indexed file could not be opened.
    #[error("failed to open variant file {path}: {message}")]
    Open {
        /// Requested path.
        path: PathBuf,
        /// Underlying htslib message.
        message: String,
    },
    /// Region query failed.
    #[error("variant query {interval} failed: {message}")]
    Query {
        /// Window being queried.
        interval: Interval,
        /// Underlying message.
        message: String,
    },
    /// A record could not be parsed.
    #[error("malformed variant record: {0}")]
    Malformed(String),
    /// Unrecognised encoding name.
    #[error("unknown variant encoding '{0}' (expected 'personal' or 'freq')")]
    UnknownEncoding(String),
}

/// Interval-queryable variant store for one caller.
pub trait VariantLookup {
    /// Records whose 0-based position lies in `[start, end]` of the interval.
    fn query(&mut self, interval: &Interval) -> Result<Vec<VariantRecord>, VariantError>;
}

/// Factory for per-call variant handles.
pub trait VariantSource: Send + Sync {
    /// Open a fresh handle owned by the caller.
    fn open(&self) -> Result<Box<dyn VariantLookup + '_>, VariantError>;
}

/// Parse one VCF data line.
///
/// `POS` is converted to 0-based; the genotype is the first `:` field of the
/// first sample column when one exists.
pub fn parse_vcf_line(line: &str) -> Result<VariantRecord, VariantError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 5 {
        return Err(VariantError::Malformed(line.to_string()));
    }
    let pos: u64 = fields[1]
        .parse()
        .map_err(|_| VariantError::Malformed(line.to_string()))?;
    if pos == 0 {
        return Err(VariantError::Malformed(line.to_string()));
    }
    let genotype = fields
        .get(9)
        .and_then(|sample| sample.split(':').next())
        .filter(|gt| !gt.is_empty())
        .map(str::to_string);
    Ok(VariantRecord::new(
        fields[0],
        pos - 1,
        fields[3],
        fields[4],
        genotype,
    ))
}

/// bgzipped VCF with a tabix index.
#[derive(Debug, Clone)]
pub struct TabixVariants {
    path: PathBuf,
}

impl TabixVariants {
    /// Variant file at `path` (the `.tbi` must sit next to it).
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

struct TabixLookup {
    reader: tbx::Reader,
}

impl VariantLookup for TabixLookup {
    fn query(&mut self, interval: &Interval) -> Result<Vec<VariantRecord>, VariantError> {
        // Contigs absent from the index simply carry no variants.
        let tid = match self.reader.tid(&interval.chrom) {
            Ok(tid) => tid,
            Err(_) => return Ok(Vec::new()),
        };
        self.reader
            .fetch(tid, interval.start, interval.end + 1)
            .map_err(|err| VariantError::Query {
                interval: interval.clone(),
                message: err.to_string(),
            })?;

        let mut records = Vec::new();
        for raw in self.reader.records() {
            let raw = raw.map_err(|err| VariantError::Query {
                interval: interval.clone(),
                message: err.to_string(),
            })?;
            let line = String::from_utf8_lossy(&raw);
            let record = parse_vcf_line(line.trim_end())?;
            if interval.contains_closed(record.position) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl VariantSource for TabixVariants {
    fn open(&self) -> Result<Box<dyn VariantLookup + '_>, VariantError> {
        let reader = tbx::Reader::from_path(&self.path).map_err(|err| VariantError::Open {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        Ok(Box::new(TabixLookup { reader }))
    }
}

/// In-memory variant store, sorted per contig.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVariants {
    by_chrom: HashMap<Arc<str>, Vec<VariantRecord>>,
}

impl InMemoryVariants {
    /// Build from an arbitrary collection of records.
    pub fn new(records: impl IntoIterator<Item = VariantRecord>) -> Self {
        let mut by_chrom: HashMap<Arc<str>, Vec<VariantRecord>> = HashMap::new();
        for record in records {
            by_chrom
                .entry(Arc::clone(&record.chrom))
                .or_default()
                .push(record);
        }
        for records in by_chrom.values_mut() {
            records.sort_by_key(|record| record.position);
        }
        Self { by_chrom }
    }

    /// Parse VCF text (header lines starting with `#` are skipped).
    pub fn from_vcf_str(contents: &str) -> Result<Self, VariantError> {
        let records = contents
            .lines()
            .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
            .map(parse_vcf_line)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(records))
    }
}

impl VariantLookup for &InMemoryVariants {
    fn query(&mut self, interval: &Interval) -> Result<Vec<VariantRecord>, VariantError> {
        let Some(records) = self.by_chrom.get(&interval.chrom) else {
            return Ok(Vec::new());
        };
        let first = records.partition_point(|record| record.position < interval.start);
        Ok(records[first..]
            .iter()
            .take_while(|record| record.position <= interval.end)
            .cloned()
            .collect())
    }
}

impl VariantSource for InMemoryVariants {
    fn open(&self) -> Result<Box<dyn VariantLookup + '_>, VariantError> {
        Ok(Box::new(self))
    }
}
