use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rust_htslib::faidx;
use thiserror::Error;

/// Errors raised while fetching reference bases.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// The indexed FASTA could not be opened.
    #[error("failed to open reference {path}: {message}")]
    Open {
        /// Path that was requested.
        path: PathBuf,
        /// Underlying htslib message.
        message: String,
    },
    /// Fetch failed (unknown contig or coordinates past the contig end).
    #[error("failed to fetch {chrom}:{start}-{end}: {message}")]
    Fetch {
        /// Contig name.
        chrom: String,
        /// Requested start.
        start: u64,
        /// Requested end.
        end: u64,
        /// Underlying message.
        message: String,
    },
}

/// Random-access fetch of reference bases for one caller.
pub trait SequenceFetcher {
    /// Bases of the half-open range `[start, end)`.
    fn fetch(&mut self, chrom: &str, start: u64, end: u64) -> Result<Vec<u8>, ReferenceError>;
}

/// Factory for per-call reference handles.
///
/// Each materialization call opens its own handle and drops it when done, so no
/// handle is ever shared between threads.
pub trait ReferenceSource: Send + Sync {
    /// Open a fresh handle owned by the caller.
    fn open(&self) -> Result<Box<dyn SequenceFetcher + '_>, ReferenceError>;
}

/// Indexed FASTA on disk (requires a `.fai` next to it).
#[derive(Debug, Clone)]
pub struct FastaReference {
    path: PathBuf,
}

impl FastaReference {
    /// Reference backed by `path`; the file is only opened per fetch call.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the FASTA file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct FaidxFetcher {
    reader: faidx::Reader,
}

impl SequenceFetcher for FaidxFetcher {
    fn fetch(&mut self, chrom: &str, start: u64, end: u64) -> Result<Vec<u8>, ReferenceError> {
        if end <= start {
            return Ok(Vec::new());
        }
        // faidx takes an inclusive end coordinate.
        let bases = self
            .reader
            .fetch_seq_string(chrom, start as usize, (end - 1) as usize)
            .map_err(|err| ReferenceError::Fetch {
                chrom: chrom.to_string(),
                start,
                end,
                message: err.to_string(),
            })?;
        let bases = bases.into_bytes();
        if bases.len() as u64 != end - start {
            return Err(ReferenceError::Fetch {
                chrom: chrom.to_string(),
                start,
                end,
                message: format!("returned {} bases", bases.len()),
            });
        }
        Ok(bases)
    }
}

impl ReferenceSource for FastaReference {
    fn open(&self) -> Result<Box<dyn SequenceFetcher + '_>, ReferenceError> {
        let reader = faidx::Reader::from_path(&self.path).map_err(|err| ReferenceError::Open {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        Ok(Box::new(FaidxFetcher { reader }))
    }
}

/// Reference held fully in memory, keyed by contig name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReference {
    contigs: HashMap<Arc<str>, Arc<[u8]>>,
}

impl InMemoryReference {
    /// Create an empty reference.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a contig.
    pub fn with_contig(mut self, name: impl Into<Arc<str>>, bases: impl AsRef<[u8]>) -> Self {
        self.insert(name, bases);
        self
    }

    /// Add (or replace) a contig in place.
    pub fn insert(&mut self, name: impl Into<Arc<str>>, bases: impl AsRef<[u8]>) {
        self.contigs
            .insert(name.into(), Arc::from(bases.as_ref().to_vec().into_boxed_slice()));
    }

    /// Parse a plain FASTA string (`>name` headers, wrapped sequence lines).
    pub fn from_fasta_str(contents: &str) -> Self {
        let mut reference = Self::new();
        let mut name: Option<String> = None;
        let mut bases = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if let Some(header) = line.strip_prefix('>') {
                if let Some(previous) = name.take() {
                    reference.insert(previous, std::mem::take(&mut bases));
                }
                name = header.split_whitespace().next().map(str::to_string);
            } else if !line.is_empty() {
                bases.extend_from_slice(line.as_bytes());
            }
        }
        if let Some(previous) = name {
            reference.insert(previous, bases);
        }
        reference
    }
}

impl SequenceFetcher for &InMemoryReference {
    fn fetch(&mut self, chrom: &str, start: u64, end: u64) -> Result<Vec<u8>, ReferenceError> {
        let contig = self.contigs.get(chrom).ok_or_else(|| ReferenceError::Fetch {
            chrom: chrom.to_string(),
            start,
            end,
            message: "unknown contig".to_string(),
        })?;
        let (lo, hi) = (start as usize, end as usize);
        if lo > hi || hi > contig.len() {
            return Err(ReferenceError::Fetch {
                chrom: chrom.to_string(),
                start,
                end,
                message: format!("contig length is {}", contig.len()),
            });
        }
        Ok(contig[lo..hi].to_vec())
    }
}

impl ReferenceSource for InMemoryReference {
    fn open(&self) -> Result<Box<dyn SequenceFetcher + '_>, ReferenceError> {
        Ok(Box::new(self))
    }
}
