use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use tracing::info;

use crate::genomics::{reverse_complement, Interval, ReferenceSource};
use crate::labels::LabelError;
use crate::materialize::encode_batch;

use super::{Batch, BatchSource, GeneratorError};

/// Sites with one or more named allele columns.
///
/// The first two columns are chromosome and 1-based position; every further
/// column holds an allele (or a comma list whose first entry is used).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlleleTable {
    columns: Vec<String>,
    sites: Vec<(Arc<str>, u64)>,
    alleles: Vec<Vec<String>>,
}

impl AlleleTable {
    /// Allele column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of sites.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Returns `true` when the table holds no sites.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Site `row` as `(chrom, 1-based position)`.
    pub fn site(&self, row: usize) -> Option<(&Arc<str>, u64)> {
        self.sites.get(row).map(|(chrom, pos)| (chrom, *pos))
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Active allele of `row` in `column`: the first entry of a comma list.
    pub fn allele(&self, column: usize, row: usize) -> Option<&str> {
        let raw = self.alleles.get(column)?.get(row)?;
        raw.split(',').next()
    }
}

/// Read a tab-separated allele table with a header row.
pub fn load_allele_table(path: &Path) -> Result<AlleleTable, LabelError> {
    let io_error = |source: std::io::Error| LabelError::Io {
        path: path.to_path_buf(),
        source,
    };
    let malformed = |line: usize, message: String| LabelError::Malformed {
        path: path.to_path_buf(),
        line,
        message,
    };

    let mut lines = BufReader::new(File::open(path).map_err(io_error)?).lines();
    let header = lines
        .next()
        .transpose()
        .map_err(io_error)?
        .ok_or_else(|| malformed(1, "empty allele table".to_string()))?;
    let header: Vec<&str> = header.trim_end().split('\t').collect();
    if header.len() < 3 {
        return Err(malformed(
            1,
            "header needs chromosome, position and at least one allele column".to_string(),
        ));
    }

    let mut table = AlleleTable {
        columns: header[2..].iter().map(|name| name.to_string()).collect(),
        sites: Vec::new(),
        alleles: vec![Vec::new(); header.len() - 2],
    };
    for (idx, line) in lines.enumerate() {
        let line = line.map_err(io_error)?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let line_no = idx + 2;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != header.len() {
            return Err(malformed(
                line_no,
                format!("expected {} fields, found {}", header.len(), fields.len()),
            ));
        }
        let position: u64 = fields[1]
            .trim()
            .parse()
            .map_err(|_| malformed(line_no, format!("invalid position '{}'", fields[1])))?;
        if position == 0 {
            return Err(malformed(line_no, "positions are 1-based".to_string()));
        }
        table.sites.push((Arc::from(fields[0]), position));
        for (column, value) in table.alleles.iter_mut().zip(&fields[2..]) {
            column.push(value.trim().to_string());
        }
    }
    info!(
        path = %path.display(),
        sites = table.len(),
        alleles = table.columns.len(),
        "loaded allele table"
    );
    Ok(table)
}

/// Construction parameters for [`SnpBatchGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnpGeneratorConfig {
    /// Allele table location.
    pub path: PathBuf,
    /// Allele column written into the windows.
    pub allele_column: String,
    /// Bases on each side of the site; windows have length `2 * flank`.
    pub flank: u64,
    /// Nominal batch size.
    pub batch_size: usize,
    /// Append reverse complements.
    pub reverse_complement: bool,
    /// Insert a singleton axis into the input tensor.
    pub expand_dims: bool,
}

impl SnpGeneratorConfig {
    /// Defaults for scoring `allele_column` of the table at `path`.
    pub fn new(path: impl Into<PathBuf>, allele_column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            allele_column: allele_column.into(),
            flank: 500,
            batch_size: 128,
            reverse_complement: false,
            expand_dims: true,
        }
    }

    /// Set the flank size.
    pub fn with_flank(mut self, flank: u64) -> Self {
        self.flank = flank;
        self
    }

    /// Set the nominal batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Toggle reverse-complement augmentation.
    pub fn with_reverse_complement(mut self, enabled: bool) -> Self {
        self.reverse_complement = enabled;
        self
    }

    /// Toggle the singleton input axis.
    pub fn with_expand_dims(mut self, enabled: bool) -> Self {
        self.expand_dims = enabled;
        self
    }
}

/// Windows centred on fixed sites with a chosen allele written in.
pub struct SnpBatchGenerator {
    table: Arc<AlleleTable>,
    active: usize,
    flank: u64,
    batch_size: usize,
    reverse_complement: bool,
    expand_dims: bool,
    reference: Arc<dyn ReferenceSource>,
}

impl std::fmt::Debug for SnpBatchGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnpBatchGenerator")
            .field("sites", &self.table.len())
            .field("allele_column", &self.table.columns.get(self.active))
            .field("flank", &self.flank)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl SnpBatchGenerator {
    /// Load the allele table and build the generator.
    pub fn new(
        config: SnpGeneratorConfig,
        reference: Arc<dyn ReferenceSource>,
    ) -> Result<Self, GeneratorError> {
        let table = load_allele_table(&config.path)?;
        Self::from_table(config, Arc::new(table), reference)
    }

    /// Build the generator over an already loaded table.
    ///
    /// Tables are shared so per-worker generators do not reload them.
    pub fn from_table(
        config: SnpGeneratorConfig,
        table: Arc<AlleleTable>,
        reference: Arc<dyn ReferenceSource>,
    ) -> Result<Self, GeneratorError> {
        let divisor = if config.reverse_complement { 2 } else { 1 };
        if config.batch_size == 0 || config.batch_size % divisor != 0 {
            return Err(GeneratorError::Config(format!(
                "batch size {} must be a positive multiple of {divisor}",
                config.batch_size
            )));
        }
        if config.flank == 0 {
            return Err(GeneratorError::Config("flank must be > 0".to_string()));
        }
        let mut generator = Self {
            table,
            active: 0,
            flank: config.flank,
            batch_size: config.batch_size / divisor,
            reverse_complement: config.reverse_complement,
            expand_dims: config.expand_dims,
            reference,
        };
        generator.set_allele_column(&config.allele_column)?;
        Ok(generator)
    }

    /// Switch the allele written into every window.
    ///
    /// Coordinates never change, so predictions from successive columns line
    /// up row for row.
    pub fn set_allele_column(&mut self, name: &str) -> Result<(), GeneratorError> {
        self.active = self.table.column_index(name).ok_or_else(|| {
            GeneratorError::Config(format!(
                "allele column '{name}' not in {:?}",
                self.table.columns()
            ))
        })?;
        Ok(())
    }

    /// Currently active allele column.
    pub fn allele_column(&self) -> &str {
        &self.table.columns[self.active]
    }

    /// Shared allele table.
    pub fn table(&self) -> &Arc<AlleleTable> {
        &self.table
    }

    /// Batches needed to cover every site.
    pub fn len(&self) -> usize {
        (self.table.len() + self.batch_size - 1) / self.batch_size
    }

    /// Returns `true` when there are no sites.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Window for site `row`, `[pos - 1 - flank, pos - 1 + flank)`.
    fn window(&self, row: usize) -> Result<Interval, GeneratorError> {
        let out_of_range = GeneratorError::OutOfRange {
            index: row,
            len: self.table.len(),
        };
        let (chrom, position) = self.table.site(row).ok_or(out_of_range)?;
        let site = position - 1;
        if site < self.flank {
            return Err(GeneratorError::SiteBounds {
                chrom: chrom.clone(),
                position,
                flank: self.flank,
            });
        }
        Ok(Interval::new(chrom.clone(), site - self.flank, site + self.flank))
    }

    /// Materialize batch `index` with the active allele spliced in at offset
    /// `flank`; labels have zero columns.
    pub fn get_batch(&self, index: usize) -> Result<Batch, GeneratorError> {
        let lo = index * self.batch_size;
        if lo >= self.table.len() {
            return Err(GeneratorError::OutOfRange {
                index,
                len: self.len(),
            });
        }
        let hi = (lo + self.batch_size).min(self.table.len());
        let width = (2 * self.flank) as usize;

        let mut reference = self.reference.open()?;
        let mut positions = Vec::with_capacity(hi - lo);
        let mut sequences = Vec::with_capacity(hi - lo);
        for row in lo..hi {
            let window = self.window(row)?;
            let mut bases = reference.fetch(&window.chrom, window.start, window.end)?;
            let allele = self.table.allele(self.active, row).unwrap_or_default();
            splice_allele(&mut bases, self.flank as usize, allele.as_bytes());
            sequences.push(bases);
            positions.push(window);
        }
        if self.reverse_complement {
            let complemented: Vec<Vec<u8>> =
                sequences.iter().map(|seq| reverse_complement(seq)).collect();
            sequences.extend(complemented);
            positions.extend_from_within(..);
        }

        Ok(Batch {
            inputs: encode_batch(&sequences, width, self.expand_dims),
            labels: Array2::zeros((positions.len(), 0)),
            positions,
        })
    }
}

/// Overwrite `bases[offset..]` with `allele`, keeping the window length.
fn splice_allele(bases: &mut [u8], offset: usize, allele: &[u8]) {
    for (slot, &base) in bases.iter_mut().skip(offset).zip(allele) {
        *slot = base;
    }
}

impl BatchSource for SnpBatchGenerator {
    fn len(&self) -> usize {
        SnpBatchGenerator::len(self)
    }

    fn get_batch(&self, index: usize) -> Result<Batch, GeneratorError> {
        SnpBatchGenerator::get_batch(self, index)
    }

    fn label_columns(&self) -> &[String] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_keeps_length() {
        let mut bases = b"AAAAAA".to_vec();
        splice_allele(&mut bases, 4, b"CGT");
        assert_eq!(bases, b"AAAACG");
    }

    #[test]
    fn comma_list_uses_first_allele() {
        let table = AlleleTable {
            columns: vec!["alt".into()],
            sites: vec![(Arc::from("chr1"), 5)],
            alleles: vec![vec!["G,T".into()]],
        };
        assert_eq!(table.allele(0, 0), Some("G"));
        assert_eq!(table.allele(1, 0), None);
    }
}
