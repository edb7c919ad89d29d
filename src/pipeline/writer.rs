use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use ndarray::Array2;
use tracing::debug;

use crate::genomics::Interval;

use super::PipelineError;

/// Message consumed by a writer loop.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Rows to append, one per position.
    Data {
        /// Interval of every row.
        positions: Arc<[Interval]>,
        /// Values, `(rows, columns)`.
        values: Array2<f32>,
    },
    /// Stop the loop after everything already queued.
    Terminate,
}

/// Append-only tab-separated store.
///
/// The first append creates the file (truncating any earlier run) and writes
/// the `CHR START END <columns>` header; later appends add rows and flush.
#[derive(Debug)]
pub struct AppendStore {
    path: PathBuf,
    columns: Vec<String>,
    file: Option<BufWriter<File>>,
    rows: usize,
}

impl AppendStore {
    /// Store at `path` preferring `columns` as value column names.
    ///
    /// When the first frame's width disagrees with `columns`, generic
    /// `output_<i>` names are written instead.
    pub fn new(path: impl Into<PathBuf>, columns: Vec<String>) -> Self {
        Self {
            path: path.into(),
            columns,
            file: None,
            rows: 0,
        }
    }

    /// Output path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    fn create(&mut self, width: usize) -> io::Result<&mut BufWriter<File>> {
        if self.columns.len() != width {
            self.columns = (0..width).map(|i| format!("output_{i}")).collect();
        }
        let mut file = BufWriter::new(File::create(&self.path)?);
        write!(file, "CHR\tSTART\tEND")?;
        for column in &self.columns {
            write!(file, "\t{column}")?;
        }
        writeln!(file)?;
        Ok(self.file.insert(file))
    }

    /// Append one block of rows.
    pub fn append(&mut self, positions: &[Interval], values: &Array2<f32>) -> io::Result<()> {
        if positions.len() != values.nrows() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} positions for {} value rows",
                    positions.len(),
                    values.nrows()
                ),
            ));
        }
        let file = match self.file.take() {
            Some(file) => self.file.insert(file),
            None => self.create(values.ncols())?,
        };
        for (interval, row) in positions.iter().zip(values.outer_iter()) {
            write!(file, "{}\t{}\t{}", interval.chrom, interval.start, interval.end)?;
            for value in row {
                write!(file, "\t{value}")?;
            }
            writeln!(file)?;
        }
        file.flush()?;
        self.rows += positions.len();
        Ok(())
    }
}

/// Single-consumer loop: append every data frame until `Terminate` or until
/// every sender is gone. Returns the number of rows written.
pub(crate) fn writer_loop(
    mut store: AppendStore,
    frames: Receiver<Frame>,
) -> Result<usize, PipelineError> {
    for frame in frames.iter() {
        match frame {
            Frame::Data { positions, values } => {
                store
                    .append(&positions, &values)
                    .map_err(|source| PipelineError::Writer {
                        path: store.path().to_path_buf(),
                        source,
                    })?;
            }
            Frame::Terminate => break,
        }
    }
    debug!(path = %store.path().display(), rows = store.rows(), "writer finished");
    Ok(store.rows())
}
