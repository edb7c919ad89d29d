//! Label tables and the region index built on top of them.

mod index;
mod loader;
mod table;

use std::path::PathBuf;

use thiserror::Error;

pub use index::{RegionIndex, RowSource};
pub use loader::{load_label_table, LabelFormat};
pub use table::{write_class_weights, LabelTable};

/// Errors raised while loading or assembling label tables.
#[derive(Debug, Error)]
pub enum LabelError {
    /// The file could not be read.
    #[error("failed to read labels from {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The tabix index or its records could not be read.
    #[error("failed to read indexed labels from {path}: {message}")]
    Index {
        /// Path that failed.
        path: PathBuf,
        /// Underlying htslib message.
        message: String,
    },
    /// Requested task columns are absent from the header.
    #[error("tasks {missing:?} not found in {path}")]
    MissingTasks {
        /// Path that was loaded.
        path: PathBuf,
        /// Task names that were not found.
        missing: Vec<String>,
    },
    /// A row could not be parsed.
    #[error("{path}:{line}: {message}")]
    Malformed {
        /// Path that was loaded.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },
    /// Label matrix does not match the interval/column counts.
    #[error("label matrix has shape {actual:?}, expected ({rows}, {columns})")]
    Shape {
        /// Expected row count.
        rows: usize,
        /// Expected column count.
        columns: usize,
        /// Actual `(rows, columns)`.
        actual: (usize, usize),
    },
}
