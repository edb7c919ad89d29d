use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use rust_htslib::tbx::{self, Read as TbxRead};
use tracing::{debug, info};

use crate::genomics::Interval;

use super::{LabelError, LabelTable};

/// End coordinate used to fetch a whole contig from a tabix index.
const WHOLE_CONTIG_END: u64 = i32::MAX as u64;

/// Physical layout of a label file, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelFormat {
    /// bgzipped, tabix-indexed table (`.gz` / `.bgz`).
    Indexed,
    /// Plain tab-separated text with a header row.
    Delimited,
}

impl LabelFormat {
    /// Select the format from the file name.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") | Some("bgz") => Self::Indexed,
            _ => Self::Delimited,
        }
    }
}

/// Load a label table restricted to `chroms`, keeping only `tasks` when given.
///
/// The first three columns are always chromosome, start and end. Task
/// columns that are not requested are skipped without being parsed.
pub fn load_label_table(
    path: &Path,
    tasks: Option<&[String]>,
    chroms: Option<&[String]>,
) -> Result<LabelTable, LabelError> {
    let table = match LabelFormat::from_path(path) {
        LabelFormat::Indexed => load_indexed(path, tasks, chroms)?,
        LabelFormat::Delimited => load_delimited(path, tasks, chroms)?,
    };
    info!(
        path = %path.display(),
        rows = table.len(),
        tasks = table.width(),
        "loaded labels"
    );
    Ok(table)
}

/// Column selection resolved against a header.
struct ColumnPlan {
    names: Vec<String>,
    indices: Vec<usize>,
}

impl ColumnPlan {
    fn resolve(path: &Path, header: &[&str], tasks: Option<&[String]>) -> Result<Self, LabelError> {
        if header.len() < 3 {
            return Err(LabelError::Malformed {
                path: path.to_path_buf(),
                line: 1,
                message: "header needs chromosome, start and end columns".to_string(),
            });
        }
        let available = &header[3..];
        match tasks {
            None => Ok(Self {
                names: available.iter().map(|name| name.to_string()).collect(),
                indices: (3..header.len()).collect(),
            }),
            Some(tasks) => {
                let mut indices = Vec::with_capacity(tasks.len());
                let mut missing = Vec::new();
                for task in tasks {
                    match available.iter().position(|name| name == task) {
                        Some(pos) => indices.push(pos + 3),
                        None => missing.push(task.clone()),
                    }
                }
                if !missing.is_empty() {
                    return Err(LabelError::MissingTasks {
                        path: path.to_path_buf(),
                        missing,
                    });
                }
                Ok(Self {
                    names: tasks.to_vec(),
                    indices,
                })
            }
        }
    }
}

/// Accumulates parsed rows into a table.
struct RowSink<'a> {
    path: &'a Path,
    plan: ColumnPlan,
    intervals: Vec<Interval>,
    values: Vec<f32>,
}

impl<'a> RowSink<'a> {
    fn new(path: &'a Path, plan: ColumnPlan) -> Self {
        Self {
            path,
            plan,
            intervals: Vec::new(),
            values: Vec::new(),
        }
    }

    fn push(&mut self, line_no: usize, line: &str) -> Result<(), LabelError> {
        let fields: Vec<&str> = line.split('\t').collect();
        let malformed = |message: String| LabelError::Malformed {
            path: self.path.to_path_buf(),
            line: line_no,
            message,
        };
        if fields.len() < 3 {
            return Err(malformed(format!("expected at least 3 fields, found {}", fields.len())));
        }
        let start: u64 = fields[1]
            .trim()
            .parse()
            .map_err(|_| malformed(format!("invalid start '{}'", fields[1])))?;
        let end: u64 = fields[2]
            .trim()
            .parse()
            .map_err(|_| malformed(format!("invalid end '{}'", fields[2])))?;
        for &idx in &self.plan.indices {
            let raw = fields
                .get(idx)
                .ok_or_else(|| malformed(format!("missing column {}", idx + 1)))?;
            let value: f32 = raw
                .trim()
                .parse()
                .map_err(|_| malformed(format!("invalid label '{raw}'")))?;
            self.values.push(value);
        }
        self.intervals.push(Interval::new(fields[0], start, end));
        Ok(())
    }

    fn finish(self) -> Result<LabelTable, LabelError> {
        let shape = (self.intervals.len(), self.plan.names.len());
        let values = Array2::from_shape_vec(shape, self.values).map_err(|_| LabelError::Shape {
            rows: shape.0,
            columns: shape.1,
            actual: shape,
        })?;
        LabelTable::new(self.plan.names, self.intervals, values)
    }
}

fn io_error(path: &Path, err: std::io::Error) -> LabelError {
    LabelError::Io {
        path: path.to_path_buf(),
        source: err,
    }
}

fn load_delimited(
    path: &Path,
    tasks: Option<&[String]>,
    chroms: Option<&[String]>,
) -> Result<LabelTable, LabelError> {
    let file = File::open(path).map_err(|err| io_error(path, err))?;
    let mut lines = BufReader::new(file).lines();
    let header = match lines.next() {
        Some(line) => line.map_err(|err| io_error(path, err))?,
        None => {
            return Err(LabelError::Malformed {
                path: path.to_path_buf(),
                line: 1,
                message: "empty label file".to_string(),
            })
        }
    };
    let header_fields: Vec<&str> = header.trim_end().split('\t').collect();
    let plan = ColumnPlan::resolve(path, &header_fields, tasks)?;
    let allowed: Option<HashSet<&str>> =
        chroms.map(|chroms| chroms.iter().map(String::as_str).collect());

    let mut sink = RowSink::new(path, plan);
    for (idx, line) in lines.enumerate() {
        let line = line.map_err(|err| io_error(path, err))?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(allowed) = &allowed {
            let chrom = line.split('\t').next().unwrap_or_default();
            if !allowed.contains(chrom) {
                continue;
            }
        }
        sink.push(idx + 2, line)?;
    }
    sink.finish()
}

fn load_indexed(
    path: &Path,
    tasks: Option<&[String]>,
    chroms: Option<&[String]>,
) -> Result<LabelTable, LabelError> {
    let open_error = |message: String| LabelError::Index {
        path: PathBuf::from(path),
        message,
    };
    let mut reader = tbx::Reader::from_path(path).map_err(|err| open_error(err.to_string()))?;

    let header_line = reader
        .header()
        .last()
        .cloned()
        .ok_or_else(|| open_error("missing '#' column header".to_string()))?;
    let header_line = header_line.trim_start_matches('#').trim_end().to_string();
    let header_fields: Vec<&str> = header_line.split('\t').collect();
    let plan = ColumnPlan::resolve(path, &header_fields, tasks)?;

    let seqnames = reader.seqnames();
    let selected: Vec<String> = match chroms {
        Some(chroms) => seqnames
            .into_iter()
            .filter(|name| chroms.iter().any(|chrom| chrom == name))
            .collect(),
        None => seqnames,
    };
    debug!(path = %path.display(), contigs = selected.len(), "fetching indexed labels");

    let mut sink = RowSink::new(path, plan);
    let mut line_no = 0usize;
    for contig in &selected {
        let tid = reader.tid(contig).map_err(|err| open_error(err.to_string()))?;
        reader
            .fetch(tid, 0, WHOLE_CONTIG_END)
            .map_err(|err| open_error(err.to_string()))?;
        for record in reader.records() {
            let record = record.map_err(|err| open_error(err.to_string()))?;
            line_no += 1;
            let line = String::from_utf8_lossy(&record);
            sink.push(line_no, line.trim_end())?;
        }
    }
    sink.finish()
}
