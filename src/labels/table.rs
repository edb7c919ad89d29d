use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use ndarray::{Array2, ArrayView1, Axis};

use crate::genomics::Interval;

use super::LabelError;

/// Ordered mapping from interval to a fixed-width label row.
#[derive(Debug, Clone)]
pub struct LabelTable {
    columns: Arc<[String]>,
    intervals: Vec<Interval>,
    values: Array2<f32>,
    lookup: HashMap<Interval, usize>,
}

impl LabelTable {
    /// Build a table; `values` must have one row per interval and one column per name.
    pub fn new(
        columns: Vec<String>,
        intervals: Vec<Interval>,
        values: Array2<f32>,
    ) -> Result<Self, LabelError> {
        if values.nrows() != intervals.len() || values.ncols() != columns.len() {
            return Err(LabelError::Shape {
                rows: intervals.len(),
                columns: columns.len(),
                actual: values.dim(),
            });
        }
        let lookup = intervals
            .iter()
            .enumerate()
            .map(|(row, interval)| (interval.clone(), row))
            .collect();
        Ok(Self {
            columns: Arc::from(columns),
            intervals,
            values,
            lookup,
        })
    }

    /// Table holding only coordinates (zero label columns).
    pub fn positions_only(intervals: Vec<Interval>) -> Self {
        let values = Array2::zeros((intervals.len(), 0));
        let lookup = intervals
            .iter()
            .enumerate()
            .map(|(row, interval)| (interval.clone(), row))
            .collect();
        Self {
            columns: Arc::from(Vec::<String>::new()),
            intervals,
            values,
            lookup,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Returns `true` when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Task column names in their fixed order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of task columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// All intervals in row order.
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// The full label matrix.
    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// Interval of a row.
    pub fn interval(&self, row: usize) -> Option<&Interval> {
        self.intervals.get(row)
    }

    /// Label row by position.
    pub fn row(&self, row: usize) -> Option<ArrayView1<'_, f32>> {
        (row < self.len()).then(|| self.values.row(row))
    }

    /// Row number of an interval.
    pub fn position_of(&self, interval: &Interval) -> Option<usize> {
        self.lookup.get(interval).copied()
    }

    /// Rows with at least one positive task (`> 0`).
    pub fn positive_rows(&self) -> Vec<usize> {
        self.values
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| row.iter().any(|&v| v > 0.0))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Rows where every task is below 1.
    pub fn negative_rows(&self) -> Vec<usize> {
        self.values
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| row.iter().all(|&v| v < 1.0))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Per-task inverse class frequencies `(w1, w0)`.
    ///
    /// `w1[t] = rows / #(value == 1)` and `w0[t] = rows / #(value == 0)`; a
    /// task without any such value gets `0.0`.
    pub fn class_weights(&self) -> (Vec<f32>, Vec<f32>) {
        let rows = self.len() as f32;
        let weight = |count: usize| if count == 0 { 0.0 } else { rows / count as f32 };
        self.values
            .axis_iter(Axis(1))
            .map(|column| {
                let ones = column.iter().filter(|&&v| v == 1.0).count();
                let zeros = column.iter().filter(|&&v| v == 0.0).count();
                (weight(ones), weight(zeros))
            })
            .unzip()
    }

    /// Concatenate `other` below this table, zero-filling its labels to this
    /// table's width.
    pub fn concat_zero_filled(&self, other: &LabelTable) -> LabelTable {
        let mut values = Array2::zeros((self.len() + other.len(), self.width()));
        values
            .slice_mut(ndarray::s![..self.len(), ..])
            .assign(&self.values);
        let intervals = self
            .intervals
            .iter()
            .chain(other.intervals.iter())
            .cloned()
            .collect();
        let lookup = self
            .lookup
            .iter()
            .map(|(k, &v)| (k.clone(), v))
            .chain(
                other
                    .intervals
                    .iter()
                    .enumerate()
                    .map(|(row, interval)| (interval.clone(), row + self.len())),
            )
            .collect();
        LabelTable {
            columns: Arc::clone(&self.columns),
            intervals,
            values,
            lookup,
        }
    }
}

/// Write class weights as an argument file: `--w1 a b \` then `--w0 c d`.
pub fn write_class_weights<W: Write>(writer: &mut W, w1: &[f32], w0: &[f32]) -> std::io::Result<()> {
    write!(writer, "--w1")?;
    for weight in w1 {
        write!(writer, " {weight}")?;
    }
    write!(writer, " \\\n--w0")?;
    for weight in w0 {
        write!(writer, " {weight}")?;
    }
    writeln!(writer)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn table() -> LabelTable {
        LabelTable::new(
            vec!["t1".into(), "t2".into()],
            vec![
                Interval::new("chr1", 0, 10),
                Interval::new("chr1", 10, 20),
                Interval::new("chr1", 20, 30),
                Interval::new("chr1", 30, 40),
            ],
            array![[1.0, 0.0], [0.0, 0.0], [0.0, 1.0], [1.0, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn class_partition() {
        let table = table();
        assert_eq!(table.positive_rows(), vec![0, 2, 3]);
        assert_eq!(table.negative_rows(), vec![1]);
        assert_eq!(table.position_of(&Interval::new("chr1", 20, 30)), Some(2));
    }

    #[test]
    fn class_weights_are_inverse_frequencies() {
        let (w1, w0) = table().class_weights();
        assert_eq!(w1, vec![2.0, 4.0]);
        assert_eq!(w0, vec![2.0, 4.0 / 3.0]);

        let mut out = Vec::new();
        write_class_weights(&mut out, &[2.0], &[4.0]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "--w1 2 \\\n--w0 4\n");
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let err = LabelTable::new(
            vec!["t1".into()],
            vec![Interval::new("chr1", 0, 1)],
            Array2::zeros((2, 1)),
        );
        assert!(matches!(err, Err(LabelError::Shape { .. })));
    }

    #[test]
    fn zero_filled_concatenation() {
        let negatives = LabelTable::positions_only(vec![Interval::new("chr2", 0, 10)]);
        let merged = table().concat_zero_filled(&negatives);
        assert_eq!(merged.len(), 5);
        assert_eq!(merged.row(4).unwrap().to_vec(), vec![0.0, 0.0]);
        assert_eq!(merged.position_of(&Interval::new("chr2", 0, 10)), Some(4));
    }
}
