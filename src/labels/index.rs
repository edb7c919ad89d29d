use ndarray::{Array2, ArrayView1};

use crate::genomics::Interval;

use super::LabelTable;

/// Which physical table an index resolves into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSource {
    /// The single table, or the nonzero-bin table of a split dataset.
    Primary(usize),
    /// The universal-negative table (labels are all zero).
    UniversalNegative(usize),
}

/// Integer index space `[0, N)` over one or two label tables.
///
/// For split datasets the nonzero-bin rows come first and the universal
/// negatives start at [`RegionIndex::universal_negative_offset`]. The mapping
/// from index to row never changes for the lifetime of the index.
#[derive(Debug, Clone)]
pub enum RegionIndex {
    /// One table holding every interval.
    Single(LabelTable),
    /// Nonzero bins plus universal negatives.
    Split {
        /// Rows with at least one positive task.
        nonzero_bins: LabelTable,
        /// Rows assumed negative for every task.
        universal_negatives: LabelTable,
    },
}

impl RegionIndex {
    /// Total number of indices.
    pub fn len(&self) -> usize {
        match self {
            Self::Single(table) => table.len(),
            Self::Split {
                nonzero_bins,
                universal_negatives,
            } => nonzero_bins.len() + universal_negatives.len(),
        }
    }

    /// Returns `true` when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First index belonging to the universal-negative table.
    pub fn universal_negative_offset(&self) -> Option<usize> {
        match self {
            Self::Single(_) => None,
            Self::Split { nonzero_bins, .. } => Some(nonzero_bins.len()),
        }
    }

    /// Table whose columns define the label layout.
    pub fn primary(&self) -> &LabelTable {
        match self {
            Self::Single(table) => table,
            Self::Split { nonzero_bins, .. } => nonzero_bins,
        }
    }

    /// Task column names.
    pub fn columns(&self) -> &[String] {
        self.primary().columns()
    }

    /// Label width shared by every row.
    pub fn width(&self) -> usize {
        self.primary().width()
    }

    /// Map an index onto its table and row.
    pub fn locate(&self, index: usize) -> Option<RowSource> {
        match self {
            Self::Single(table) => (index < table.len()).then_some(RowSource::Primary(index)),
            Self::Split {
                nonzero_bins,
                universal_negatives,
            } => {
                let offset = nonzero_bins.len();
                if index < offset {
                    Some(RowSource::Primary(index))
                } else if index - offset < universal_negatives.len() {
                    Some(RowSource::UniversalNegative(index - offset))
                } else {
                    None
                }
            }
        }
    }

    /// Interval and label row (`None` meaning all zeros) of an index.
    pub fn resolve(&self, index: usize) -> Option<(&Interval, Option<ArrayView1<'_, f32>>)> {
        match (self.locate(index)?, self) {
            (RowSource::Primary(row), _) => {
                let table = self.primary();
                Some((table.interval(row)?, table.row(row)))
            }
            (
                RowSource::UniversalNegative(row),
                Self::Split {
                    universal_negatives,
                    ..
                },
            ) => Some((universal_negatives.interval(row)?, None)),
            (RowSource::UniversalNegative(_), Self::Single(_)) => None,
        }
    }

    /// Resolve a slice of indices, each against its own table.
    ///
    /// Returns `None` if any index is out of range.
    pub fn resolve_many(&self, indices: &[usize]) -> Option<(Vec<Interval>, Array2<f32>)> {
        let mut intervals = Vec::with_capacity(indices.len());
        let mut labels = Array2::zeros((indices.len(), self.width()));
        for (out_row, &index) in indices.iter().enumerate() {
            let (interval, row) = self.resolve(index)?;
            intervals.push(interval.clone());
            if let Some(row) = row {
                labels.row_mut(out_row).assign(&row);
            }
        }
        Some((intervals, labels))
    }

    /// Every label row in index order, universal negatives zero-filled.
    pub fn labels(&self) -> LabelTable {
        match self {
            Self::Single(table) => table.clone(),
            Self::Split {
                nonzero_bins,
                universal_negatives,
            } => nonzero_bins.concat_zero_filled(universal_negatives),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn split_index() -> RegionIndex {
        let nonzero = LabelTable::new(
            vec!["t".into()],
            vec![Interval::new("chr1", 0, 4), Interval::new("chr1", 4, 8)],
            array![[1.0], [2.0]],
        )
        .unwrap();
        let negatives = LabelTable::positions_only(vec![
            Interval::new("chr2", 0, 4),
            Interval::new("chr2", 4, 8),
            Interval::new("chr2", 8, 12),
        ]);
        RegionIndex::Split {
            nonzero_bins: nonzero,
            universal_negatives: negatives,
        }
    }

    #[test]
    fn split_offsets() {
        let index = split_index();
        assert_eq!(index.len(), 5);
        assert_eq!(index.universal_negative_offset(), Some(2));
        assert_eq!(index.locate(1), Some(RowSource::Primary(1)));
        assert_eq!(index.locate(2), Some(RowSource::UniversalNegative(0)));
        assert_eq!(index.locate(5), None);
    }

    #[test]
    fn slice_spanning_boundary_resolves_each_side() {
        let index = split_index();
        let (intervals, labels) = index.resolve_many(&[3, 1, 2]).unwrap();
        assert_eq!(intervals[0], Interval::new("chr2", 4, 8));
        assert_eq!(intervals[1], Interval::new("chr1", 4, 8));
        assert_eq!(intervals[2], Interval::new("chr2", 0, 4));
        assert_eq!(labels, array![[0.0], [2.0], [0.0]]);
        assert!(index.resolve_many(&[7]).is_none());
    }

    #[test]
    fn concatenated_labels() {
        let labels = split_index().labels();
        assert_eq!(labels.len(), 5);
        assert_eq!(labels.values().column(0).to_vec(), vec![1.0, 2.0, 0.0, 0.0, 0.0]);
    }
}
