//! Sparse Frequency Matrix
//!
//! Aggregates stacked (row label, column label, count) records into a sparse
//! 2D matrix. Only cells present in the input are stored, as (row, column, value) triples
//! sorted row-major. Row and column offsets are computed once at construction
//! so either kind of vector can be sliced without converting the store; the
//! matrix is immutable afterwards.

pub mod stats;

pub use stats::{
    AxisSummary, CompareMode, ComparisonReport, CountComparison, Extreme, ValueComparison,
    VectorStats,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::category::{Axis, CategoryIndex};
use crate::config::{DateStamp, TableDescriptor, TableType};
use crate::error::{MatrixError, Result};
use crate::table::StackedTable;

/// One stored cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub row: u32,
    pub column: u32,
    pub value: u64,
}

impl Triple {
    /// Codes must fit in `u32`; larger ones fail with `CodeOutOfRange`.
    pub fn new(row: usize, column: usize, value: u64) -> Result<Self> {
        Ok(Self { row: narrow(row, Axis::Row)?, column: narrow(column, Axis::Column)?, value })
    }
}

fn narrow(code: usize, axis: Axis) -> Result<u32> {
    u32::try_from(code).map_err(|_| MatrixError::CodeOutOfRange { code, len: u32::MAX as usize, axis })
}

/// A single row or column: the stored entries keyed by opposite-axis code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseVector {
    pub axis: Axis,
    pub index: usize,
    /// (opposite-axis code, value), ascending by code
    pub entries: Vec<(usize, u64)>,
}

impl SparseVector {
    /// Total of the stored values. Cannot overflow for a vector taken from a
    /// matrix, whose grand total is checked at construction.
    pub fn sum(&self) -> u64 {
        self.entries.iter().fold(0u64, |total, (_, v)| total.saturating_add(*v))
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The max or min stored value and every code that holds it.
    pub fn extreme(&self, want_max: bool) -> Option<(u64, Vec<usize>)> {
        let values = self.entries.iter().map(|(_, v)| *v);
        let target = if want_max { values.max()? } else { values.min()? };
        let codes = self
            .entries
            .iter()
            .filter(|(_, v)| *v == target)
            .map(|(code, _)| *code)
            .collect();
        Some((target, codes))
    }
}

/// Counts of row labels by column labels, e.g. species by dataset.
#[derive(Debug, Clone)]
pub struct SparseFrequencyMatrix {
    rows: CategoryIndex,
    columns: CategoryIndex,
    triples: Vec<Triple>,
    /// `triples[row_offsets[r]..row_offsets[r + 1]]` is row r
    row_offsets: Vec<usize>,
    /// Positions into `triples`, column-major
    column_order: Vec<usize>,
    /// `column_order[column_offsets[c]..column_offsets[c + 1]]` is column c
    column_offsets: Vec<usize>,
    descriptor: TableDescriptor,
    date: DateStamp,
}

impl SparseFrequencyMatrix {
    /// Aggregate a stacked table into a matrix.
    ///
    /// Each record contributes one cell: `row_field` gives the row label,
    /// `column_field` the column label and `value_field` the count. Records
    /// with a null label are skipped. The table must hold at most one record
    /// per (row, column) pair; a second one fails with `DuplicateEntry`.
    pub fn build_from_stacked(
        table: &StackedTable,
        row_field: &str,
        column_field: &str,
        value_field: &str,
        table_type: TableType,
        date: DateStamp,
    ) -> Result<Self> {
        let mut descriptor = table_type.descriptor();
        descriptor.row_field = row_field.to_string();
        descriptor.column_field = column_field.to_string();
        descriptor.value_field = value_field.to_string();
        Self::build_with_descriptor(table, descriptor, date)
    }

    /// Aggregate a stacked table using the fields named by `descriptor`.
    pub fn build_with_descriptor(
        table: &StackedTable,
        descriptor: TableDescriptor,
        date: DateStamp,
    ) -> Result<Self> {
        let row_labels = table.labels(&descriptor.row_field)?;
        let column_labels = table.labels(&descriptor.column_field)?;
        let values = table.column(&descriptor.value_field)?;

        // 1. Categories for both axes
        let rows = CategoryIndex::build(row_labels.iter().map(Option::as_deref), Axis::Row, &descriptor.row_field)?;
        let columns = CategoryIndex::build(
            column_labels.iter().map(Option::as_deref),
            Axis::Column,
            &descriptor.column_field,
        )?;

        // 2. One triple per record
        let mut triples = Vec::with_capacity(table.len());
        let mut skipped = 0usize;
        for (record, ((row, column), cell)) in row_labels.iter().zip(&column_labels).zip(values).enumerate() {
            let (Some(row), Some(column)) = (row, column) else {
                skipped += 1;
                continue;
            };
            let value = cell.as_count().ok_or_else(|| MatrixError::InvalidValue {
                record,
                field: descriptor.value_field.clone(),
                value: format!("{:?}", cell),
            })?;
            triples.push(Triple::new(rows.code_of(row)?, columns.code_of(column)?, value)?);
        }
        if skipped > 0 {
            warn!("Skipped {} stacked records with a null row or column label", skipped);
        }

        let matrix = Self::from_parts(triples, rows, columns, descriptor, date)?;
        info!(
            "Built {} matrix {}x{} with {} stored values for {}",
            matrix.table_type(),
            matrix.shape().0,
            matrix.shape().1,
            matrix.nnz(),
            matrix.date
        );
        Ok(matrix)
    }

    /// Assemble a matrix from stored triples and both category indexes.
    ///
    /// The values must total at most `u64::MAX` so that every sum taken from
    /// the matrix fits; otherwise this fails with `ValueOverflow`.
    pub fn from_parts(
        mut triples: Vec<Triple>,
        rows: CategoryIndex,
        columns: CategoryIndex,
        descriptor: TableDescriptor,
        date: DateStamp,
    ) -> Result<Self> {
        for t in &triples {
            if t.row as usize >= rows.len() {
                return Err(MatrixError::CodeOutOfRange { code: t.row as usize, len: rows.len(), axis: Axis::Row });
            }
            if t.column as usize >= columns.len() {
                return Err(MatrixError::CodeOutOfRange {
                    code: t.column as usize,
                    len: columns.len(),
                    axis: Axis::Column,
                });
            }
        }

        triples
            .iter()
            .try_fold(0u64, |total, t| total.checked_add(t.value))
            .ok_or(MatrixError::ValueOverflow)?;

        triples.sort_unstable_by_key(|t| (t.row, t.column));
        if let Some(pair) = triples.windows(2).find(|w| (w[0].row, w[0].column) == (w[1].row, w[1].column)) {
            return Err(MatrixError::DuplicateEntry {
                row: rows.label_of(pair[0].row as usize)?.to_string(),
                column: columns.label_of(pair[0].column as usize)?.to_string(),
            });
        }

        let row_offsets = offsets(rows.len(), triples.iter().map(|t| t.row as usize));

        let mut column_order: Vec<usize> = (0..triples.len()).collect();
        column_order.sort_by_key(|&i| (triples[i].column, triples[i].row));
        let column_offsets = offsets(columns.len(), column_order.iter().map(|&i| triples[i].column as usize));

        debug!("Indexed {} rows and {} columns", rows.len(), columns.len());
        Ok(Self { rows, columns, triples, row_offsets, column_order, column_offsets, descriptor, date })
    }

    pub fn rows(&self) -> &CategoryIndex {
        &self.rows
    }

    pub fn columns(&self) -> &CategoryIndex {
        &self.columns
    }

    /// Category index for `axis`.
    pub fn index(&self, axis: Axis) -> &CategoryIndex {
        match axis {
            Axis::Row => &self.rows,
            Axis::Column => &self.columns,
        }
    }

    /// (number of row labels, number of column labels)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    /// Number of stored values.
    pub fn nnz(&self) -> usize {
        self.triples.len()
    }

    pub fn table_type(&self) -> TableType {
        self.descriptor.code
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    pub fn date(&self) -> DateStamp {
        self.date
    }

    /// Stored triples, row-major.
    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    /// Stored cells with their labels, row-major.
    pub fn labeled_triples(&self) -> impl Iterator<Item = (&str, &str, u64)> + '_ {
        self.triples.iter().map(move |t| {
            (
                self.rows.labels()[t.row as usize].as_str(),
                self.columns.labels()[t.column as usize].as_str(),
                t.value,
            )
        })
    }

    /// Value at (row label, column label); zero when nothing is stored.
    pub fn value(&self, row: &str, column: &str) -> Result<u64> {
        let (vector, _) = self.vector(row, Axis::Row)?;
        let column = self.columns.code_of(column)?;
        Ok(vector
            .entries
            .binary_search_by_key(&column, |(code, _)| *code)
            .map(|i| vector.entries[i].1)
            .unwrap_or(0))
    }

    /// The row or column with `label`, and its index on that axis.
    pub fn vector(&self, label: &str, axis: Axis) -> Result<(SparseVector, usize)> {
        let index = self.index(axis).code_of(label)?;
        Ok((self.vector_at(index, axis), index))
    }

    pub(crate) fn vector_at(&self, index: usize, axis: Axis) -> SparseVector {
        let entries = match axis {
            Axis::Row => self.triples[self.row_offsets[index]..self.row_offsets[index + 1]]
                .iter()
                .map(|t| (t.column as usize, t.value))
                .collect(),
            Axis::Column => self.column_order[self.column_offsets[index]..self.column_offsets[index + 1]]
                .iter()
                .map(|&i| (self.triples[i].row as usize, self.triples[i].value))
                .collect(),
        };
        SparseVector { axis, index, entries }
    }

    /// Total of all values in one row or column.
    pub fn sum_vector(&self, label: &str, axis: Axis) -> Result<u64> {
        let (vector, _) = self.vector(label, axis)?;
        Ok(vector.sum())
    }

    /// Maximum (or minimum) stored value of a vector and every opposite-axis
    /// label holding it.
    ///
    /// Ties are reported in full, in code order. Counts are never zero, so a
    /// zero extreme (or a vector with nothing stored) fails with
    /// `UnexpectedZeroValue`.
    pub fn extreme_value_and_labels(&self, label: &str, axis: Axis, want_max: bool) -> Result<(u64, Vec<String>)> {
        let (vector, _) = self.vector(label, axis)?;
        let zero = || MatrixError::UnexpectedZeroValue { label: label.to_string(), axis };

        let (value, codes) = vector.extreme(want_max).ok_or_else(zero)?;
        if value == 0 {
            return Err(zero());
        }
        let labels = self.index(axis.opposite()).labels_of(codes)?;
        Ok((value, labels))
    }

    /// Per-vector (total, stored count) for every vector along `axis`, in code order.
    /// Totals fit because the grand total does.
    pub(crate) fn vector_aggregates(&self, axis: Axis) -> Vec<(u64, usize)> {
        let mut aggregates = vec![(0u64, 0usize); self.index(axis).len()];
        for t in &self.triples {
            let slot = match axis {
                Axis::Row => &mut aggregates[t.row as usize],
                Axis::Column => &mut aggregates[t.column as usize],
            };
            slot.0 += t.value;
            slot.1 += 1;
        }
        aggregates
    }
}

/// CSR-style offsets for `keys`, which must be sorted ascending.
fn offsets(len: usize, keys: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut offsets = vec![0usize; len + 1];
    for key in keys {
        offsets[key + 1] += 1;
    }
    for i in 0..len {
        offsets[i + 1] += offsets[i];
    }
    offsets
}
