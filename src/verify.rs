//! Sampling and Verification
//!
//! Draws random labels from a matrix and cross-checks its sums, extremes and
//! comparison reports against values recomputed directly from the stacked
//! records it was built from. Used after a build and before publishing; not
//! part of the read path.

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::category::Axis;
use crate::config::TableDescriptor;
use crate::error::{MatrixError, Result};
use crate::matrix::stats::median;
use crate::matrix::{CompareMode, SparseFrequencyMatrix};
use crate::table::StackedTable;

const TOLERANCE: f64 = 1e-9;

// ──────────────────────────────────────────────────────────────────────────────
// SAMPLING
// ──────────────────────────────────────────────────────────────────────────────

impl SparseFrequencyMatrix {
    /// `count` distinct labels drawn uniformly from `axis`.
    pub fn random_labels(&self, count: usize, axis: Axis) -> Result<Vec<String>> {
        self.random_labels_with(&mut rand::thread_rng(), count, axis)
    }

    /// As `random_labels`, drawing from `rng`.
    pub fn random_labels_with<R: Rng + ?Sized>(&self, rng: &mut R, count: usize, axis: Axis) -> Result<Vec<String>> {
        let index = self.index(axis);
        if count > index.len() {
            return Err(MatrixError::InsufficientLabels { requested: count, available: index.len(), axis });
        }
        let codes = rand::seq::index::sample(rng, index.len(), count);
        index.labels_of(codes.into_iter())
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// REFERENCE COMPUTATIONS
// ──────────────────────────────────────────────────────────────────────────────

/// Stacked records that contribute a cell: both labels present.
fn stacked_cells<'a>(
    table: &'a StackedTable,
    descriptor: &TableDescriptor,
) -> Result<impl Iterator<Item = Result<(String, String, u64)>> + 'a> {
    let rows = table.labels(&descriptor.row_field)?;
    let columns = table.labels(&descriptor.column_field)?;
    let values = table.column(&descriptor.value_field)?;
    let field = descriptor.value_field.clone();

    Ok(rows.into_iter().zip(columns).zip(values).enumerate().filter_map(move |(record, ((row, column), cell))| {
        let (row, column) = (row?, column?);
        Some(
            cell.as_count()
                .map(|value| (row, column, value))
                .ok_or_else(|| MatrixError::InvalidValue { record, field: field.clone(), value: format!("{:?}", cell) }),
        )
    }))
}

fn split(axis: Axis, row: String, column: String) -> (String, String) {
    match axis {
        Axis::Row => (row, column),
        Axis::Column => (column, row),
    }
}

fn add(total: u64, value: u64) -> Result<u64> {
    total.checked_add(value).ok_or(MatrixError::ValueOverflow)
}

/// Sum of the stacked values whose `axis` label is `label`.
pub fn stacked_sum(table: &StackedTable, descriptor: &TableDescriptor, label: &str, axis: Axis) -> Result<u64> {
    let mut total = 0;
    for cell in stacked_cells(table, descriptor)? {
        let (row, column, value) = cell?;
        if split(axis, row, column).0 == label {
            total = add(total, value)?;
        }
    }
    Ok(total)
}

/// Max (or min) stacked value for `label` and the opposite-axis labels holding it.
///
/// `None` when the label has no stacked values.
pub fn stacked_extreme(
    table: &StackedTable,
    descriptor: &TableDescriptor,
    label: &str,
    axis: Axis,
    want_max: bool,
) -> Result<Option<(u64, BTreeSet<String>)>> {
    let mut best: Option<(u64, BTreeSet<String>)> = None;
    for cell in stacked_cells(table, descriptor)? {
        let (row, column, value) = cell?;
        let (own, other) = split(axis, row, column);
        if own != label {
            continue;
        }
        let replace = match &best {
            None => true,
            Some((current, _)) if want_max => value > *current,
            Some((current, _)) => value < *current,
        };
        if replace {
            best = Some((value, BTreeSet::from([other])));
        } else if let Some((current, labels)) = &mut best {
            if *current == value {
                labels.insert(other);
            }
        }
    }
    Ok(best)
}

/// Per-label (total, record count) along `axis`, including labels with no cells.
pub fn stacked_aggregates(
    table: &StackedTable,
    descriptor: &TableDescriptor,
    axis: Axis,
) -> Result<HashMap<String, (u64, usize)>> {
    let mut aggregates: HashMap<String, (u64, usize)> = table
        .labels(descriptor.field_for(axis))?
        .into_iter()
        .flatten()
        .map(|label| (label, (0, 0)))
        .collect();
    for cell in stacked_cells(table, descriptor)? {
        let (row, column, value) = cell?;
        let slot = aggregates.entry(split(axis, row, column).0).or_default();
        slot.0 = add(slot.0, value)?;
        slot.1 += 1;
    }
    Ok(aggregates)
}

// ──────────────────────────────────────────────────────────────────────────────
// VERIFIER
// ──────────────────────────────────────────────────────────────────────────────

/// One check whose matrix result disagreed with the stacked records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub check: String,
    pub axis: Axis,
    pub label: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    /// Number of comparisons made
    pub checks: usize,
    /// Checks skipped because the vector holds a zero; not counted in `checks`
    pub skipped: usize,
    pub mismatches: Vec<Mismatch>,
}

impl VerificationReport {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
    }

    fn check<T: PartialEq + std::fmt::Debug>(&mut self, check: &str, axis: Axis, label: &str, expected: T, actual: T) {
        self.checks += 1;
        if expected != actual {
            warn!("{} mismatch for {} {:?}: expected {:?}, got {:?}", check, axis, label, expected, actual);
            self.mismatches.push(Mismatch {
                check: check.to_string(),
                axis,
                label: label.to_string(),
                expected: format!("{:?}", expected),
                actual: format!("{:?}", actual),
            });
        }
    }

    fn check_close(&mut self, check: &str, axis: Axis, label: &str, expected: f64, actual: f64) {
        if (expected - actual).abs() <= TOLERANCE * expected.abs().max(1.0) {
            self.checks += 1;
        } else {
            self.check(check, axis, label, expected, actual);
        }
    }
}

/// Cross-checks sampled labels of a matrix against its stacked source.
pub struct Verifier<'a> {
    matrix: &'a SparseFrequencyMatrix,
    table: &'a StackedTable,
    sample_size: usize,
}

impl<'a> Verifier<'a> {
    /// `sample_size` labels per axis are checked, capped at the axis length.
    pub fn new(matrix: &'a SparseFrequencyMatrix, table: &'a StackedTable, sample_size: usize) -> Self {
        Self { matrix, table, sample_size }
    }

    /// Run every check with labels sampled by an entropy-seeded RNG.
    pub fn verify(&self) -> Result<VerificationReport> {
        self.verify_with(&mut StdRng::from_entropy())
    }

    pub fn verify_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<VerificationReport> {
        let mut report = VerificationReport::default();
        for axis in [Axis::Row, Axis::Column] {
            let count = self.sample_size.min(self.matrix.index(axis).len());
            let labels = self.matrix.random_labels_with(rng, count, axis)?;
            debug!("Verifying {} labels on {}: {:?}", labels.len(), axis, labels);

            self.check_sums(&labels, axis, &mut report)?;
            self.check_extremes(&labels, axis, &mut report)?;
            self.check_comparisons(&labels, axis, &mut report)?;
        }

        if report.is_ok() {
            info!("Verified {} checks ({} skipped) with no mismatches", report.checks, report.skipped);
        } else {
            warn!("{} of {} checks failed verification", report.mismatches.len(), report.checks);
        }
        Ok(report)
    }

    pub fn check_sums(&self, labels: &[String], axis: Axis, report: &mut VerificationReport) -> Result<()> {
        let descriptor = self.matrix.descriptor();
        for label in labels {
            let expected = stacked_sum(self.table, descriptor, label, axis)?;
            let actual = self.matrix.sum_vector(label, axis)?;
            report.check("sum", axis, label, expected, actual);
        }
        Ok(())
    }

    pub fn check_extremes(&self, labels: &[String], axis: Axis, report: &mut VerificationReport) -> Result<()> {
        let descriptor = self.matrix.descriptor();
        for label in labels {
            for want_max in [true, false] {
                let check = if want_max { "max" } else { "min" };
                let expected = stacked_extreme(self.table, descriptor, label, axis, want_max)?;
                match self.matrix.extreme_value_and_labels(label, axis, want_max) {
                    Ok((value, found)) => {
                        let actual = Some((value, found.into_iter().collect::<BTreeSet<_>>()));
                        report.check(check, axis, label, expected, actual);
                    }
                    Err(MatrixError::UnexpectedZeroValue { .. }) => {
                        let zero_or_empty = expected.as_ref().map_or(true, |(value, _)| *value == 0);
                        if zero_or_empty {
                            warn!("Skipping {} check for {} {:?}: zero value", check, axis, label);
                            report.skipped += 1;
                        } else {
                            report.check(check, axis, label, expected, None);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Own and population fields of each comparison against stacked recomputation.
    pub fn check_comparisons(&self, labels: &[String], axis: Axis, report: &mut VerificationReport) -> Result<()> {
        let aggregates = stacked_aggregates(self.table, self.matrix.descriptor(), axis)?;
        let mut totals: Vec<u64> = aggregates.values().map(|(t, _)| *t).collect();
        let mut counts: Vec<u64> = aggregates.values().map(|(_, c)| *c as u64).collect();
        totals.sort_unstable();
        counts.sort_unstable();
        let all_total = totals.iter().try_fold(0u64, |total, t| add(total, *t))?;

        for label in labels {
            let report_for = match self.matrix.compare_to_others(label, axis, CompareMode::Both) {
                Ok(r) => r,
                Err(MatrixError::UnexpectedZeroValue { .. }) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let (own_total, own_count) = aggregates.get(label.as_str()).copied().unwrap_or_default();

            if let Some(values) = &report_for.values {
                report.check("own total", axis, label, own_total, values.total);
                report.check("all total", axis, label, all_total, values.all_total);
                report.check("total min", axis, label, totals.first().copied().unwrap_or(0), values.all_min);
                report.check("total max", axis, label, totals.last().copied().unwrap_or(0), values.all_max);
                report.check_close("total median", axis, label, median(&totals), values.all_median);
            }
            if let Some(found) = &report_for.counts {
                report.check("own count", axis, label, own_count, found.count);
                report.check("vector count", axis, label, aggregates.len(), found.all_count);
                report.check("count min", axis, label, counts.first().copied().unwrap_or(0) as usize, found.all_min);
                report.check("count max", axis, label, counts.last().copied().unwrap_or(0) as usize, found.all_max);
                report.check_close("count median", axis, label, median(&counts), found.all_median);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DateStamp, TableType};
    use crate::table::Cell;

    fn table() -> StackedTable {
        let mut table = StackedTable::new(["species", "dataset", "count"]);
        for (s, d, c) in [("A", "D1", 5i64), ("A", "D2", 3), ("B", "D1", 7), ("C", "D2", 7), ("C", "D3", 7)] {
            table.push_record([Cell::from(s), Cell::from(d), Cell::from(c)]).unwrap();
        }
        table
    }

    fn matrix(table: &StackedTable) -> SparseFrequencyMatrix {
        SparseFrequencyMatrix::build_from_stacked(
            table,
            "species",
            "dataset",
            "count",
            TableType::SpeciesDatasetMatrix,
            DateStamp::from_ymd(2024, 2, 1).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_random_labels_are_distinct_members() {
        let table = table();
        let matrix = matrix(&table);
        let mut rng = StdRng::seed_from_u64(7);

        let labels = matrix.random_labels_with(&mut rng, 3, Axis::Column).unwrap();
        let unique: BTreeSet<&String> = labels.iter().collect();
        assert_eq!(unique.len(), 3);
        assert!(labels.iter().all(|l| matrix.columns().contains(l)));

        assert!(matrix.random_labels(0, Axis::Row).unwrap().is_empty());
    }

    #[test]
    fn test_random_labels_bound() {
        let table = table();
        let matrix = matrix(&table);
        assert!(matches!(
            matrix.random_labels(4, Axis::Row),
            Err(MatrixError::InsufficientLabels { requested: 4, available: 3, axis: Axis::Row })
        ));
    }

    #[test]
    fn test_stacked_reference() {
        let table = table();
        let descriptor = matrix(&table).descriptor().clone();

        assert_eq!(stacked_sum(&table, &descriptor, "A", Axis::Row).unwrap(), 8);
        assert_eq!(stacked_sum(&table, &descriptor, "D2", Axis::Column).unwrap(), 10);

        let (value, labels) = stacked_extreme(&table, &descriptor, "C", Axis::Row, true).unwrap().unwrap();
        assert_eq!(value, 7);
        assert_eq!(labels, BTreeSet::from(["D2".to_string(), "D3".to_string()]));
        assert!(stacked_extreme(&table, &descriptor, "Z", Axis::Row, true).unwrap().is_none());

        let aggregates = stacked_aggregates(&table, &descriptor, Axis::Column).unwrap();
        assert_eq!(aggregates["D1"], (12, 2));
        assert_eq!(aggregates["D3"], (7, 1));
    }

    #[test]
    fn test_verify_consistent_matrix() {
        let table = table();
        let matrix = matrix(&table);
        let report = Verifier::new(&matrix, &table, 10).verify_with(&mut StdRng::seed_from_u64(1)).unwrap();

        assert!(report.is_ok(), "{:?}", report.mismatches);
        assert!(report.checks > 0);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn test_zero_extremes_are_skipped_not_checked() {
        let mut table = StackedTable::new(["species", "dataset", "count"]);
        for (s, d, c) in [("A", "D1", 0i64), ("A", "D2", 3)] {
            table.push_record([Cell::from(s), Cell::from(d), Cell::from(c)]).unwrap();
        }
        let matrix = matrix(&table);
        let labels = vec!["A".to_string()];

        let mut report = VerificationReport::default();
        Verifier::new(&matrix, &table, 1).check_extremes(&labels, Axis::Row, &mut report).unwrap();

        // max is checked, min lands on the zero and is skipped
        assert_eq!((report.checks, report.skipped), (1, 1));
        assert!(report.is_ok());
    }

    #[test]
    fn test_stacked_sums_report_overflow() {
        let mut table = StackedTable::new(["species", "dataset", "count"]);
        table.push_record([Cell::from("A"), Cell::from("D1"), Cell::from(u64::MAX.to_string())]).unwrap();
        table.push_record([Cell::from("A"), Cell::from("D2"), Cell::from(1)]).unwrap();
        let mut descriptor = TableType::SpeciesDatasetMatrix.descriptor();
        descriptor.row_field = "species".to_string();
        descriptor.column_field = "dataset".to_string();
        descriptor.value_field = "count".to_string();

        assert!(matches!(stacked_sum(&table, &descriptor, "A", Axis::Row), Err(MatrixError::ValueOverflow)));
        assert!(matches!(stacked_aggregates(&table, &descriptor, Axis::Row), Err(MatrixError::ValueOverflow)));
        assert_eq!(stacked_sum(&table, &descriptor, "D2", Axis::Column).unwrap(), 1);
    }

    #[test]
    fn test_verify_detects_divergent_source() {
        let table = table();
        let matrix = matrix(&table);

        // Same labels, different counts
        let mut other = StackedTable::new(["species", "dataset", "count"]);
        for (s, d, c) in [("A", "D1", 6i64), ("A", "D2", 3), ("B", "D1", 7), ("C", "D2", 7), ("C", "D3", 7)] {
            other.push_record([Cell::from(s), Cell::from(d), Cell::from(c)]).unwrap();
        }
        let report = Verifier::new(&matrix, &other, 10).verify_with(&mut StdRng::seed_from_u64(1)).unwrap();

        assert!(!report.is_ok());
        assert!(report.mismatches.iter().any(|m| m.check == "sum" && m.label == "A"));
    }
}
