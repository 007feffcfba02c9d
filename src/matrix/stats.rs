//! Matrix statistics
//!
//! Whole-axis summaries, single-vector statistics, and reports comparing one
//! vector against every vector on its axis. All figures are plain integers or
//! floats so reports serialize to JSON without conversion.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::SparseFrequencyMatrix;
use crate::category::Axis;
use crate::config::TableDescriptor;
use crate::error::Result;

/// An extreme value and every label holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extreme {
    pub value: u64,
    pub labels: Vec<String>,
}

/// Statistics over every vector along one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSummary {
    pub axis: Axis,
    /// Number of vectors on the axis
    pub vector_count: usize,
    /// Sum of every stored value
    pub grand_total: u64,
    pub total_min: u64,
    pub total_max: u64,
    pub total_mean: f64,
    pub total_median: f64,
    pub count_min: usize,
    pub count_max: usize,
    pub count_mean: f64,
    pub count_median: f64,
}

/// Statistics for a single row or column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStats {
    pub axis: Axis,
    pub label: String,
    pub index: usize,
    /// Opposite-axis labels with a stored value in this vector
    pub nonzero_count: usize,
    pub total: u64,
    pub min: Extreme,
    pub max: Extreme,
}

/// Which sections a comparison report carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
    /// Only the non-zero count fields
    Axis,
    /// Only the value total fields
    Value,
    #[default]
    Both,
}

impl CompareMode {
    fn includes_values(self) -> bool {
        matches!(self, CompareMode::Value | CompareMode::Both)
    }

    fn includes_counts(self) -> bool {
        matches!(self, CompareMode::Axis | CompareMode::Both)
    }
}

/// One vector's total against the totals of all vectors on its axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueComparison {
    pub total: u64,
    pub all_total: u64,
    pub all_min: u64,
    pub all_max: u64,
    pub all_mean: f64,
    pub all_median: f64,
}

/// One vector's non-zero count against the counts of all vectors on its axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountComparison {
    pub count: usize,
    pub all_count: usize,
    pub all_min: usize,
    pub all_max: usize,
    pub all_mean: f64,
    pub all_median: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub axis: Axis,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<ValueComparison>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<CountComparison>,
}

impl ComparisonReport {
    /// Render with the section names of `descriptor`, e.g.
    /// `{"datasetkey": "d1", "Occurrences": {..}, "Species": {..}}`.
    pub fn to_labeled_json(&self, descriptor: &TableDescriptor) -> serde_json::Value {
        let mut report = json!({ descriptor.field_for(self.axis): self.label });
        if let Some(values) = &self.values {
            report[descriptor.value_title.as_str()] = json!(values);
        }
        if let Some(counts) = &self.counts {
            report[descriptor.entry_title(self.axis)] = json!(counts);
        }
        report
    }
}

impl SparseFrequencyMatrix {
    /// Totals and non-zero counts of every vector along `axis`, summarized.
    pub fn axis_summary(&self, axis: Axis) -> AxisSummary {
        // Pass one: per-vector aggregates
        let aggregates = self.vector_aggregates(axis);
        let mut totals: Vec<u64> = aggregates.iter().map(|(t, _)| *t).collect();
        let mut counts: Vec<u64> = aggregates.iter().map(|(_, c)| *c as u64).collect();

        // Pass two: exact order statistics over the aggregates
        totals.sort_unstable();
        counts.sort_unstable();
        let vector_count = aggregates.len();
        let grand_total: u64 = totals.iter().sum();
        let count_sum: u64 = counts.iter().sum();

        AxisSummary {
            axis,
            vector_count,
            grand_total,
            total_min: totals.first().copied().unwrap_or(0),
            total_max: totals.last().copied().unwrap_or(0),
            total_mean: mean(grand_total, vector_count),
            total_median: median(&totals),
            count_min: counts.first().copied().unwrap_or(0) as usize,
            count_max: counts.last().copied().unwrap_or(0) as usize,
            count_mean: mean(count_sum, vector_count),
            count_median: median(&counts),
        }
    }

    /// Index, totals, and both extremes for one vector.
    pub fn vector_stats(&self, label: &str, axis: Axis) -> Result<VectorStats> {
        let (vector, index) = self.vector(label, axis)?;
        let (max_value, max_labels) = self.extreme_value_and_labels(label, axis, true)?;
        let (min_value, min_labels) = self.extreme_value_and_labels(label, axis, false)?;

        Ok(VectorStats {
            axis,
            label: label.to_string(),
            index,
            nonzero_count: vector.nnz(),
            total: vector.sum(),
            min: Extreme { value: min_value, labels: min_labels },
            max: Extreme { value: max_value, labels: max_labels },
        })
    }

    /// Compare one vector's total and non-zero count with all vectors on its axis.
    pub fn compare_to_others(&self, label: &str, axis: Axis, mode: CompareMode) -> Result<ComparisonReport> {
        let stats = self.vector_stats(label, axis)?;
        let all = self.axis_summary(axis);

        let values = mode.includes_values().then(|| ValueComparison {
            total: stats.total,
            all_total: all.grand_total,
            all_min: all.total_min,
            all_max: all.total_max,
            all_mean: all.total_mean,
            all_median: all.total_median,
        });
        let counts = mode.includes_counts().then(|| CountComparison {
            count: stats.nonzero_count,
            all_count: all.vector_count,
            all_min: all.count_min,
            all_max: all.count_max,
            all_mean: all.count_mean,
            all_median: all.count_median,
        });

        Ok(ComparisonReport { axis, label: stats.label, values, counts })
    }
}

fn mean(sum: u64, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        sum as f64 / n as f64
    }
}

/// Median of an ascending slice; the mean of the middle pair for even lengths.
pub(crate) fn median(sorted: &[u64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2] as f64,
        _ => (sorted[n / 2 - 1] as f64 + sorted[n / 2] as f64) / 2.0,
    }
}
