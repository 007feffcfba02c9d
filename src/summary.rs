//! Summary Tables
//!
//! Collapses a matrix along one axis into one record per label: the label's
//! total and how many opposite-axis labels it has a value for. A species
//! summary holds each species' occurrence total and dataset count; a dataset
//! summary holds each dataset's occurrence total and species count.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::archive::{bundle, extract, member_path, read_metadata, remove_if_present, ARCHIVE_EXTENSION, METADATA_EXTENSION};
use crate::category::Axis;
use crate::config::{base_filename, parse_base_filename, DateStamp, TableDescriptor, TableType};
use crate::error::{MatrixError, Result};
use crate::matrix::SparseFrequencyMatrix;

/// Largest number of records a ranking returns.
pub const MAX_RANK_LIMIT: usize = 300;

const RECORDS_KEY: &str = "records";

/// One label's aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorSummary {
    pub label: String,
    /// Sum of the label's values
    pub total: u64,
    /// Opposite-axis labels with a value
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    Total,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankOrder {
    #[default]
    Descending,
    Ascending,
}

/// Per-label totals and counts for one axis of a matrix.
#[derive(Debug, Clone)]
pub struct SummaryTable {
    table_type: TableType,
    axis: Axis,
    date: DateStamp,
    descriptor: TableDescriptor,
    records: Vec<VectorSummary>,
    lookup: HashMap<String, usize>,
}

#[derive(Serialize, Deserialize)]
struct SummaryDocument {
    #[serde(flatten)]
    descriptor: TableDescriptor,
    data_date: DateStamp,
    axis: Axis,
    records: Vec<VectorSummary>,
}

impl SummaryTable {
    /// Summarize every vector along `axis`, in label order.
    pub fn from_matrix(matrix: &SparseFrequencyMatrix, axis: Axis) -> Result<Self> {
        let table_type = matrix.table_type().summary_for(axis).ok_or_else(|| {
            MatrixError::UnknownTableType(format!("{} has no {} summary", matrix.table_type(), axis))
        })?;

        let labels = matrix.index(axis).labels();
        let records: Vec<VectorSummary> = matrix
            .vector_aggregates(axis)
            .into_iter()
            .zip(labels)
            .map(|((total, count), label)| VectorSummary { label: label.clone(), total, count })
            .collect();

        // Row field names the summarized labels; the column is the measurement
        let mut descriptor = table_type.descriptor();
        descriptor.row_field = matrix.descriptor().field_for(axis).to_string();

        info!("Summarized {} {} labels into {}", records.len(), axis, table_type);
        Ok(Self::new(table_type, axis, matrix.date(), descriptor, records))
    }

    fn new(
        table_type: TableType,
        axis: Axis,
        date: DateStamp,
        descriptor: TableDescriptor,
        records: Vec<VectorSummary>,
    ) -> Self {
        let lookup = records.iter().enumerate().map(|(i, r)| (r.label.clone(), i)).collect();
        Self { table_type, axis, date, descriptor, records, lookup }
    }

    pub fn table_type(&self) -> TableType {
        self.table_type
    }

    /// Axis of the matrix this table summarizes.
    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn date(&self) -> DateStamp {
        self.date
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    pub fn records(&self) -> &[VectorSummary] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, label: &str) -> Result<&VectorSummary> {
        self.lookup
            .get(label)
            .map(|&i| &self.records[i])
            .ok_or_else(|| MatrixError::LabelNotFound { label: label.to_string(), axis: self.axis })
    }

    /// The top (or bottom) `limit` records by total or count.
    ///
    /// Ties keep label order. `limit` is capped at `MAX_RANK_LIMIT`.
    pub fn rank(&self, by: RankBy, order: RankOrder, limit: usize) -> Vec<VectorSummary> {
        let key = |r: &VectorSummary| match by {
            RankBy::Total => r.total,
            RankBy::Count => r.count as u64,
        };
        let mut ranked: Vec<&VectorSummary> = self.records.iter().collect();
        match order {
            RankOrder::Descending => ranked.sort_by(|a, b| key(b).cmp(&key(a))),
            RankOrder::Ascending => ranked.sort_by_key(|r| key(r)),
        }
        ranked.into_iter().take(limit.min(MAX_RANK_LIMIT)).cloned().collect()
    }

    /// Write `<dir>/<summary_type>_<date>.zip` holding one JSON member.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let base = base_filename(self.table_type, self.date);
        let metadata_path = member_path(dir, &base, METADATA_EXTENSION);
        let archive_path = member_path(dir, &base, ARCHIVE_EXTENSION);

        fs::create_dir_all(dir)?;
        remove_if_present(&[&metadata_path, &archive_path])?;

        let document = SummaryDocument {
            descriptor: self.descriptor.clone(),
            data_date: self.date,
            axis: self.axis,
            records: self.records.clone(),
        };
        let text = serde_json::to_string(&document).map_err(MatrixError::MetadataSerialize)?;
        fs::write(&metadata_path, text)
            .map_err(|source| MatrixError::MetadataWrite { path: metadata_path.clone(), source })?;
        bundle(&archive_path, &[&metadata_path])?;

        info!("Saved {} with {} records to {}", base, self.records.len(), archive_path.display());
        Ok(archive_path)
    }

    /// Read a summary archive written by `save`.
    pub fn load(archive_path: &Path, dir: &Path) -> Result<Self> {
        if !archive_path.exists() {
            return Err(MatrixError::MissingArchive(archive_path.to_path_buf()));
        }
        let (table_type, date) = parse_base_filename(&archive_path.to_string_lossy())?;
        let metadata_path = member_path(dir, &base_filename(table_type, date), METADATA_EXTENSION);

        fs::create_dir_all(dir)?;
        remove_if_present(&[&metadata_path])?;
        extract(archive_path, dir)?;
        if !metadata_path.exists() {
            return Err(MatrixError::MissingExpectedMember(metadata_path));
        }

        let metadata = read_metadata(&metadata_path)?;
        if !metadata.contains_key(RECORDS_KEY) {
            return Err(MatrixError::metadata_parse(&metadata_path, "no summary records"));
        }
        let document: SummaryDocument = serde_json::from_value(Value::Object(metadata))
            .map_err(|e| MatrixError::metadata_parse(&metadata_path, e))?;

        info!("Loaded {} summary records from {}", document.records.len(), archive_path.display());
        Ok(Self::new(table_type, document.axis, date, document.descriptor, document.records))
    }
}
