//! Configuration
//!
//! Table-type descriptors, data date stamps, and the runtime settings read
//! from the environment. Descriptors are plain values handed to the builder
//! and the archive writer; nothing here is process-wide state.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::category::Axis;
use crate::error::{MatrixError, Result};

const DATE_FORMAT: &str = "%Y_%m_%d";

// ──────────────────────────────────────────────────────────────────────────────
// TABLE TYPES
// ──────────────────────────────────────────────────────────────────────────────

/// What the rows, columns and values of a table mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    /// Stacked records: one (dataset, species, count) per row.
    DatasetSpeciesLists,
    /// Species (rows) by dataset (columns) occurrence counts.
    SpeciesDatasetMatrix,
    /// Per-species totals and dataset counts.
    SpeciesDatasetSummary,
    /// Per-dataset totals and species counts.
    DatasetSpeciesSummary,
}

impl TableType {
    pub const ALL: [TableType; 4] = [
        TableType::DatasetSpeciesLists,
        TableType::SpeciesDatasetMatrix,
        TableType::SpeciesDatasetSummary,
        TableType::DatasetSpeciesSummary,
    ];

    /// Token used in file names and metadata.
    pub fn token(self) -> &'static str {
        match self {
            TableType::DatasetSpeciesLists => "dataset_species_lists",
            TableType::SpeciesDatasetMatrix => "species_dataset_matrix",
            TableType::SpeciesDatasetSummary => "species_dataset_summary",
            TableType::DatasetSpeciesSummary => "dataset_species_summary",
        }
    }

    /// The summary table type produced by collapsing a matrix along `axis`.
    pub fn summary_for(self, axis: Axis) -> Option<TableType> {
        match (self, axis) {
            (TableType::SpeciesDatasetMatrix, Axis::Row) => Some(TableType::SpeciesDatasetSummary),
            (TableType::SpeciesDatasetMatrix, Axis::Column) => Some(TableType::DatasetSpeciesSummary),
            _ => None,
        }
    }

    /// Default descriptor for this table type.
    pub fn descriptor(self) -> TableDescriptor {
        let species = "taxonkey_species";
        let dataset = "datasetkey";
        let count = "occ_count";
        let (row_field, column_field, row_title, column_title) = match self {
            TableType::DatasetSpeciesLists | TableType::SpeciesDatasetMatrix => {
                (species, dataset, "Species", "Datasets")
            }
            TableType::SpeciesDatasetSummary => (species, "measurement", "Species", "Measurements"),
            TableType::DatasetSpeciesSummary => (dataset, "measurement", "Datasets", "Measurements"),
        };
        let description = match self {
            TableType::DatasetSpeciesLists => "Occurrence counts of each species within each dataset, one record per pair",
            TableType::SpeciesDatasetMatrix => "Sparse matrix of species (rows) by dataset (columns) occurrence counts",
            TableType::SpeciesDatasetSummary => "Total occurrences and dataset count for each species",
            TableType::DatasetSpeciesSummary => "Total occurrences and species count for each dataset",
        };
        let combine_fields = match self {
            TableType::DatasetSpeciesLists => Some(CombinedField {
                name: species.to_string(),
                first: "taxonkey".to_string(),
                second: "species".to_string(),
            }),
            _ => None,
        };

        TableDescriptor {
            code: self,
            description: description.to_string(),
            row_field: row_field.to_string(),
            column_field: column_field.to_string(),
            value_field: count.to_string(),
            row_title: row_title.to_string(),
            column_title: column_title.to_string(),
            value_title: "Occurrences".to_string(),
            combine_fields,
        }
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for TableType {
    type Err = MatrixError;

    fn from_str(s: &str) -> Result<Self> {
        TableType::ALL
            .into_iter()
            .find(|t| t.token() == s)
            .ok_or_else(|| MatrixError::UnknownTableType(s.to_string()))
    }
}

/// A field derived by joining two source fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedField {
    pub name: String,
    pub first: String,
    pub second: String,
}

/// Which fields mean what for one table type, and how to name them in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub code: TableType,
    pub description: String,
    /// Stacked field whose values become row labels
    pub row_field: String,
    /// Stacked field whose values become column labels
    pub column_field: String,
    /// Stacked field holding the counts
    pub value_field: String,
    /// Report section name for per-row counts
    pub row_title: String,
    /// Report section name for per-column counts
    pub column_title: String,
    /// Report section name for values
    pub value_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combine_fields: Option<CombinedField>,
}

impl TableDescriptor {
    /// Section title naming what the entries of an `axis` vector count.
    pub fn entry_title(&self, axis: Axis) -> &str {
        match axis {
            Axis::Row => &self.column_title,
            Axis::Column => &self.row_title,
        }
    }

    /// Field holding the labels of `axis`.
    pub fn field_for(&self, axis: Axis) -> &str {
        match axis {
            Axis::Row => &self.row_field,
            Axis::Column => &self.column_field,
        }
    }
}

/// Canonical base file name: `<table-type-token>_<YYYY_MM_DD>`.
pub fn base_filename(table_type: TableType, date: DateStamp) -> String {
    format!("{}_{}", table_type.token(), date)
}

/// Recover the table type and date stamp from a file name or path.
pub fn parse_base_filename(name: &str) -> Result<(TableType, DateStamp)> {
    let unparseable = || MatrixError::UnparseableFilename(name.to_string());

    let file_name = std::path::Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(unparseable)?;
    // YYYY_MM_DD plus the joining underscore
    let split = file_name.len().checked_sub(11).ok_or_else(unparseable)?;
    if !file_name.is_char_boundary(split) || file_name.as_bytes()[split] != b'_' {
        return Err(unparseable());
    }
    let table_type = file_name[..split].parse::<TableType>().map_err(|_| unparseable())?;
    let date = file_name[split + 1..].parse::<DateStamp>().map_err(|_| unparseable())?;
    Ok((table_type, date))
}

// ──────────────────────────────────────────────────────────────────────────────
// DATE STAMPS
// ──────────────────────────────────────────────────────────────────────────────

/// Date identifying a data snapshot, rendered `YYYY_MM_DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DateStamp(NaiveDate);

impl DateStamp {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| MatrixError::InvalidDateStamp(format!("{}_{:02}_{:02}", year, month, day)))
    }

    /// Data snapshots are taken on the first day of each month.
    pub fn current_data_date() -> Self {
        let today = Utc::now().date_naive();
        Self(today.with_day(1).unwrap_or(today))
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for DateStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl FromStr for DateStamp {
    type Err = MatrixError;

    fn from_str(s: &str) -> Result<Self> {
        // chrono accepts unpadded fields; the file name format does not
        if s.len() != 10 {
            return Err(MatrixError::InvalidDateStamp(s.to_string()));
        }
        NaiveDate::parse_from_str(s, DATE_FORMAT)
            .map(Self)
            .map_err(|_| MatrixError::InvalidDateStamp(s.to_string()))
    }
}

impl TryFrom<String> for DateStamp {
    type Error = MatrixError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DateStamp> for String {
    fn from(value: DateStamp) -> Self {
        value.to_string()
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// RUNTIME CONFIGURATION
// ──────────────────────────────────────────────────────────────────────────────

/// Settings for the batch job, read from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Local directory for archives and extracted members
    pub work_dir: PathBuf,
    /// Root directory backing the local object store
    pub store_root: PathBuf,
    /// Destination identifier handed to the storage collaborator
    pub bucket: String,
    /// Path prefix within the destination
    pub prefix: String,
    /// Labels drawn per axis during verification
    pub sample_size: usize,
    /// zstd level for the matrix payload
    pub zstd_level: i32,
    /// Snapshot date of the data being aggregated
    pub data_date: DateStamp,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let work_dir = std::env::temp_dir();
        Self {
            store_root: work_dir.join("occurrence_matrix_store"),
            work_dir,
            bucket: "specnet".to_string(),
            prefix: "summary".to_string(),
            sample_size: 5,
            zstd_level: 3,
            data_date: DateStamp::current_data_date(),
        }
    }
}

impl EngineConfig {
    /// Load settings from `MATRIX_*` environment variables. The caller loads
    /// any `.env` file first.
    ///
    /// Unset variables keep their defaults; unparseable ones are logged and
    /// ignored, except `MATRIX_DATA_DATE` which must be a valid date stamp.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("MATRIX_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        if let Ok(root) = std::env::var("MATRIX_STORE_ROOT") {
            config.store_root = PathBuf::from(root);
        }
        if let Ok(bucket) = std::env::var("MATRIX_BUCKET") {
            config.bucket = bucket;
        }
        if let Ok(prefix) = std::env::var("MATRIX_PREFIX") {
            config.prefix = prefix;
        }
        if let Ok(size) = std::env::var("MATRIX_SAMPLE_SIZE") {
            match size.parse() {
                Ok(size) => config.sample_size = size,
                Err(_) => warn!("Ignoring MATRIX_SAMPLE_SIZE={:?}", size),
            }
        }
        if let Ok(level) = std::env::var("MATRIX_ZSTD_LEVEL") {
            match level.parse() {
                Ok(level) => config.zstd_level = level,
                Err(_) => warn!("Ignoring MATRIX_ZSTD_LEVEL={:?}", level),
            }
        }
        if let Ok(date) = std::env::var("MATRIX_DATA_DATE") {
            config.data_date = date.parse()?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_stamp_format_and_parse() {
        let date = DateStamp::from_ymd(2024, 2, 1).unwrap();
        assert_eq!(date.to_string(), "2024_02_01");
        assert_eq!("2024_02_01".parse::<DateStamp>().unwrap(), date);
        assert!("2024-02-01".parse::<DateStamp>().is_err());
        assert!("2024_2_1".parse::<DateStamp>().is_err());
        assert!("2024_13_01".parse::<DateStamp>().is_err());
    }

    #[test]
    fn test_current_data_date_is_first_of_month() {
        assert_eq!(DateStamp::current_data_date().date().day(), 1);
    }

    #[test]
    fn test_filename_round_trip() {
        let date = DateStamp::from_ymd(2024, 2, 1).unwrap();
        for table_type in TableType::ALL {
            let name = base_filename(table_type, date);
            let (parsed_type, parsed_date) = parse_base_filename(&format!("/tmp/{}.zip", name)).unwrap();
            assert_eq!(parsed_type, table_type);
            assert_eq!(parsed_date, date);
        }
    }

    #[test]
    fn test_unparseable_filenames() {
        for name in ["matrix.zip", "species_dataset_matrix.zip", "bogus_type_2024_02_01.zip", "species_dataset_matrix_2024_02_xx.zip", ""] {
            assert!(
                matches!(parse_base_filename(name), Err(MatrixError::UnparseableFilename(_))),
                "{} should not parse",
                name
            );
        }
    }

    #[test]
    fn test_table_type_tokens() {
        for table_type in TableType::ALL {
            assert_eq!(table_type.token().parse::<TableType>().unwrap(), table_type);
            assert_eq!(table_type.descriptor().code, table_type);
        }
        assert!(matches!("nope".parse::<TableType>(), Err(MatrixError::UnknownTableType(_))));
    }

    #[test]
    fn test_summary_types() {
        let matrix = TableType::SpeciesDatasetMatrix;
        assert_eq!(matrix.summary_for(Axis::Row), Some(TableType::SpeciesDatasetSummary));
        assert_eq!(matrix.summary_for(Axis::Column), Some(TableType::DatasetSpeciesSummary));
        assert_eq!(TableType::DatasetSpeciesLists.summary_for(Axis::Row), None);
    }

    #[test]
    fn test_from_env_reads_matrix_variables() {
        std::env::set_var("MATRIX_SAMPLE_SIZE", "9");
        std::env::set_var("MATRIX_ZSTD_LEVEL", "high");
        std::env::set_var("MATRIX_DATA_DATE", "2023_11_01");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.sample_size, 9);
        assert_eq!(config.zstd_level, EngineConfig::default().zstd_level);
        assert_eq!(config.data_date, DateStamp::from_ymd(2023, 11, 1).unwrap());

        std::env::set_var("MATRIX_DATA_DATE", "2023-11-01");
        assert!(matches!(EngineConfig::from_env(), Err(MatrixError::InvalidDateStamp(_))));

        for key in ["MATRIX_SAMPLE_SIZE", "MATRIX_ZSTD_LEVEL", "MATRIX_DATA_DATE"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_descriptor_serializes_flat() {
        let descriptor = TableType::SpeciesDatasetMatrix.descriptor();
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["code"], "species_dataset_matrix");
        assert_eq!(value["value_field"], "occ_count");
        assert!(value.get("combine_fields").is_none());
    }
}
