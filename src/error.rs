//! Error types for matrix construction, statistics and archives.

use std::path::PathBuf;

use thiserror::Error;

use crate::category::Axis;

/// Boxed source for failures coming from codecs we do not expose directly.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the matrix engine.
///
/// Every variant is fatal to the call that raised it; nothing is retried.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("2D sparse matrix does not have axis {0}")]
    InvalidAxis(i64),

    #[error("category {label:?} does not exist in {axis} axis")]
    LabelNotFound { label: String, axis: Axis },

    #[error("code {code} is outside 0..{len} in {axis} axis")]
    CodeOutOfRange { code: usize, len: usize, axis: Axis },

    #[error("no non-null labels for {axis} axis (field {field:?})")]
    EmptyDomain { field: String, axis: Axis },

    #[error("label {label:?} appears more than once in {axis} axis")]
    DuplicateLabel { label: String, axis: Axis },

    #[error("more than one record for row {row:?} and column {column:?}")]
    DuplicateEntry { row: String, column: String },

    #[error("field {0:?} is not present in the stacked table")]
    MissingField(String),

    #[error("record {record}: field {field:?} holds {value}, expected a non-negative whole count")]
    InvalidValue {
        record: usize,
        field: String,
        value: String,
    },

    #[error("stored values total more than {max}, the largest count a sum can hold", max = u64::MAX)]
    ValueOverflow,

    #[error("found value 0 in {axis} vector {label:?}")]
    UnexpectedZeroValue { label: String, axis: Axis },

    #[error("requested {requested} labels from {axis} axis but only {available} are available")]
    InsufficientLabels {
        requested: usize,
        available: usize,
        axis: Axis,
    },

    #[error("unknown table type {0:?}")]
    UnknownTableType(String),

    #[error("invalid date stamp {0:?}, expected YYYY_MM_DD")]
    InvalidDateStamp(String),

    #[error("missing file {0}")]
    MissingArchive(PathBuf),

    #[error("filename {0:?} does not match <table_type>_<YYYY_MM_DD>")]
    UnparseableFilename(String),

    #[error("missing expected file {0}")]
    MissingExpectedMember(PathBuf),

    #[error("failed to write {path}: {source}")]
    MatrixWrite {
        path: PathBuf,
        #[source]
        source: BoxedSource,
    },

    #[error("failed to load {path}: {source}")]
    MatrixRead {
        path: PathBuf,
        #[source]
        source: BoxedSource,
    },

    #[error("failed to serialize metadata as JSON: {0}")]
    MetadataSerialize(#[source] serde_json::Error),

    #[error("failed to load {path}: {source}")]
    MetadataParse {
        path: PathBuf,
        #[source]
        source: BoxedSource,
    },

    #[error("failed to write metadata to {path}: {source}")]
    MetadataWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing row categories in {0}")]
    MissingRowCategories(PathBuf),

    #[error("missing column categories in {0}")]
    MissingColumnCategories(PathBuf),

    #[error("failed to write {path}: {source}")]
    ArchiveWrite {
        path: PathBuf,
        #[source]
        source: BoxedSource,
    },

    #[error("failed to extract {path}: {source}")]
    ArchiveRead {
        path: PathBuf,
        #[source]
        source: BoxedSource,
    },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for matrix operations.
pub type Result<T> = std::result::Result<T, MatrixError>;

impl MatrixError {
    pub(crate) fn matrix_write(path: impl Into<PathBuf>, source: impl Into<BoxedSource>) -> Self {
        Self::MatrixWrite { path: path.into(), source: source.into() }
    }

    pub(crate) fn matrix_read(path: impl Into<PathBuf>, source: impl Into<BoxedSource>) -> Self {
        Self::MatrixRead { path: path.into(), source: source.into() }
    }

    pub(crate) fn metadata_parse(path: impl Into<PathBuf>, source: impl Into<BoxedSource>) -> Self {
        Self::MetadataParse { path: path.into(), source: source.into() }
    }

    pub(crate) fn archive_write(path: impl Into<PathBuf>, source: impl Into<BoxedSource>) -> Self {
        Self::ArchiveWrite { path: path.into(), source: source.into() }
    }

    pub(crate) fn archive_read(path: impl Into<PathBuf>, source: impl Into<BoxedSource>) -> Self {
        Self::ArchiveRead { path: path.into(), source: source.into() }
    }
}
