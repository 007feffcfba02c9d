//! Occurrence Matrix
//!
//! A categorical sparse frequency-matrix engine for biodiversity summaries:
//! - Builds species-by-dataset count matrices from stacked records
//! - Row and column sums, extremes with full tie reporting
//! - Whole-axis statistics and single-vector comparison reports
//! - Date-stamped zip archives (bincode + zstd payload, JSON metadata)
//! - Sampling and verification against the stacked source

pub mod archive;
pub mod category;
pub mod config;
pub mod error;
pub mod matrix;
pub mod storage;
pub mod summary;
pub mod table;
pub mod utils;
pub mod verify;

// Re-exports for convenience
pub use archive::{LoadedArchive, MatrixArchive};
pub use category::{Axis, CategoryIndex};
pub use config::{DateStamp, EngineConfig, TableDescriptor, TableType};
pub use error::{MatrixError, Result};
pub use matrix::{
    AxisSummary, CompareMode, ComparisonReport, SparseFrequencyMatrix, SparseVector, Triple, VectorStats,
};
pub use storage::{LocalObjectStore, ObjectStore};
pub use summary::{RankBy, RankOrder, SummaryTable, VectorSummary};
pub use table::{Cell, StackedTable};
pub use verify::{VerificationReport, Verifier};
