//! Occurrence Matrix batch job
//!
//! Reads stacked (dataset, species, count) records from a JSON file and:
//! - Builds the species-by-dataset matrix
//! - Verifies sampled sums and extremes against the records
//! - Saves and publishes the matrix archive
//! - Reloads the published archive and writes per-axis summary tables
//!
//! Usage: `occurrence_matrix <records.json> [table_type]`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use occurrence_matrix::config::CombinedField;
use occurrence_matrix::utils::telemetry::{init_logging, DEFAULT_DIRECTIVE};
use occurrence_matrix::{
    Axis, CompareMode, EngineConfig, LocalObjectStore, MatrixArchive, ObjectStore, RankBy, RankOrder,
    SparseFrequencyMatrix, StackedTable, SummaryTable, TableType, Verifier,
};

// ──────────────────────────────────────────────────────────────────────────────
// MAIN ENTRY POINT
// ──────────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();
    init_logging(DEFAULT_DIRECTIVE).context("Failed to initialize logging")?;
    let config = EngineConfig::from_env().context("Failed to read configuration")?;

    let mut args = std::env::args().skip(1);
    let Some(records_path) = args.next().map(PathBuf::from) else {
        bail!("usage: occurrence_matrix <records.json> [table_type]");
    };
    let table_type: TableType = match args.next() {
        Some(token) => token.parse()?,
        None => TableType::SpeciesDatasetMatrix,
    };
    let descriptor = table_type.descriptor();

    // 1. Stacked records, with the combined species label when the source needs one
    let json = std::fs::read_to_string(&records_path)
        .with_context(|| format!("Failed to read {}", records_path.display()))?;
    let mut table = StackedTable::from_json_records(&json).context("Failed to parse stacked records")?;
    info!("Read {} stacked records from {}", table.len(), records_path.display());

    let combine = TableType::DatasetSpeciesLists.descriptor().combine_fields;
    let needs_combining = |c: &CombinedField| {
        table.column(&c.name).is_err() && table.column(&c.first).is_ok() && table.column(&c.second).is_ok()
    };
    if let Some(combined) = combine.filter(needs_combining) {
        table
            .add_combined_field(&combined.name, &combined.first, &combined.second)
            .context("Failed to combine species fields")?;
    }

    // 2. Build
    let matrix = SparseFrequencyMatrix::build_with_descriptor(&table, descriptor, config.data_date)
        .context("Failed to build matrix")?;

    // 3. Verify
    let report = Verifier::new(&matrix, &table, config.sample_size).verify()?;
    if !report.is_ok() {
        bail!("Matrix failed verification with {} mismatches", report.mismatches.len());
    }

    // 4. Save and publish
    let archive = MatrixArchive::save(&matrix, &config.work_dir, config.zstd_level)?;
    let store = LocalObjectStore::new(&config.store_root);
    let location = store.upload(&archive, &config.bucket, &config.prefix)?;
    info!("Published matrix to {}", location);

    // 5. Reload from the store
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .context("Archive path has no file name")?;
    let download_dir = config.work_dir.join("download");
    let fetched = store.download(&config.bucket, &config.prefix, name, &download_dir, true)?;
    let loaded = MatrixArchive::load(&fetched, &download_dir, true)?.into_matrix()?;
    if loaded.triples() != matrix.triples() {
        bail!("Reloaded matrix differs from the one saved");
    }

    // 6. Summaries
    for axis in [Axis::Row, Axis::Column] {
        let summary = match SummaryTable::from_matrix(&loaded, axis) {
            Ok(summary) => summary,
            Err(e) => {
                warn!("No {} summary: {}", axis, e);
                continue;
            }
        };
        let path = summary.save(&config.work_dir)?;
        store.upload(&path, &config.bucket, &config.prefix)?;

        for top in summary.rank(RankBy::Total, RankOrder::Descending, 3) {
            info!("Top {}: {} ({} total, {} entries)", axis, top.label, top.total, top.count);
        }
    }

    // 7. Sample comparison
    let axis_stats = loaded.axis_summary(Axis::Column);
    info!("{}", serde_json::to_string(&axis_stats)?);
    if let Some(label) = loaded.random_labels(1, Axis::Column)?.pop() {
        match loaded.compare_to_others(&label, Axis::Column, CompareMode::Both) {
            Ok(report) => info!("{}", report.to_labeled_json(loaded.descriptor())),
            Err(e) => warn!("Comparison for {} failed: {}", label, e),
        }
    }

    Ok(())
}
