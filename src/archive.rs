//! Matrix Archive
//!
//! Persists a matrix as one `.zip` container holding two members that share
//! the base name `<table_type>_<YYYY_MM_DD>`:
//!
//! - `.mtx`: the stored triples as parallel arrays, bincode encoded and zstd
//!   compressed
//! - `.json`: the table descriptor, the data date and the ordered `row` and
//!   `column` label lists
//!
//! Published archives are never rewritten; a newer date stamp supersedes.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::category::{Axis, CategoryIndex};
use crate::config::{base_filename, parse_base_filename, DateStamp, TableDescriptor, TableType};
use crate::error::{MatrixError, Result};
use crate::matrix::{SparseFrequencyMatrix, Triple};

pub const MATRIX_EXTENSION: &str = "mtx";
pub const METADATA_EXTENSION: &str = "json";
pub const ARCHIVE_EXTENSION: &str = "zip";

const ROW_KEY: &str = "row";
const COLUMN_KEY: &str = "column";
const DATE_KEY: &str = "data_date";

/// On-disk layout of the matrix member.
#[derive(Debug, Serialize, Deserialize)]
struct MatrixPayload {
    shape: (usize, usize),
    rows: Vec<u32>,
    cols: Vec<u32>,
    values: Vec<u64>,
}

/// Everything read back from an archive.
#[derive(Debug, Clone)]
pub struct LoadedArchive {
    pub triples: Vec<Triple>,
    pub rows: CategoryIndex,
    pub columns: CategoryIndex,
    pub table_type: TableType,
    pub date: DateStamp,
    pub descriptor: TableDescriptor,
}

impl LoadedArchive {
    /// Rebuild the matrix that was saved.
    pub fn into_matrix(self) -> Result<SparseFrequencyMatrix> {
        SparseFrequencyMatrix::from_parts(self.triples, self.rows, self.columns, self.descriptor, self.date)
    }
}

/// Save and load matrix archives.
pub struct MatrixArchive;

impl MatrixArchive {
    /// Path of the container `save` writes for this table type and date.
    pub fn archive_path(dir: &Path, table_type: TableType, date: DateStamp) -> PathBuf {
        member_path(dir, &base_filename(table_type, date), ARCHIVE_EXTENSION)
    }

    /// Write `matrix` to `<dir>/<table_type>_<date>.zip` and return the path.
    pub fn save(matrix: &SparseFrequencyMatrix, dir: &Path, zstd_level: i32) -> Result<PathBuf> {
        let base = base_filename(matrix.table_type(), matrix.date());
        let matrix_path = member_path(dir, &base, MATRIX_EXTENSION);
        let metadata_path = member_path(dir, &base, METADATA_EXTENSION);
        let archive_path = member_path(dir, &base, ARCHIVE_EXTENSION);

        // 1. Clear stale files from an earlier run
        fs::create_dir_all(dir)?;
        remove_if_present(&[&matrix_path, &metadata_path, &archive_path])?;

        // 2. Matrix payload
        write_payload(matrix, &matrix_path, zstd_level)?;

        // 3. Metadata
        let metadata = metadata_document(matrix)?;
        let text = serde_json::to_string_pretty(&metadata).map_err(MatrixError::MetadataSerialize)?;
        fs::write(&metadata_path, text)
            .map_err(|source| MatrixError::MetadataWrite { path: metadata_path.clone(), source })?;

        // 4. Container
        bundle(&archive_path, &[&matrix_path, &metadata_path])?;

        info!(
            "Saved {} ({}x{}, {} values) to {}",
            base,
            matrix.shape().0,
            matrix.shape().1,
            matrix.nnz(),
            archive_path.display()
        );
        Ok(archive_path)
    }

    /// Read an archive written by `save`, extracting its members into `dir`.
    ///
    /// With `overwrite`, members left from an earlier extraction are removed
    /// first; otherwise existing files are replaced as the container is read.
    pub fn load(archive_path: &Path, dir: &Path, overwrite: bool) -> Result<LoadedArchive> {
        if !archive_path.exists() {
            return Err(MatrixError::MissingArchive(archive_path.to_path_buf()));
        }
        let (table_type, date) = parse_base_filename(&archive_path.to_string_lossy())?;
        let base = base_filename(table_type, date);
        let matrix_path = member_path(dir, &base, MATRIX_EXTENSION);
        let metadata_path = member_path(dir, &base, METADATA_EXTENSION);

        // 1. Unpack
        fs::create_dir_all(dir)?;
        if overwrite {
            remove_if_present(&[&matrix_path, &metadata_path])?;
        }
        extract(archive_path, dir)?;
        for member in [&matrix_path, &metadata_path] {
            if !member.exists() {
                return Err(MatrixError::MissingExpectedMember(member.clone()));
            }
        }

        // 2. Payload
        let payload = read_payload(&matrix_path)?;

        // 3. Metadata and categories
        let mut metadata = read_metadata(&metadata_path)?;
        let rows = take_labels(&mut metadata, ROW_KEY)
            .ok_or_else(|| MatrixError::MissingRowCategories(metadata_path.clone()))?;
        let columns = take_labels(&mut metadata, COLUMN_KEY)
            .ok_or_else(|| MatrixError::MissingColumnCategories(metadata_path.clone()))?;
        metadata.remove(DATE_KEY);
        let descriptor: TableDescriptor = serde_json::from_value(Value::Object(metadata))
            .map_err(|e| MatrixError::metadata_parse(&metadata_path, e))?;
        if descriptor.code != table_type {
            return Err(MatrixError::metadata_parse(
                &metadata_path,
                format!("metadata describes {} but the archive is named for {}", descriptor.code, table_type),
            ));
        }

        let rows = CategoryIndex::from_labels(rows, Axis::Row)?;
        let columns = CategoryIndex::from_labels(columns, Axis::Column)?;
        if payload.shape != (rows.len(), columns.len()) {
            return Err(MatrixError::matrix_read(
                &matrix_path,
                format!(
                    "payload shape {:?} does not match {} row and {} column labels",
                    payload.shape,
                    rows.len(),
                    columns.len()
                ),
            ));
        }
        let triples = payload.into_triples(&matrix_path)?;

        info!("Loaded {} with {} values from {}", base, triples.len(), archive_path.display());
        Ok(LoadedArchive { triples, rows, columns, table_type, date, descriptor })
    }
}

impl MatrixPayload {
    fn into_triples(self, path: &Path) -> Result<Vec<Triple>> {
        let n = self.values.len();
        if self.rows.len() != n || self.cols.len() != n {
            return Err(MatrixError::matrix_read(
                path,
                format!("ragged payload: {} rows, {} cols, {} values", self.rows.len(), self.cols.len(), n),
            ));
        }
        Ok(self
            .rows
            .into_iter()
            .zip(self.cols)
            .zip(self.values)
            .map(|((row, column), value)| Triple { row, column, value })
            .collect())
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// MEMBERS
// ──────────────────────────────────────────────────────────────────────────────

pub(crate) fn member_path(dir: &Path, base: &str, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", base, extension))
}

/// Remove the files among `paths`. Anything else at those paths is left for
/// the following write to report.
pub(crate) fn remove_if_present<P: AsRef<Path>>(paths: &[P]) -> Result<()> {
    for path in paths {
        let path: &Path = path.as_ref();
        if path.is_file() {
            debug!("Removing stale {}", path.display());
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

fn write_payload(matrix: &SparseFrequencyMatrix, path: &Path, zstd_level: i32) -> Result<()> {
    let triples = matrix.triples();
    let payload = MatrixPayload {
        shape: matrix.shape(),
        rows: triples.iter().map(|t| t.row).collect(),
        cols: triples.iter().map(|t| t.column).collect(),
        values: triples.iter().map(|t| t.value).collect(),
    };

    let file = File::create(path).map_err(|e| MatrixError::matrix_write(path, e))?;
    let writer = BufWriter::new(file);
    let mut encoder = zstd::stream::write::Encoder::new(writer, zstd_level)
        .map_err(|e| MatrixError::matrix_write(path, e))?;
    bincode::serialize_into(&mut encoder, &payload).map_err(|e| MatrixError::matrix_write(path, e))?;
    let mut writer = encoder.finish().map_err(|e| MatrixError::matrix_write(path, e))?;
    writer.flush().map_err(|e| MatrixError::matrix_write(path, e))?;
    Ok(())
}

fn read_payload(path: &Path) -> Result<MatrixPayload> {
    let file = File::open(path).map_err(|e| MatrixError::matrix_read(path, e))?;
    let decoder = zstd::stream::read::Decoder::new(file).map_err(|e| MatrixError::matrix_read(path, e))?;
    bincode::deserialize_from(decoder).map_err(|e| MatrixError::matrix_read(path, e))
}

/// Flat metadata object: descriptor fields, `data_date`, `row`, `column`.
fn metadata_document(matrix: &SparseFrequencyMatrix) -> Result<Value> {
    let mut document = match serde_json::to_value(matrix.descriptor()).map_err(MatrixError::MetadataSerialize)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    document.insert(DATE_KEY.to_string(), Value::String(matrix.date().to_string()));
    document.insert(ROW_KEY.to_string(), Value::from(matrix.rows().labels().to_vec()));
    document.insert(COLUMN_KEY.to_string(), Value::from(matrix.columns().labels().to_vec()));
    Ok(Value::Object(document))
}

pub(crate) fn read_metadata(path: &Path) -> Result<Map<String, Value>> {
    let file = File::open(path).map_err(|e| MatrixError::metadata_parse(path, e))?;
    match serde_json::from_reader(BufReader::new(file)).map_err(|e| MatrixError::metadata_parse(path, e))? {
        Value::Object(map) => Ok(map),
        other => Err(MatrixError::metadata_parse(path, format!("expected a JSON object, found {}", other))),
    }
}

/// Pop a list of string labels; `None` when absent or not a string list.
fn take_labels(metadata: &mut Map<String, Value>, key: &str) -> Option<Vec<String>> {
    metadata.remove(key).and_then(|v| serde_json::from_value(v).ok())
}

// ──────────────────────────────────────────────────────────────────────────────
// CONTAINER
// ──────────────────────────────────────────────────────────────────────────────

/// Zip `members` (stored by file name) into `archive_path`.
pub(crate) fn bundle<P: AsRef<Path>>(archive_path: &Path, members: &[P]) -> Result<()> {
    let file = File::create(archive_path).map_err(|e| MatrixError::archive_write(archive_path, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for member in members {
        let member: &Path = member.as_ref();
        let name = member
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| MatrixError::archive_write(archive_path, format!("{} has no file name", member.display())))?;
        zip.start_file(name, options)
            .map_err(|e| MatrixError::archive_write(archive_path, e))?;
        let mut source = File::open(member).map_err(|e| MatrixError::archive_write(archive_path, e))?;
        std::io::copy(&mut source, &mut zip).map_err(|e| MatrixError::archive_write(archive_path, e))?;
    }

    let mut writer = zip.finish().map_err(|e| MatrixError::archive_write(archive_path, e))?;
    writer.flush().map_err(|e| MatrixError::archive_write(archive_path, e))?;
    Ok(())
}

/// Unpack every file member of `archive_path` into `dir`, replacing existing files.
pub(crate) fn extract(archive_path: &Path, dir: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| MatrixError::archive_read(archive_path, e))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| MatrixError::archive_read(archive_path, e))?;
    debug!("Extracting {} members from {}", zip.len(), archive_path.display());

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| MatrixError::archive_read(archive_path, e))?;
        // Entries escaping `dir` are skipped
        let Some(name) = entry.enclosed_name() else {
            continue;
        };
        if entry.is_dir() {
            continue;
        }
        let target = dir.join(name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target).map_err(|e| MatrixError::archive_read(archive_path, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| MatrixError::archive_read(archive_path, e))?;
    }
    Ok(())
}
