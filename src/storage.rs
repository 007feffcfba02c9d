//! Object Storage
//!
//! Where published archives live. The engine only needs two calls, upload a
//! local file and download a named object, so the transport sits behind a
//! trait. Transport failures surface as opaque `Storage` errors.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{MatrixError, Result};

/// Destination for published archives.
pub trait ObjectStore: Send + Sync {
    /// Copy `local_path` to `<bucket>/<prefix>/<file name>`; returns its location.
    fn upload(&self, local_path: &Path, bucket: &str, prefix: &str) -> Result<String>;

    /// Fetch `<bucket>/<prefix>/<name>` into `local_dir`; returns the local path.
    ///
    /// An existing local copy is kept unless `overwrite` is set.
    fn download(&self, bucket: &str, prefix: &str, name: &str, local_dir: &Path, overwrite: bool) -> Result<PathBuf>;
}

/// Object store backed by a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, prefix: &str, name: &str) -> PathBuf {
        let mut path = self.root.join(bucket);
        // Empty segments from leading or trailing slashes are dropped
        for segment in prefix.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.join(name)
    }
}

impl ObjectStore for LocalObjectStore {
    fn upload(&self, local_path: &Path, bucket: &str, prefix: &str) -> Result<String> {
        let name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MatrixError::Storage(format!("{} has no file name", local_path.display())))?;
        let target = self.object_path(bucket, prefix, name);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| MatrixError::Storage(format!("failed to create {}: {}", parent.display(), e)))?;
        }
        fs::copy(local_path, &target).map_err(|e| {
            MatrixError::Storage(format!("failed to upload {} to {}: {}", local_path.display(), target.display(), e))
        })?;

        let location = format!("file://{}", target.display());
        info!("Uploaded {} to {}", local_path.display(), location);
        Ok(location)
    }

    fn download(&self, bucket: &str, prefix: &str, name: &str, local_dir: &Path, overwrite: bool) -> Result<PathBuf> {
        let source = self.object_path(bucket, prefix, name);
        let target = local_dir.join(name);

        if target.exists() && !overwrite {
            debug!("Keeping existing {}", target.display());
            return Ok(target);
        }
        if !source.exists() {
            return Err(MatrixError::Storage(format!("no object {}", source.display())));
        }
        fs::create_dir_all(local_dir)
            .map_err(|e| MatrixError::Storage(format!("failed to create {}: {}", local_dir.display(), e)))?;
        fs::copy(&source, &target).map_err(|e| {
            MatrixError::Storage(format!("failed to download {} to {}: {}", source.display(), target.display(), e))
        })?;

        info!("Downloaded {} to {}", source.display(), target.display());
        Ok(target)
    }
}
