//! Local scratch storage for in-flight downloads.
//!
//! Files are named after the entity display name, so two entities sharing a
//! name inside one batch land on the same path.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{io_err, SyncError};
use crate::model::Id;

/// Root directory for scratch files, created on demand.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure(&self) -> Result<(), SyncError> {
        fs::create_dir_all(&self.root).map_err(|e| io_err(&self.root, e))
    }

    /// Scratch path for an entity name; path separators are flattened.
    pub fn path_for(&self, name: &str) -> PathBuf {
        let file_name = name.replace('/', "_").replace('\\', "_");
        self.root.join(file_name)
    }

    /// Starts a batch of scratch files removed when the batch is dropped.
    pub fn batch(&self) -> Result<ScratchBatch, SyncError> {
        self.ensure()?;
        Ok(ScratchBatch {
            dir: self.clone(),
            paths: Vec::new(),
        })
    }

    /// Per-dataset cache for volumetric geometry, removed when dropped.
    pub fn geometry_cache(&self, src_dataset_id: Id) -> Result<GeometryCache, SyncError> {
        let dir = self.root.join(format!("geometries_{src_dataset_id}"));
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(GeometryCache { dir })
    }
}

/// Tracks the scratch files of one item or batch and removes them on every
/// exit path.
#[derive(Debug)]
pub struct ScratchBatch {
    dir: ScratchDir,
    paths: Vec<PathBuf>,
}

impl ScratchBatch {
    /// Registers a file for `name` and returns its path. Any stale file left
    /// at that path by an earlier run is removed first.
    pub fn claim(&mut self, name: &str) -> PathBuf {
        let path = self.dir.path_for(name);
        silent_remove(&path);
        self.paths.push(path.clone());
        path
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// True when the bytes for `path` were already fetched in this batch.
    pub fn is_fetched(path: &Path) -> bool {
        path.is_file()
    }
}

impl Drop for ScratchBatch {
    fn drop(&mut self) {
        for path in &self.paths {
            silent_remove(path);
        }
    }
}

#[derive(Debug)]
pub struct GeometryCache {
    dir: PathBuf,
}

impl GeometryCache {
    pub fn path_for(&self, figure_id: Id) -> PathBuf {
        self.dir.join(format!("{figure_id}.nrrd"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for GeometryCache {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = ?e, path = %self.dir.display(), "Failed to remove geometry cache");
            }
        }
    }
}

/// Removes a file, ignoring a file that is already gone.
pub fn silent_remove(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed scratch file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = ?e, path = %path.display(), "Failed to remove scratch file"),
    }
}
