//! File-based snapshot backend with atomic writes.
//!
//! Stores one snapshot record per engine, either at an explicit path or
//! under `dirs::data_dir()/<namespace>/state.json`.
//! Uses temp file + rename for atomic writes.

use crate::snapshot::format::SnapshotRecord;
use crate::KeywardenError;
use std::fs;
use std::path::{Path, PathBuf};

/// File name used under a namespace directory.
pub const SNAPSHOT_FILE_NAME: &str = "state.json";

/// File-based snapshot backend.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    /// Path of the snapshot file.
    path: PathBuf,
}

impl SnapshotFile {
    /// Use a snapshot file at the given path, creating its directory.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, KeywardenError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                KeywardenError::SnapshotIO(format!("Failed to create snapshot dir: {}", e))
            })?;
        }
        Ok(Self { path })
    }

    /// Use `dirs::data_dir()/<namespace>/state.json`.
    pub fn with_namespace(namespace: &str) -> Result<Self, KeywardenError> {
        let base_dir = dirs::data_dir().ok_or_else(|| {
            KeywardenError::SnapshotIO("Could not find data directory".to_string())
        })?;
        Self::in_dir(&base_dir, namespace)
    }

    /// Use `<base_dir>/<namespace>/state.json`.
    pub fn in_dir(base_dir: &Path, namespace: &str) -> Result<Self, KeywardenError> {
        Self::new(base_dir.join(namespace).join(SNAPSHOT_FILE_NAME))
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a record atomically.
    pub fn save(&self, record: &SnapshotRecord) -> Result<(), KeywardenError> {
        let json = record.to_json()?;
        let temp_path = self.path.with_extension("tmp");

        fs::write(&temp_path, &json).map_err(|e| {
            KeywardenError::SnapshotIO(format!("Failed to write temp file: {}", e))
        })?;

        fs::rename(&temp_path, &self.path).map_err(|e| {
            KeywardenError::SnapshotIO(format!("Failed to rename snapshot file: {}", e))
        })?;

        Ok(())
    }

    /// Load the record, if one was saved.
    pub fn load(&self) -> Result<Option<SnapshotRecord>, KeywardenError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path).map_err(|e| {
            KeywardenError::SnapshotIO(format!("Failed to read snapshot file: {}", e))
        })?;

        SnapshotRecord::from_json(&json).map(Some)
    }
}
