//! Persisted run documents.
//!
//! A run directory holds `metadata.json`, `resources.json` and
//! `workflow.json`. Writes go through a temp file, fsync and rename so a
//! crash never leaves a truncated document.

use crate::config::PathsConfig;
use crate::metadata::CanonicalMetadata;
use crate::resolver::ResourcesDocument;
use crate::workflow::WorkflowGraph;
use crate::{AlchemistError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use tracing::debug;

/// Read and parse a JSON file. `Ok(None)` if it does not exist.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(AlchemistError::io_with_path(e, path)),
    };

    let data = serde_json::from_str(&contents).map_err(|e| AlchemistError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;
    Ok(Some(data))
}

/// Write pretty JSON to `path` atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AlchemistError::io_with_path(e, parent))?;
    }

    let serialized = serde_json::to_string_pretty(data).map_err(|e| AlchemistError::Json {
        message: format!("Failed to serialize {}: {}", path.display(), e),
        source: Some(e),
    })?;

    let temp_path = path.with_extension(format!("json.{}.tmp", process::id()));
    let written = (|| -> std::io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(serialized.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(AlchemistError::io_with_path(e, &temp_path));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        AlchemistError::io_with_path(e, path)
    })?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// The three documents of one reproduction run.
#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(PathsConfig::METADATA_FILE)
    }

    pub fn resources_path(&self) -> PathBuf {
        self.dir.join(PathsConfig::RESOURCES_FILE)
    }

    pub fn workflow_path(&self) -> PathBuf {
        self.dir.join(PathsConfig::WORKFLOW_FILE)
    }

    pub fn save_metadata(&self, metadata: &CanonicalMetadata) -> Result<()> {
        atomic_write_json(&self.metadata_path(), metadata)
    }

    pub fn load_metadata(&self) -> Result<Option<CanonicalMetadata>> {
        atomic_read_json(&self.metadata_path())
    }

    pub fn save_resources(&self, resources: &ResourcesDocument) -> Result<()> {
        atomic_write_json(&self.resources_path(), resources)
    }

    pub fn load_resources(&self) -> Result<Option<ResourcesDocument>> {
        atomic_read_json(&self.resources_path())
    }

    pub fn save_workflow(&self, workflow: &WorkflowGraph) -> Result<()> {
        atomic_write_json(&self.workflow_path(), workflow)
    }

    pub fn load_workflow(&self) -> Result<Option<WorkflowGraph>> {
        atomic_read_json(&self.workflow_path())
    }
}
