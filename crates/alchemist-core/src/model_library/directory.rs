//! Model directory index: where each resource type lives on disk and whether
//! a file is already installed.

use crate::metadata::ResourceType;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Maps resource types to storage directories and answers existence queries.
///
/// Implementations are queried concurrently and must only perform read-only
/// checks.
pub trait ModelDirectory: Send + Sync {
    /// Primary directory new files of `resource_type` are written to.
    fn dir_for(&self, resource_type: ResourceType) -> PathBuf;

    /// Locate an installed file by name anywhere under the type's directories.
    fn find(&self, filename: &str, resource_type: ResourceType) -> Option<PathBuf>;

    /// Expected location for a new file.
    fn target_path(&self, resource_type: ResourceType, filename: &str) -> PathBuf {
        self.dir_for(resource_type).join(filename)
    }
}

/// Filesystem-backed [`ModelDirectory`] using the ComfyUI `models/` layout.
#[derive(Debug, Clone)]
pub struct FsModelDirectory {
    root: PathBuf,
    extra_paths: HashMap<ResourceType, Vec<PathBuf>>,
}

impl FsModelDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extra_paths: HashMap::new(),
        }
    }

    /// Also search `path` when looking for files of `resource_type`.
    pub fn with_extra_path(mut self, resource_type: ResourceType, path: impl Into<PathBuf>) -> Self {
        self.extra_paths
            .entry(resource_type)
            .or_default()
            .push(path.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn search_dirs(&self, resource_type: ResourceType) -> impl Iterator<Item = PathBuf> + '_ {
        std::iter::once(self.dir_for(resource_type)).chain(
            self.extra_paths
                .get(&resource_type)
                .into_iter()
                .flatten()
                .cloned(),
        )
    }
}

impl ModelDirectory for FsModelDirectory {
    fn dir_for(&self, resource_type: ResourceType) -> PathBuf {
        self.root.join(resource_type.directory_name())
    }

    fn find(&self, filename: &str, resource_type: ResourceType) -> Option<PathBuf> {
        if filename.is_empty() {
            return None;
        }
        self.search_dirs(resource_type)
            .filter(|dir| dir.is_dir())
            .find_map(|dir| {
                WalkDir::new(dir)
                    .follow_links(true)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .find(|e| e.file_type().is_file() && e.file_name() == filename)
                    .map(|e| e.into_path())
            })
    }
}

/// Reduce a server-supplied name to a bare file name.
///
/// Returns `None` for names with no usable final component.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches('"');
    match last {
        "" | "." | ".." => None,
        other => Some(other.to_string()),
    }
}
