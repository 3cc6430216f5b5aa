//! Builder for configuring AlchemistApi initialization.

use super::{AlchemistApi, Backend};
use crate::civitai::{CivitaiClient, CivitaiSource};
use crate::config::Settings;
use crate::download::{DownloadManager, NoopSink, ProgressSink, TaskRegistry};
use crate::model_library::{FsModelDirectory, ModelDirectory};
use crate::network::ApiLog;
use crate::{AlchemistError, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Builder for [`AlchemistApi`].
///
/// # Example
///
/// ```rust,ignore
/// use alchemist_core::AlchemistApi;
///
/// let api = AlchemistApi::builder()
///     .api_key(Some("secret"))
///     .models_dir("./models")
///     .auto_create_dirs(true)
///     .build()?;
/// ```
pub struct AlchemistApiBuilder {
    api_key: Option<String>,
    models_dir: PathBuf,
    output_dir: Option<PathBuf>,
    auto_create_dirs: bool,
    source: Option<Arc<dyn CivitaiSource>>,
    directory: Option<Arc<dyn ModelDirectory>>,
    sink: Arc<dyn ProgressSink>,
    registry: TaskRegistry,
    api_log: Option<ApiLog>,
}

impl AlchemistApiBuilder {
    pub fn new() -> Self {
        Self::from_settings(&Settings::default())
    }

    /// Start from environment-derived settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            models_dir: settings.models_dir.clone(),
            output_dir: Some(settings.output_dir.clone()),
            auto_create_dirs: false,
            source: None,
            directory: None,
            sink: Arc::new(NoopSink),
            registry: TaskRegistry::new(),
            api_log: None,
        }
    }

    pub fn api_key(mut self, key: Option<impl Into<String>>) -> Self {
        self.api_key = key.map(Into::into).filter(|k: &String| !k.is_empty());
        self
    }

    pub fn models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = dir.into();
        self
    }

    /// Where reproduction runs persist their documents. `None` disables
    /// persistence.
    pub fn output_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.output_dir = dir;
        self
    }

    /// Create the models and output directories if missing.
    ///
    /// Default: `false`
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Use a custom platform source instead of the HTTP client.
    pub fn with_source(mut self, source: Arc<dyn CivitaiSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Use a custom model directory index instead of the `models/` layout.
    pub fn with_directory(mut self, directory: Arc<dyn ModelDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Share an existing task registry.
    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Record platform API calls into `log`.
    pub fn with_api_log(mut self, log: ApiLog) -> Self {
        self.api_log = Some(log);
        self
    }

    pub fn build(self) -> Result<AlchemistApi> {
        if self.auto_create_dirs {
            for dir in std::iter::once(&self.models_dir).chain(self.output_dir.as_ref()) {
                std::fs::create_dir_all(dir).map_err(|e| AlchemistError::io_with_path(e, dir))?;
            }
        }

        let backend = match self.source {
            Some(source) => Backend::Custom(source),
            None => {
                let mut builder = CivitaiClient::builder().api_key(self.api_key.clone());
                if let Some(log) = self.api_log {
                    builder = builder.api_log(log);
                }
                Backend::Client(builder.build()?)
            }
        };

        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(FsModelDirectory::new(&self.models_dir)));

        let downloads = DownloadManager::new(self.api_key.clone())?
            .with_sink(self.sink)
            .with_registry(self.registry);

        Ok(AlchemistApi {
            backend,
            directory,
            downloads: Arc::new(downloads),
            api_key: self.api_key,
            output_dir: self.output_dir,
        })
    }
}

impl Default for AlchemistApiBuilder {
    fn default() -> Self {
        Self::new()
    }
}
