//! High-level facade over the core subsystems.

mod builder;

pub use builder::AlchemistApiBuilder;

use crate::civitai::{parse_image_ref, CivitaiClient, CivitaiSource};
use crate::download::DownloadManager;
use crate::metadata::{normalize, CanonicalMetadata, ResourceReference};
use crate::model_library::ModelDirectory;
use crate::pipeline::{ReproduceOptions, Reproducer, ReproductionReport};
use crate::resolver::{ResolveReport, ResolvedArtifact, Resolver};
use crate::workflow::{build_workflow_with, BuildOptions, BuiltWorkflow};
use crate::{AlchemistError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Platform access: the HTTP client, whose credential can be swapped per
/// call, or an injected source.
pub(crate) enum Backend {
    Client(CivitaiClient),
    Custom(Arc<dyn CivitaiSource>),
}

/// Main entry point for programmatic use.
///
/// Owns the platform client, the model directory index and the download
/// manager (and through it the active task registry).
pub struct AlchemistApi {
    backend: Backend,
    directory: Arc<dyn ModelDirectory>,
    downloads: Arc<DownloadManager>,
    api_key: Option<String>,
    output_dir: Option<std::path::PathBuf>,
}

impl AlchemistApi {
    pub fn builder() -> AlchemistApiBuilder {
        AlchemistApiBuilder::new()
    }

    /// Whether a credential is configured or supplied.
    pub fn has_credential(&self, api_key: Option<&str>) -> bool {
        self.credential(api_key).is_some()
    }

    /// The supplied key, else the configured one.
    pub fn credential<'a>(&'a self, api_key: Option<&'a str>) -> Option<&'a str> {
        api_key
            .filter(|k| !k.is_empty())
            .or(self.api_key.as_deref())
    }

    pub fn downloads(&self) -> &Arc<DownloadManager> {
        &self.downloads
    }

    pub fn directory(&self) -> &Arc<dyn ModelDirectory> {
        &self.directory
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    fn source(&self, api_key: Option<&str>) -> Arc<dyn CivitaiSource> {
        match &self.backend {
            Backend::Client(client) => match api_key.filter(|k| !k.is_empty()) {
                Some(key) => Arc::new(client.with_api_key(Some(key))),
                None => Arc::new(client.clone()),
            },
            Backend::Custom(source) => source.clone(),
        }
    }

    /// Fetch an image record and normalize it, resources included.
    pub async fn fetch_metadata(
        &self,
        image_ref: &str,
        api_key: Option<&str>,
    ) -> Result<CanonicalMetadata> {
        let image_id = parse_image_ref(image_ref)?;
        let source = self.source(api_key);
        let record = source
            .get_image(image_id)
            .await?
            .ok_or_else(|| AlchemistError::NotFound {
                entity: format!("image {}", image_id),
            })?;
        Ok(normalize(&record, source.as_ref()).await)
    }

    pub async fn resolve_resource(
        &self,
        reference: &ResourceReference,
        api_key: Option<&str>,
    ) -> ResolvedArtifact {
        let source = self.source(api_key);
        Resolver::new(source.as_ref(), self.directory.as_ref())
            .resolve(reference)
            .await
    }

    pub async fn resolve_resources(
        &self,
        references: &[ResourceReference],
        api_key: Option<&str>,
    ) -> ResolveReport {
        let source = self.source(api_key);
        Resolver::new(source.as_ref(), self.directory.as_ref())
            .resolve_all(references)
            .await
    }

    pub fn start_download(&self, artifact: ResolvedArtifact, api_key: Option<&str>) -> Result<String> {
        self.downloads.start_single(artifact, api_key)
    }

    pub fn start_batch_download(
        &self,
        artifacts: Vec<ResolvedArtifact>,
        api_key: Option<&str>,
    ) -> Result<String> {
        self.downloads.start_batch(artifacts, api_key)
    }

    pub fn cancel_download(&self, task_id: &str) -> Result<()> {
        self.downloads.cancel(task_id)
    }

    pub fn cancel_all_downloads(&self) -> usize {
        self.downloads.cancel_all()
    }

    pub fn build_workflow(
        &self,
        metadata: &CanonicalMetadata,
        artifacts: &[ResolvedArtifact],
        seed_fallback: Option<u64>,
    ) -> Result<BuiltWorkflow> {
        build_workflow_with(metadata, artifacts, &BuildOptions { seed_fallback })
    }

    /// Run the whole reproduction for one image.
    pub async fn reproduce(
        &self,
        image_ref: &str,
        options: &ReproduceOptions,
    ) -> Result<ReproductionReport> {
        let source = self.source(options.api_key.as_deref());
        let mut reproducer = Reproducer::new(source.as_ref(), self.directory.as_ref())
            .with_downloads(self.downloads.as_ref());
        if let Some(dir) = &self.output_dir {
            reproducer = reproducer.with_output_root(dir);
        }
        debug!("reproduce {} (skip_download={})", image_ref, options.skip_download);
        reproducer.run(image_ref, options).await
    }
}
