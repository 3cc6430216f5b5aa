//! End-to-end reproduction of one image.
//!
//! parse id -> fetch record -> normalize -> resolve (reusing stored
//! artifacts) -> download missing files -> build workflow -> persist.

use crate::civitai::{parse_image_ref, CivitaiSource};
use crate::download::{DownloadManager, DownloadOutcome};
use crate::metadata::{normalize, CanonicalMetadata, ResourceType};
use crate::model_library::ModelDirectory;
use crate::resolver::{ResolveReport, ResolvedArtifact, Resolver, ResourcesDocument};
use crate::store::RunStore;
use crate::workflow::{build_workflow_with, BuildOptions, BuiltWorkflow};
use crate::{AlchemistError, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

/// Options for [`Reproducer::run`].
#[derive(Debug, Clone, Default)]
pub struct ReproduceOptions {
    /// Resolve and build only; leave missing files undownloaded.
    pub skip_download: bool,
    /// Seed used when the image metadata has none.
    pub seed_fallback: Option<u64>,
    /// Credential override for downloads.
    pub api_key: Option<String>,
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReproductionReport {
    pub image_id: u64,
    pub metadata: CanonicalMetadata,
    pub resources: ResolveReport,
    pub downloads: Vec<DownloadOutcome>,
    pub workflow: BuiltWorkflow,
    /// Directory the run documents were written to.
    pub output_dir: Option<PathBuf>,
}

/// Drives a reproduction against borrowed collaborators.
pub struct Reproducer<'a> {
    source: &'a dyn CivitaiSource,
    directory: &'a dyn ModelDirectory,
    downloads: Option<&'a DownloadManager>,
    output_root: Option<PathBuf>,
}

impl<'a> Reproducer<'a> {
    pub fn new(source: &'a dyn CivitaiSource, directory: &'a dyn ModelDirectory) -> Self {
        Self {
            source,
            directory,
            downloads: None,
            output_root: None,
        }
    }

    pub fn with_downloads(mut self, manager: &'a DownloadManager) -> Self {
        self.downloads = Some(manager);
        self
    }

    /// Persist run documents under `<root>/<image_id>/`.
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(root.into());
        self
    }

    pub async fn run(&self, image_ref: &str, options: &ReproduceOptions) -> Result<ReproductionReport> {
        let image_id = parse_image_ref(image_ref)?;
        info!("Reproducing image {}", image_id);

        let record = self
            .source
            .get_image(image_id)
            .await?
            .ok_or_else(|| AlchemistError::NotFound {
                entity: format!("image {}", image_id),
            })?;
        let mut metadata = normalize(&record, self.source).await;

        let store = self
            .output_root
            .as_ref()
            .map(|root| RunStore::new(root.join(image_id.to_string())));
        let previous = match store.as_ref().map(RunStore::load_resources).transpose() {
            Ok(doc) => doc.flatten().map(|d| d.resources).unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring unreadable resources document: {}", e);
                Vec::new()
            }
        };

        let resolver = Resolver::new(self.source, self.directory);
        let mut resources = resolver
            .resolve_all_reusing(&metadata.resources, &previous)
            .await;
        metadata.backfill_model_name(
            resources
                .resolved
                .iter()
                .filter(|a| a.resource_type() == ResourceType::Checkpoint)
                .map(ResolvedArtifact::name),
        );

        let downloads = match self.downloads {
            Some(manager) if !options.skip_download => {
                download_missing(manager, &mut resources, options.api_key.as_deref()).await?
            }
            _ => Vec::new(),
        };

        let build = BuildOptions {
            seed_fallback: options.seed_fallback,
        };
        let workflow = build_workflow_with(&metadata, &resources.resolved, &build)?;
        for warning in &workflow.warnings {
            warn!("{}", warning);
        }

        if let Some(store) = &store {
            store.save_metadata(&metadata)?;
            store.save_resources(&ResourcesDocument::from(&resources))?;
            store.save_workflow(&workflow.graph)?;
            info!("Saved run documents to {}", store.dir().display());
        }

        Ok(ReproductionReport {
            image_id,
            metadata,
            resources,
            downloads,
            workflow,
            output_dir: store.map(|s| s.dir().to_path_buf()),
        })
    }
}

/// Download every resolved artifact not yet on disk as one batch, folding
/// completed outcomes back into the report.
async fn download_missing(
    manager: &DownloadManager,
    resources: &mut ResolveReport,
    api_key: Option<&str>,
) -> Result<Vec<DownloadOutcome>> {
    let pending: Vec<usize> = resources
        .resolved
        .iter()
        .enumerate()
        .filter(|(_, a)| a.needs_download())
        .map(|(i, _)| i)
        .collect();
    if pending.is_empty() {
        info!("All resolved resources already present");
        return Ok(Vec::new());
    }

    let batch = pending.iter().map(|i| resources.resolved[*i].clone()).collect();
    let outcomes = manager.download_batch(batch, api_key).await?;
    for (index, outcome) in pending.iter().zip(&outcomes) {
        if outcome.is_completed() {
            resources.resolved[*index] = outcome.artifact.clone();
        }
    }
    Ok(outcomes)
}
