//! Resource resolver.
//!
//! Converts each [`ResourceReference`] into a [`ResolvedArtifact`] by trying
//! version-id lookup, hash lookup and name search in that order, stopping at
//! the first success. Failures are recorded per reference and never abort a
//! batch.

mod strategy;
mod types;

pub use strategy::{plan, Candidate, Outcome, Strategy};
pub use types::{
    AttemptStatus, ResolveMethod, ResolveReport, ResolvedArtifact, ResourcesDocument,
    StrategyAttempt,
};

use crate::civitai::CivitaiSource;
use crate::config::CivitaiConfig;
use crate::metadata::{is_placeholder_name, ResourceReference, ResourceType};
use crate::model_library::{sanitize_filename, ModelDirectory};
use std::path::Path;
use tracing::{debug, info, warn};

/// Resolves references against a platform source and a model directory.
pub struct Resolver<'a> {
    source: &'a dyn CivitaiSource,
    directory: &'a dyn ModelDirectory,
}

impl<'a> Resolver<'a> {
    pub fn new(source: &'a dyn CivitaiSource, directory: &'a dyn ModelDirectory) -> Self {
        Self { source, directory }
    }

    /// Resolve one reference.
    pub async fn resolve(&self, reference: &ResourceReference) -> ResolvedArtifact {
        let mut attempts = Vec::new();

        for strategy in plan(reference) {
            match strategy::run(&strategy, self.source).await {
                Outcome::Found(candidate, attempt) => {
                    attempts.push(attempt);
                    match self.fill(reference, candidate, strategy.method()) {
                        Some(mut artifact) => {
                            debug!(
                                "[{}] resolved via {} -> {:?}",
                                reference.name,
                                strategy.method(),
                                artifact.filename
                            );
                            artifact.attempts = attempts;
                            return artifact;
                        }
                        None => {
                            if let Some(last) = attempts.last_mut() {
                                last.status = AttemptStatus::NoMatch;
                                last.detail = Some("version has no downloadable file".into());
                            }
                        }
                    }
                }
                Outcome::Missed(attempt) => attempts.push(attempt),
                Outcome::Abort(err, attempt) => {
                    attempts.push(attempt);
                    warn!("[{}] resolution aborted: {}", reference.name, err);
                    let mut artifact = ResolvedArtifact::unresolved(
                        reference.clone(),
                        format!("{} (tried: {})", err, describe(&attempts)),
                    );
                    artifact.attempts = attempts;
                    return artifact;
                }
            }
        }

        let error = if attempts.is_empty() {
            "Could not resolve resource: no version id, hash or name to search".to_string()
        } else {
            format!("Could not resolve resource (tried: {})", describe(&attempts))
        };
        debug!("[{}] unresolved: {}", reference.name, error);
        let mut artifact = ResolvedArtifact::unresolved(reference.clone(), error);
        artifact.attempts = attempts;
        artifact
    }

    /// Resolve a batch. Resolved entries come first in the report.
    pub async fn resolve_all(&self, references: &[ResourceReference]) -> ResolveReport {
        self.resolve_all_reusing(references, &[]).await
    }

    /// Resolve a batch, reusing matching resolved artifacts from a previous run.
    ///
    /// A previous artifact matches on version id when the reference has one,
    /// otherwise on name and type. Reused artifacts get their local presence
    /// re-checked; no network lookup is made for them.
    pub async fn resolve_all_reusing(
        &self,
        references: &[ResourceReference],
        previous: &[ResolvedArtifact],
    ) -> ResolveReport {
        let mut artifacts = Vec::with_capacity(references.len());
        for reference in references {
            let artifact = match reuse(reference, previous) {
                Some(prior) => {
                    debug!("[{}] reusing previous resolution", reference.name);
                    self.recheck_presence(prior)
                }
                None => self.resolve(reference).await,
            };
            artifacts.push(artifact);
        }

        let report = ResolveReport::from_artifacts(artifacts);
        info!(
            "Resolved {} of {} resource(s)",
            report.resolved_count,
            references.len()
        );
        report
    }

    fn fill(
        &self,
        reference: &ResourceReference,
        candidate: Candidate,
        method: ResolveMethod,
    ) -> Option<ResolvedArtifact> {
        let version = &candidate.version;
        let file = version.primary_file()?;
        let filename = sanitize_filename(&file.name)?;

        let version_model = version.model.as_ref();
        let resource_type = [
            candidate.search_type.as_deref(),
            version_model.and_then(|m| m.model_type.as_deref()),
        ]
        .into_iter()
        .flatten()
        .map(ResourceType::from_platform_label)
        .find(ResourceType::is_known)
        .unwrap_or(reference.resource_type);

        let version_id = Some(version.id)
            .filter(|id| *id > 0)
            .or(reference.model_version_id);
        let download_url = file
            .download_url
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| version_id.map(CivitaiConfig::download_url))?;

        let mut name = reference.name.clone();
        if is_placeholder_name(&name) {
            name = candidate
                .model_name
                .clone()
                .or_else(|| version_model.and_then(|m| m.name.clone()))
                .filter(|n| !is_placeholder_name(n))
                .unwrap_or_else(|| file_stem(&filename));
        }

        let (target_path, already_present) = self.locate(resource_type, &filename);

        Some(ResolvedArtifact {
            reference: ResourceReference::new(
                name,
                resource_type,
                reference.weight,
                reference.hash.clone(),
                version_id,
            ),
            model_id: candidate
                .model_id
                .or(version.model_id)
                .or_else(|| version_model.and_then(|m| m.id)),
            filename: Some(filename),
            size_kb: file.size_kb,
            download_url: Some(download_url),
            sha256: file.sha256().map(str::to_string),
            target_path: Some(target_path),
            already_present,
            resolve_method: Some(method),
            resolved: true,
            error: None,
            attempts: Vec::new(),
        })
    }

    fn locate(&self, resource_type: ResourceType, filename: &str) -> (std::path::PathBuf, bool) {
        match self.directory.find(filename, resource_type) {
            Some(found) => (found, true),
            None => (self.directory.target_path(resource_type, filename), false),
        }
    }

    fn recheck_presence(&self, mut artifact: ResolvedArtifact) -> ResolvedArtifact {
        let on_disk = artifact.target_path.as_deref().is_some_and(Path::is_file);
        if !on_disk {
            if let Some(filename) = artifact.filename.clone() {
                let (path, present) = self.locate(artifact.resource_type(), &filename);
                artifact.target_path = Some(path);
                artifact.already_present = present;
            }
        } else {
            artifact.already_present = true;
        }
        artifact
    }
}

fn reuse(reference: &ResourceReference, previous: &[ResolvedArtifact]) -> Option<ResolvedArtifact> {
    previous
        .iter()
        .filter(|a| a.is_downloadable())
        .find(|a| match reference.model_version_id {
            Some(id) => a.reference.model_version_id == Some(id),
            None => {
                !is_placeholder_name(&reference.name)
                    && a.reference.name == reference.name
                    && a.reference.resource_type == reference.resource_type
            }
        })
        .cloned()
}

fn describe(attempts: &[StrategyAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}
