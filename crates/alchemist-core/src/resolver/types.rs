//! Resolution results.

use crate::metadata::{ResourceReference, ResourceType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Strategy that produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMethod {
    VersionId,
    Hash,
    NameSearch,
}

impl fmt::Display for ResolveMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::VersionId => "version_id",
            Self::Hash => "hash",
            Self::NameSearch => "name_search",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    NotFound,
    NoMatch,
    Error,
}

/// One entry of the per-reference attempt log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub method: ResolveMethod,
    pub query: String,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

impl fmt::Display for StrategyAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ", self.method, self.query)?;
        match (&self.status, &self.detail) {
            (AttemptStatus::Success, _) => f.write_str("ok"),
            (AttemptStatus::NotFound, _) => f.write_str("not found"),
            (AttemptStatus::NoMatch, Some(d)) => write!(f, "no match ({})", d),
            (AttemptStatus::NoMatch, None) => f.write_str("no match"),
            (AttemptStatus::Error, Some(d)) => write!(f, "error: {}", d),
            (AttemptStatus::Error, None) => f.write_str("error"),
        }
    }
}

/// A resource reference augmented with a concrete download.
///
/// When `resolved` is true, `filename`, `download_url` and `target_path` are
/// set. When false, `error` says why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedArtifact {
    #[serde(flatten)]
    pub reference: ResourceReference,
    #[serde(default)]
    pub model_id: Option<u64>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size_kb: Option<f64>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub target_path: Option<PathBuf>,
    #[serde(default, alias = "already_downloaded")]
    pub already_present: bool,
    #[serde(default)]
    pub resolve_method: Option<ResolveMethod>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<StrategyAttempt>,
}

impl ResolvedArtifact {
    /// An unresolved artifact carrying `error`.
    pub fn unresolved(reference: ResourceReference, error: impl Into<String>) -> Self {
        Self {
            reference,
            model_id: None,
            filename: None,
            size_kb: None,
            download_url: None,
            sha256: None,
            target_path: None,
            already_present: false,
            resolve_method: None,
            resolved: false,
            error: Some(error.into()),
            attempts: Vec::new(),
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.reference.resource_type
    }

    pub fn name(&self) -> &str {
        &self.reference.name
    }

    /// Resolved and carrying everything a download needs.
    pub fn is_downloadable(&self) -> bool {
        self.resolved
            && self.filename.as_deref().is_some_and(|f| !f.is_empty())
            && self.download_url.as_deref().is_some_and(|u| !u.is_empty())
            && self.target_path.is_some()
    }

    /// Resolved but not yet on disk.
    pub fn needs_download(&self) -> bool {
        self.is_downloadable() && !self.already_present
    }

    /// Display label for logs and progress events.
    pub fn label(&self) -> String {
        self.filename
            .clone()
            .unwrap_or_else(|| self.reference.name.clone())
    }
}

/// Batched resolution result. Resolved entries come first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolveReport {
    pub resolved: Vec<ResolvedArtifact>,
    pub unresolved: Vec<ResolvedArtifact>,
    pub resolved_count: usize,
    pub unresolved_count: usize,
}

impl ResolveReport {
    pub fn from_artifacts(artifacts: impl IntoIterator<Item = ResolvedArtifact>) -> Self {
        let (resolved, unresolved): (Vec<_>, Vec<_>) =
            artifacts.into_iter().partition(|a| a.resolved);
        Self {
            resolved_count: resolved.len(),
            unresolved_count: unresolved.len(),
            resolved,
            unresolved,
        }
    }

    /// All artifacts, resolved first.
    pub fn resources(&self) -> impl Iterator<Item = &ResolvedArtifact> {
        self.resolved.iter().chain(self.unresolved.iter())
    }

    pub fn into_resources(self) -> Vec<ResolvedArtifact> {
        let mut all = self.resolved;
        all.extend(self.unresolved);
        all
    }

    pub fn to_download(&self) -> Vec<ResolvedArtifact> {
        self.resolved
            .iter()
            .filter(|a| a.needs_download())
            .cloned()
            .collect()
    }
}

/// On-disk form of a resolution (`resources.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesDocument {
    pub resources: Vec<ResolvedArtifact>,
    #[serde(default)]
    pub resolved_count: usize,
    #[serde(default)]
    pub unresolved_count: usize,
}

impl From<&ResolveReport> for ResourcesDocument {
    fn from(report: &ResolveReport) -> Self {
        Self {
            resources: report.resources().cloned().collect(),
            resolved_count: report.resolved_count,
            unresolved_count: report.unresolved_count,
        }
    }
}

impl From<ResourcesDocument> for ResolveReport {
    fn from(doc: ResourcesDocument) -> Self {
        ResolveReport::from_artifacts(doc.resources)
    }
}
