//! Resolution strategies.
//!
//! Each strategy is a standalone async function from a query to an
//! [`Outcome`]; the resolver threads them through an attempt log.

use crate::civitai::{CivitaiSource, ModelVersion};
use crate::config::CivitaiConfig;
use crate::metadata::{is_placeholder_name, ResourceReference};
use crate::resolver::types::{AttemptStatus, ResolveMethod, StrategyAttempt};
use crate::AlchemistError;

/// A strategy to try, with its query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    VersionId(u64),
    Hash(String),
    NameSearch(String),
}

impl Strategy {
    pub fn method(&self) -> ResolveMethod {
        match self {
            Self::VersionId(_) => ResolveMethod::VersionId,
            Self::Hash(_) => ResolveMethod::Hash,
            Self::NameSearch(_) => ResolveMethod::NameSearch,
        }
    }

    pub fn query(&self) -> String {
        match self {
            Self::VersionId(id) => id.to_string(),
            Self::Hash(hash) => hash.clone(),
            Self::NameSearch(name) => name.clone(),
        }
    }

    fn attempt(&self, status: AttemptStatus, detail: Option<String>) -> StrategyAttempt {
        StrategyAttempt {
            method: self.method(),
            query: self.query(),
            status,
            detail,
            candidates: Vec::new(),
        }
    }
}

/// Ordered strategies for a reference: version id, then hash, then name.
///
/// Name search is skipped for placeholder names; searching for "unknown"
/// only ever matches unrelated models.
pub fn plan(reference: &ResourceReference) -> Vec<Strategy> {
    let mut strategies = Vec::with_capacity(3);
    if let Some(id) = reference.model_version_id.filter(|id| *id > 0) {
        strategies.push(Strategy::VersionId(id));
    }
    if let Some(hash) = reference.hash.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        strategies.push(Strategy::Hash(hash.to_string()));
    }
    if !is_placeholder_name(&reference.name) {
        strategies.push(Strategy::NameSearch(reference.name.trim().to_string()));
    }
    strategies
}

/// Version data found by a strategy, plus what the strategy knows beyond it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub version: ModelVersion,
    pub model_id: Option<u64>,
    pub model_name: Option<String>,
    /// Model type reported by a name search.
    pub search_type: Option<String>,
}

impl Candidate {
    fn from_version(version: ModelVersion) -> Self {
        Self {
            version,
            model_id: None,
            model_name: None,
            search_type: None,
        }
    }
}

/// Result of one strategy.
#[derive(Debug)]
pub enum Outcome {
    Found(Candidate, StrategyAttempt),
    Missed(StrategyAttempt),
    /// Resolution of this reference cannot continue.
    Abort(AlchemistError, StrategyAttempt),
}

/// Run one strategy against the platform.
pub async fn run(strategy: &Strategy, source: &dyn CivitaiSource) -> Outcome {
    match strategy {
        Strategy::VersionId(id) => lookup(strategy, source.get_model_version(*id).await),
        Strategy::Hash(hash) => lookup(strategy, source.get_model_version_by_hash(hash).await),
        Strategy::NameSearch(name) => search(strategy, name, source).await,
    }
}

fn lookup(strategy: &Strategy, result: crate::Result<Option<ModelVersion>>) -> Outcome {
    match result {
        Ok(Some(version)) => Outcome::Found(
            Candidate::from_version(version),
            strategy.attempt(AttemptStatus::Success, None),
        ),
        Ok(None) => Outcome::Missed(strategy.attempt(AttemptStatus::NotFound, None)),
        Err(e) => failed(strategy, e),
    }
}

async fn search(strategy: &Strategy, name: &str, source: &dyn CivitaiSource) -> Outcome {
    let models = match source
        .search_models(name, CivitaiConfig::NAME_SEARCH_LIMIT)
        .await
    {
        Ok(models) => models,
        Err(e) => return failed(strategy, e),
    };

    let wanted = name.to_lowercase();
    let matched = models.iter().find_map(|model| {
        let candidate = model.name.to_lowercase();
        let overlaps = !candidate.is_empty()
            && (candidate.contains(&wanted) || wanted.contains(&candidate));
        let version = model.model_versions.first()?;
        overlaps.then(|| (model, version.clone()))
    });

    match matched {
        Some((model, version)) => {
            let mut attempt = strategy.attempt(AttemptStatus::Success, None);
            attempt.detail = Some(format!("matched '{}'", model.name));
            Outcome::Found(
                Candidate {
                    version,
                    model_id: Some(model.id).filter(|id| *id > 0),
                    model_name: Some(model.name.clone()),
                    search_type: model.model_type.clone(),
                },
                attempt,
            )
        }
        None => {
            let mut attempt = strategy.attempt(AttemptStatus::NoMatch, None);
            attempt.candidates = models.iter().map(|m| m.name.clone()).collect();
            Outcome::Missed(attempt)
        }
    }
}

fn failed(strategy: &Strategy, err: AlchemistError) -> Outcome {
    let attempt = strategy.attempt(AttemptStatus::Error, Some(err.to_string()));
    if err.is_auth() {
        Outcome::Abort(err, attempt)
    } else {
        Outcome::Missed(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civitai::{MemorySource, ModelSummary};
    use crate::metadata::ResourceType;

    fn reference(name: &str, hash: Option<&str>, version: Option<u64>) -> ResourceReference {
        ResourceReference::new(name, ResourceType::Lora, None, hash.map(str::to_string), version)
    }

    #[test]
    fn test_plan_orders_version_before_hash_and_name() {
        let plan = plan(&reference("Detail Tweaker", Some("ABC"), Some(5)));
        assert_eq!(
            plan,
            vec![
                Strategy::VersionId(5),
                Strategy::Hash("ABC".into()),
                Strategy::NameSearch("Detail Tweaker".into()),
            ]
        );
    }

    #[test]
    fn test_plan_skips_placeholder_name() {
        assert_eq!(plan(&reference("Unknown", None, Some(1))), vec![Strategy::VersionId(1)]);
        assert!(plan(&reference("unknown", None, None)).is_empty());
    }

    #[tokio::test]
    async fn test_search_accepts_substring_either_direction() {
        let source = MemorySource::new().with_search(
            "Detail Tweaker LoRA",
            vec![
                ModelSummary {
                    id: 1,
                    name: "Unrelated".into(),
                    model_versions: vec![ModelVersion::default()],
                    ..Default::default()
                },
                ModelSummary {
                    id: 2,
                    name: "Detail Tweaker".into(),
                    model_type: Some("LORA".into()),
                    model_versions: vec![ModelVersion {
                        id: 77,
                        ..Default::default()
                    }],
                },
            ],
        );

        let outcome = run(&Strategy::NameSearch("Detail Tweaker LoRA".into()), &source).await;
        match outcome {
            Outcome::Found(candidate, attempt) => {
                assert_eq!(candidate.version.id, 77);
                assert_eq!(candidate.model_id, Some(2));
                assert_eq!(candidate.search_type.as_deref(), Some("LORA"));
                assert_eq!(attempt.status, AttemptStatus::Success);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_skips_models_without_versions() {
        let source = MemorySource::new().with_search(
            "ink",
            vec![ModelSummary {
                id: 3,
                name: "Ink Style".into(),
                ..Default::default()
            }],
        );

        match run(&Strategy::NameSearch("ink".into()), &source).await {
            Outcome::Missed(attempt) => {
                assert_eq!(attempt.status, AttemptStatus::NoMatch);
                assert_eq!(attempt.candidates, vec!["Ink Style".to_string()]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auth_error_aborts() {
        let source = MemorySource::new().rejecting_credentials();
        assert!(matches!(
            run(&Strategy::VersionId(1), &source).await,
            Outcome::Abort(..)
        ));
    }

    #[tokio::test]
    async fn test_transport_error_is_recorded_miss() {
        let source = MemorySource::new().with_failing_version(9);
        match run(&Strategy::VersionId(9), &source).await {
            Outcome::Missed(attempt) => {
                assert_eq!(attempt.status, AttemptStatus::Error);
                assert!(attempt.detail.unwrap().contains("connection reset"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
