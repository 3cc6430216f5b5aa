//! Background download tasks over resolved artifacts.

use super::progress::{NoopSink, ProgressSink};
use super::registry::TaskRegistry;
use super::transfer::Transfer;
use super::types::{DownloadOutcome, ProgressEvent, TransferState};
use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::resolver::ResolvedArtifact;
use crate::{AlchemistError, Result};
use reqwest::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Starts, tracks and cancels download tasks.
///
/// Each task covers one or more artifacts downloaded strictly in order.
/// Distinct tasks run independently.
pub struct DownloadManager {
    worker: Worker,
    registry: TaskRegistry,
}

/// State shared by spawned tasks.
#[derive(Clone)]
struct Worker {
    client: Client,
    sink: Arc<dyn ProgressSink>,
    api_key: Option<String>,
}

impl DownloadManager {
    /// Create a manager with its own registry and no progress sink.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        // No total timeout: model files take minutes.
        let client = Client::builder()
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| AlchemistError::Network {
                message: format!("Failed to create download client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            worker: Worker {
                client,
                sink: Arc::new(NoopSink),
                api_key: api_key.filter(|k| !k.is_empty()),
            },
            registry: TaskRegistry::new(),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.worker.sink = sink;
        self
    }

    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Start a single-artifact task in the background.
    pub fn start_single(&self, artifact: ResolvedArtifact, api_key: Option<&str>) -> Result<String> {
        self.start_batch(vec![artifact], api_key)
    }

    /// Start a sequential batch task in the background.
    pub fn start_batch(
        &self,
        artifacts: Vec<ResolvedArtifact>,
        api_key: Option<&str>,
    ) -> Result<String> {
        let (task_id, _handle) = self.spawn_batch(artifacts, api_key)?;
        Ok(task_id)
    }

    /// Start a batch and return its join handle alongside the task id.
    pub fn spawn_batch(
        &self,
        artifacts: Vec<ResolvedArtifact>,
        api_key: Option<&str>,
    ) -> Result<(String, JoinHandle<Vec<DownloadOutcome>>)> {
        validate(&artifacts)?;
        let (task_id, token) = self.register()?;
        let worker = self.worker_for(api_key);
        let registry = self.registry.clone();
        let id = task_id.clone();

        info!("Starting download task {} ({} artifact(s))", task_id, artifacts.len());
        let handle = tokio::spawn(async move {
            let outcomes = worker.run(&id, &token, artifacts).await;
            registry.remove(&id);
            outcomes
        });
        Ok((task_id, handle))
    }

    /// Run a batch in the foreground. The task is registered, and so
    /// cancellable, for its duration.
    pub async fn download_batch(
        &self,
        artifacts: Vec<ResolvedArtifact>,
        api_key: Option<&str>,
    ) -> Result<Vec<DownloadOutcome>> {
        validate(&artifacts)?;
        let (task_id, token) = self.register()?;
        info!("Downloading batch {} ({} artifact(s))", task_id, artifacts.len());
        let outcomes = self.worker_for(api_key).run(&task_id, &token, artifacts).await;
        self.registry.remove(&task_id);
        Ok(outcomes)
    }

    /// Cancel one task. Unknown or finished ids report `TaskNotFound`.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        self.registry.cancel(task_id)
    }

    pub fn cancel_all(&self) -> usize {
        self.registry.cancel_all()
    }

    pub fn active_tasks(&self) -> Vec<String> {
        self.registry.active_tasks()
    }

    fn register(&self) -> Result<(String, CancellationToken)> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        self.registry.insert(&task_id, token.clone())?;
        Ok((task_id, token))
    }

    fn worker_for(&self, api_key: Option<&str>) -> Worker {
        let mut worker = self.worker.clone();
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            worker.api_key = Some(key.to_string());
        }
        worker
    }
}

/// Reject malformed requests before any item starts.
fn validate(artifacts: &[ResolvedArtifact]) -> Result<()> {
    if artifacts.is_empty() {
        return Err(AlchemistError::InvalidParams {
            message: "no artifacts to download".to_string(),
        });
    }
    for artifact in artifacts {
        if !artifact.resolved {
            return Err(AlchemistError::Validation {
                field: "artifacts".to_string(),
                message: format!("{} is not resolved", artifact.label()),
            });
        }
        if !artifact.already_present && !artifact.is_downloadable() {
            return Err(AlchemistError::Validation {
                field: "artifacts".to_string(),
                message: format!(
                    "{} lacks a filename, download URL or target path",
                    artifact.label()
                ),
            });
        }
    }
    Ok(())
}

impl Worker {
    async fn run(
        &self,
        task_id: &str,
        token: &CancellationToken,
        artifacts: Vec<ResolvedArtifact>,
    ) -> Vec<DownloadOutcome> {
        let mut outcomes = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let outcome = self.run_one(task_id, token, artifact).await;
            outcomes.push(outcome);
        }

        let completed = outcomes.iter().filter(|o| o.is_completed()).count();
        info!(
            "Task {} finished: {} of {} artifact(s) completed",
            task_id,
            completed,
            outcomes.len()
        );
        outcomes
    }

    async fn run_one(
        &self,
        task_id: &str,
        token: &CancellationToken,
        mut artifact: ResolvedArtifact,
    ) -> DownloadOutcome {
        let label = artifact.label();

        if token.is_cancelled() {
            return self.finish(task_id, artifact, TransferState::Cancelled, 0, None);
        }

        let on_disk = artifact
            .target_path
            .as_deref()
            .is_some_and(|p| p.is_file());
        if artifact.already_present || on_disk {
            info!("{} already present, skipping download", label);
            artifact.already_present = true;
            return self.finish(task_id, artifact, TransferState::Completed, 0, None);
        }

        let transfer = Transfer {
            client: &self.client,
            task_id,
            artifact: &artifact,
            api_key: self.api_key.as_deref(),
            cancel: token,
            sink: self.sink.as_ref(),
        };

        match transfer.run().await {
            Ok(done) => {
                let bytes = done.bytes;
                artifact.already_present = true;
                artifact.target_path = Some(done.path);
                artifact.filename = Some(done.filename);
                if artifact.sha256.is_none() {
                    artifact.sha256 = Some(done.sha256);
                }
                self.finish(task_id, artifact, TransferState::Completed, bytes, None)
            }
            Err(AlchemistError::DownloadCancelled) => {
                warn!("Download of {} cancelled", label);
                self.finish(task_id, artifact, TransferState::Cancelled, 0, None)
            }
            Err(e) => {
                error!("Download of {} failed: {}", label, e);
                self.finish(task_id, artifact, TransferState::Failed, 0, Some(e.to_string()))
            }
        }
    }

    fn finish(
        &self,
        task_id: &str,
        artifact: ResolvedArtifact,
        status: TransferState,
        bytes: u64,
        error: Option<String>,
    ) -> DownloadOutcome {
        let mut event = ProgressEvent::new(task_id, artifact.label(), status, bytes, bytes);
        if let Some(message) = &error {
            event = event.with_error(message.clone());
        }
        self.sink.emit(event);

        DownloadOutcome {
            task_id: task_id.to_string(),
            artifact,
            status,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ResourceReference, ResourceType};

    fn unresolved() -> ResolvedArtifact {
        ResolvedArtifact::unresolved(
            ResourceReference::new("x", ResourceType::Lora, None, None, None),
            "Could not resolve resource",
        )
    }

    #[tokio::test]
    async fn test_empty_and_unresolved_batches_are_rejected() {
        let manager = DownloadManager::new(None).unwrap();
        assert!(matches!(
            manager.start_batch(Vec::new(), None),
            Err(AlchemistError::InvalidParams { .. })
        ));
        assert!(matches!(
            manager.start_single(unresolved(), None),
            Err(AlchemistError::Validation { .. })
        ));
        assert!(manager.active_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_not_found() {
        let manager = DownloadManager::new(Some("key".into())).unwrap();
        assert!(matches!(
            manager.cancel("nope"),
            Err(AlchemistError::TaskNotFound { .. })
        ));
        assert_eq!(manager.cancel_all(), 0);
    }
}
