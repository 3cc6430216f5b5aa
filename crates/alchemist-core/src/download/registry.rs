//! Active download task registry.

use crate::cancel::CancellationToken;
use crate::{AlchemistError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Running tasks keyed by task id, each with its cancellation token.
///
/// Owned by whoever starts downloads and shared by clone; entries are removed
/// when a task reaches a terminal state.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Fails if the id is already running.
    pub fn insert(&self, task_id: &str, token: CancellationToken) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        if tasks.contains_key(task_id) {
            return Err(AlchemistError::Validation {
                field: "task_id".to_string(),
                message: format!("task {} is already running", task_id),
            });
        }
        tasks.insert(task_id.to_string(), token);
        Ok(())
    }

    /// Request cancellation of one task. Repeated calls are harmless.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        let tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        match tasks.get(task_id) {
            Some(token) => {
                if token.cancel() {
                    debug!("Cancellation requested for task {}", task_id);
                }
                Ok(())
            }
            None => Err(AlchemistError::TaskNotFound {
                task_id: task_id.to_string(),
            }),
        }
    }

    /// Request cancellation of every task. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        for token in tasks.values() {
            token.cancel();
        }
        tasks.len()
    }

    pub fn remove(&self, task_id: &str) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(task_id)
            .is_some()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(task_id)
    }

    /// Ids of running tasks, sorted.
    pub fn active_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
