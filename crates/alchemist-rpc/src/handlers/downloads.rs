//! Download task handlers.

use super::shared::{get_bool_param, require_credential, require_param, require_str_param};
use crate::server::AppState;
use alchemist_core::{AlchemistError, ProgressEvent, ResolvedArtifact, TransferState};
use serde_json::{json, Value};

pub async fn start_download(state: &AppState, params: &Value) -> alchemist_core::Result<Value> {
    let api_key = require_credential(state, params)?;
    let artifact: ResolvedArtifact = require_param(params, "artifact", "artifact")?;

    let task_id = state.api.start_download(artifact, Some(&api_key))?;
    Ok(json!({ "task_id": task_id }))
}

pub async fn start_batch_download(
    state: &AppState,
    params: &Value,
) -> alchemist_core::Result<Value> {
    let api_key = require_credential(state, params)?;
    let artifacts: Vec<ResolvedArtifact> = require_param(params, "artifacts", "artifacts")?;

    let task_id = state.api.start_batch_download(artifacts, Some(&api_key))?;
    Ok(json!({ "task_id": task_id }))
}

/// Cancel one task by id, or every active task with `all: true`.
pub async fn cancel_download(state: &AppState, params: &Value) -> alchemist_core::Result<Value> {
    if get_bool_param(params, "all", "all").unwrap_or(false) {
        let cancelled = state.api.cancel_all_downloads();
        return Ok(json!({ "success": true, "cancelled": cancelled }));
    }

    let task_id = require_str_param(params, "task_id", "taskId")?;
    state.api.cancel_download(&task_id)?;
    Ok(json!({ "success": true, "cancelled": 1 }))
}

/// Latest progress event of a task. A registered task with no report yet is
/// pending.
pub async fn get_download_status(state: &AppState, params: &Value) -> alchemist_core::Result<Value> {
    let task_id = require_str_param(params, "task_id", "taskId")?;

    let event = match state.progress.latest(&task_id) {
        Some(event) => event,
        None if state.api.downloads().registry().contains(&task_id) => {
            ProgressEvent::new(&task_id, "", TransferState::Pending, 0, 0)
        }
        None => return Err(AlchemistError::TaskNotFound { task_id }),
    };
    Ok(serde_json::to_value(event)?)
}

pub async fn list_downloads(state: &AppState, _params: &Value) -> alchemist_core::Result<Value> {
    Ok(json!({ "tasks": state.api.downloads().active_tasks() }))
}
