//! Download lifecycle types.

use crate::resolver::ResolvedArtifact;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-artifact transfer state.
///
/// `pending -> downloading -> verifying -> completed`; `cancelled` and
/// `failed` are reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Pending,
    Downloading,
    Verifying,
    Completed,
    Cancelled,
    Failed,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound progress notification. Best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: String,
    pub filename: String,
    pub status: TransferState,
    /// 0-100.
    pub progress: f64,
    pub downloaded_bytes: u64,
    /// 0 when the server did not declare a length.
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(
        task_id: impl Into<String>,
        filename: impl Into<String>,
        status: TransferState,
        downloaded_bytes: u64,
        total_bytes: u64,
    ) -> Self {
        let progress = match status {
            TransferState::Completed => 100.0,
            _ => percent(downloaded_bytes, total_bytes),
        };
        Self {
            task_id: task_id.into(),
            filename: filename.into(),
            status,
            progress,
            downloaded_bytes,
            total_bytes,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Percentage complete, clamped to 0-100. Zero when the total is unknown.
pub fn percent(downloaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((downloaded as f64 / total as f64) * 100.0).min(100.0)
}

/// Final result for one artifact of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub task_id: String,
    /// The artifact, with `already_present` and `target_path` updated after a
    /// successful write.
    pub artifact: ResolvedArtifact,
    pub status: TransferState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == TransferState::Completed
    }
}
