//! Latest-progress board for status polling.

use alchemist_core::{ProgressEvent, ProgressSink};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// Finished tasks remembered for late polls.
pub const FINISHED_CAPACITY: usize = 256;

/// Keeps the most recent [`ProgressEvent`] per task id.
///
/// Events are keyed by task, so for a batch the board shows whichever item
/// reported last. Running tasks are always kept; a task whose latest event
/// is terminal stays visible until `capacity` newer tasks have finished.
#[derive(Debug, Clone)]
pub struct ProgressBoard {
    inner: Arc<RwLock<Entries>>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct Entries {
    latest: HashMap<String, ProgressEvent>,
    /// Task ids whose latest event is terminal, oldest first.
    finished: VecDeque<String>,
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::with_capacity(FINISHED_CAPACITY)
    }
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Entries::default())),
            capacity,
        }
    }

    pub fn latest(&self, task_id: &str) -> Option<ProgressEvent> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .latest
            .get(task_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProgressSink for ProgressBoard {
    fn emit(&self, event: ProgressEvent) {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let entries = &mut *guard;
        // A late non-terminal report never overwrites a terminal one.
        if let Some(current) = entries.latest.get(&event.task_id) {
            if current.status.is_terminal()
                && !event.status.is_terminal()
                && current.filename == event.filename
            {
                return;
            }
        }

        let task_id = event.task_id.clone();
        let terminal = event.status.is_terminal();
        entries.latest.insert(task_id.clone(), event);
        entries.finished.retain(|id| *id != task_id);
        if terminal {
            entries.finished.push_back(task_id);
        }

        while entries.finished.len() > self.capacity {
            if let Some(oldest) = entries.finished.pop_front() {
                entries.latest.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alchemist_core::TransferState;

    #[test]
    fn test_board_keeps_latest_event_per_task() {
        let board = ProgressBoard::new();
        board.emit(ProgressEvent::new("t1", "a.safetensors", TransferState::Downloading, 10, 100));
        board.emit(ProgressEvent::new("t1", "a.safetensors", TransferState::Downloading, 60, 100));
        board.emit(ProgressEvent::new("t2", "b.safetensors", TransferState::Downloading, 1, 4));

        assert_eq!(board.len(), 2);
        assert_eq!(board.latest("t1").unwrap().progress, 60.0);
        assert_eq!(board.latest("t2").unwrap().progress, 25.0);
        assert!(board.latest("t3").is_none());
    }

    #[test]
    fn test_terminal_state_sticks_for_same_file() {
        let board = ProgressBoard::new();
        board.emit(ProgressEvent::new("t1", "a.safetensors", TransferState::Completed, 8, 8));
        board.emit(ProgressEvent::new("t1", "a.safetensors", TransferState::Verifying, 8, 8));
        assert_eq!(board.latest("t1").unwrap().status, TransferState::Completed);

        // The next item of a batch replaces it.
        board.emit(ProgressEvent::new("t1", "b.safetensors", TransferState::Downloading, 0, 8));
        assert_eq!(board.latest("t1").unwrap().filename, "b.safetensors");
    }

    #[test]
    fn test_oldest_finished_tasks_are_evicted() {
        let board = ProgressBoard::with_capacity(2);
        board.emit(ProgressEvent::new("running", "r.safetensors", TransferState::Downloading, 1, 8));
        for id in ["t1", "t2", "t3"] {
            board.emit(ProgressEvent::new(id, "a.safetensors", TransferState::Completed, 8, 8));
        }

        assert!(board.latest("t1").is_none());
        assert!(board.latest("t2").is_some());
        assert!(board.latest("t3").is_some());
        assert_eq!(board.latest("running").unwrap().status, TransferState::Downloading);
        assert_eq!(board.len(), 3);
    }

    #[test]
    fn test_batch_item_completion_does_not_count_twice() {
        let board = ProgressBoard::with_capacity(1);
        board.emit(ProgressEvent::new("batch", "a.safetensors", TransferState::Completed, 8, 8));
        board.emit(ProgressEvent::new("batch", "b.safetensors", TransferState::Downloading, 0, 8));
        board.emit(ProgressEvent::new("other", "c.safetensors", TransferState::Completed, 8, 8));

        // "batch" is running again, so only "other" counts as finished.
        assert_eq!(board.latest("batch").unwrap().filename, "b.safetensors");
        assert!(board.latest("other").is_some());
    }
}
