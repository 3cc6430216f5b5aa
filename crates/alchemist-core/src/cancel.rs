//! Cooperative cancellation for download tasks.
//!
//! A `CancellationToken` is a shared flag. The download manager checks it at
//! chunk boundaries and between batch items, so cancellation takes effect at
//! the next boundary rather than mid-chunk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag. Clones observe the same state.
///
/// # Example
///
/// ```
/// use alchemist_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_view = token.clone();
///
/// token.cancel();
/// assert!(worker_view.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    ///
    /// Returns `true` if this call flipped the flag, `false` if the token was
    /// already cancelled.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `DownloadCancelled` if cancellation was requested.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::AlchemistError::DownloadCancelled)
        } else {
            Ok(())
        }
    }
}
