//! Download manager.
//!
//! Streams resolved artifacts to disk through `.part` staging files with
//! SHA256 verification, throttled progress events and cooperative
//! cancellation. Tasks are keyed by opaque ids in a [`TaskRegistry`].

mod manager;
mod progress;
mod registry;
mod transfer;
mod types;

pub use manager::DownloadManager;
pub use progress::{BroadcastSink, NoopSink, ProgressSink};
pub use registry::TaskRegistry;
pub use transfer::{parse_disposition, part_path};
pub use types::{percent, DownloadOutcome, ProgressEvent, TransferState};
