//! Alchemist Core - Headless library for reproducing Civitai images locally.
//!
//! Given an image id, the library fetches its generation metadata, resolves
//! every referenced model (checkpoint, LoRA, VAE, upscaler) to a concrete
//! download, retrieves missing files with checksum verification and emits a
//! ComfyUI API-format workflow that regenerates the image.
//!
//! It can be used programmatically without the JSON-RPC server.
//!
//! # Example
//!
//! ```rust,ignore
//! use alchemist_core::{AlchemistApi, ReproduceOptions};
//!
//! #[tokio::main]
//! async fn main() -> alchemist_core::Result<()> {
//!     let api = AlchemistApi::builder()
//!         .api_key(Some("civitai-key"))
//!         .models_dir("./models")
//!         .build()?;
//!
//!     let report = api.reproduce("https://civitai.com/images/12345", &ReproduceOptions::default()).await?;
//!     println!(
//!         "{} resolved, {} unresolved, seed {}",
//!         report.resources.resolved_count,
//!         report.resources.unresolved_count,
//!         report.workflow.seed
//!     );
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod civitai;
pub mod config;
pub mod download;
pub mod error;
pub mod metadata;
pub mod model_library;
pub mod network;
pub mod pipeline;
pub mod resolver;
pub mod store;
pub mod workflow;

mod api;

// Re-export commonly used types
pub use api::{AlchemistApi, AlchemistApiBuilder};
pub use cancel::CancellationToken;
pub use civitai::{parse_image_ref, CivitaiClient, CivitaiSource, MemorySource};
pub use config::Settings;
pub use download::{
    BroadcastSink, DownloadManager, DownloadOutcome, ProgressEvent, ProgressSink, TaskRegistry,
    TransferState,
};
pub use error::{AlchemistError, Result};
pub use metadata::{CanonicalMetadata, ResourceReference, ResourceType, Size, Topology};
pub use model_library::{FsModelDirectory, ModelDirectory};
pub use pipeline::{ReproduceOptions, Reproducer, ReproductionReport};
pub use resolver::{ResolveReport, ResolvedArtifact, Resolver, ResourcesDocument};
pub use store::RunStore;
pub use workflow::{build_workflow, BuiltWorkflow, WorkflowGraph};
