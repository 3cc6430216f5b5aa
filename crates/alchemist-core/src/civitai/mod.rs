//! Civitai platform access: wire types, the `CivitaiSource` trait, its HTTP
//! implementation and an in-memory snapshot source.

mod client;
mod memory;
mod types;

pub use client::{parse_image_ref, CivitaiClient, CivitaiClientBuilder, CivitaiSource};
pub use memory::MemorySource;
pub use types::{
    GenerationData, GenerationResource, ImageRecord, ModelSummary, ModelVersion,
    VersionFile, VersionModelInfo,
};
