//! Metadata normalizer.
//!
//! Turns a loosely typed platform image record into [`CanonicalMetadata`]
//! with an ordered list of [`ResourceReference`]s.

mod normalize;
mod types;

pub use normalize::{
    enrich_metadata, extract_metadata, normalize, resources_from_civitai_resources,
    resources_from_generation_data, resources_from_meta_resources, ResourceSource,
};
pub use types::{
    is_placeholder_name, CanonicalMetadata, ResourceReference, ResourceType, Size, Topology,
};
