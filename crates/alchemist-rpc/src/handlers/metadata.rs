//! Metadata, resolution and full reproduction handlers.

use super::shared::{
    get_bool_param, get_u64_param, parse_param, require_credential, require_image_ref,
};
use crate::server::AppState;
use alchemist_core::{
    AlchemistError, CanonicalMetadata, ReproduceOptions, ResourceReference, ResourcesDocument,
};
use serde_json::Value;
use tracing::info;

pub async fn fetch_metadata(state: &AppState, params: &Value) -> alchemist_core::Result<Value> {
    let api_key = require_credential(state, params)?;
    let image_ref = require_image_ref(params)?;

    let metadata = state.api.fetch_metadata(&image_ref, Some(&api_key)).await?;
    info!(
        "Fetched metadata for {} ({} resource(s))",
        image_ref,
        metadata.resources.len()
    );
    Ok(serde_json::to_value(metadata)?)
}

/// Resolve an explicit `resources` list, or the resources of a `metadata`
/// document.
pub async fn resolve_resources(state: &AppState, params: &Value) -> alchemist_core::Result<Value> {
    let api_key = require_credential(state, params)?;

    let references: Vec<ResourceReference> =
        match parse_param::<Vec<ResourceReference>>(params, "resources", "resources")? {
            Some(list) => list,
            None => parse_param::<CanonicalMetadata>(params, "metadata", "metadata")?
                .map(|m| m.resources)
                .ok_or_else(|| AlchemistError::InvalidParams {
                    message: "Missing required parameter: resources or metadata".to_string(),
                })?,
        };

    let report = state.api.resolve_resources(&references, Some(&api_key)).await;
    Ok(serde_json::to_value(ResourcesDocument::from(&report))?)
}

pub async fn reproduce(state: &AppState, params: &Value) -> alchemist_core::Result<Value> {
    let api_key = require_credential(state, params)?;
    let image_ref = require_image_ref(params)?;
    let options = ReproduceOptions {
        skip_download: get_bool_param(params, "skip_download", "skipDownload").unwrap_or(false),
        seed_fallback: get_u64_param(params, "seed", "seed"),
        api_key: Some(api_key),
    };

    let report = state.api.reproduce(&image_ref, &options).await?;
    Ok(serde_json::to_value(report)?)
}
