//! Workflow building handler.

use super::shared::{get_u64_param, require_param};
use crate::server::AppState;
use alchemist_core::{AlchemistError, CanonicalMetadata, ResolvedArtifact, ResourcesDocument};
use serde_json::Value;

/// Build a graph from `metadata` and `resources`, where `resources` is either
/// an artifact list or a whole resolve response.
pub async fn build_workflow(state: &AppState, params: &Value) -> alchemist_core::Result<Value> {
    let metadata: CanonicalMetadata = require_param(params, "metadata", "metadata")?;
    let artifacts = artifacts_param(params)?;
    let seed = get_u64_param(params, "seed", "seed");

    let built = state.api.build_workflow(&metadata, &artifacts, seed)?;
    Ok(serde_json::to_value(built)?)
}

fn artifacts_param(params: &Value) -> alchemist_core::Result<Vec<ResolvedArtifact>> {
    let invalid = |e: serde_json::Error| AlchemistError::InvalidParams {
        message: format!("Invalid parameter resources: {}", e),
    };
    match params.get("resources") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(list @ Value::Array(_)) => serde_json::from_value(list.clone()).map_err(invalid),
        Some(doc) => serde_json::from_value::<ResourcesDocument>(doc.clone())
            .map(|d| d.resources)
            .map_err(invalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resources_accept_list_or_document() {
        let artifact = json!({
            "name": "Dream", "type": "checkpoint", "filename": "dream.safetensors",
            "resolved": true
        });

        let from_list = artifacts_param(&json!({"resources": [artifact.clone()]})).unwrap();
        assert_eq!(from_list.len(), 1);

        let from_doc = artifacts_param(&json!({
            "resources": {"resources": [artifact], "resolved_count": 1, "unresolved_count": 0}
        }))
        .unwrap();
        assert_eq!(from_doc[0].filename.as_deref(), Some("dream.safetensors"));

        assert!(artifacts_param(&json!({})).unwrap().is_empty());
        assert!(artifacts_param(&json!({"resources": 3})).is_err());
    }
}
