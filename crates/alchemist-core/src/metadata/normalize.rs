//! Raw image record to [`CanonicalMetadata`].
//!
//! Extraction is pure. Resource enrichment walks a fixed-priority chain of
//! sources and keeps the first non-empty one; sources are never merged.

use crate::civitai::{CivitaiSource, GenerationData, ImageRecord};
use crate::metadata::types::{
    CanonicalMetadata, ResourceReference, ResourceType, Size, Topology,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Which source populated `CanonicalMetadata::resources`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceSource {
    /// Server-resolved generation data (tRPC).
    GenerationData,
    /// Embedded `civitaiResources`.
    CivitaiResources,
    /// Embedded `resources` plus the `hashes` map.
    MetaResources,
    None,
}

/// Extract canonical metadata from an image record, without resources.
pub fn extract_metadata(record: &ImageRecord) -> CanonicalMetadata {
    let meta = unwrap_meta(record.meta.as_ref());

    let record_size = match (record.width, record.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some(Size::new(w, h)),
        _ => None,
    };

    let mut size = str_field(&meta, "Size")
        .and_then(|s| Size::parse(&s))
        .or(record_size)
        .unwrap_or_default();
    let mut base_size = size;

    let workflow_type = str_field(&meta, "workflow");
    let topology = Topology::from_workflow_tag(workflow_type.as_deref());
    if topology == Topology::TwoPassUpscale {
        // Inner width/height describe the first pass; the record itself
        // carries the final upscaled dimensions.
        if let (Some(w), Some(h)) = (u64_field(&meta, "width"), u64_field(&meta, "height")) {
            if let (Ok(w), Ok(h)) = (u32::try_from(w), u32::try_from(h)) {
                base_size = Size::new(w, h);
            }
        }
        if let Some(final_size) = record_size {
            size = final_size;
        }
    }

    let clip_skip = i64_field(&meta, "Clip skip")
        .filter(|v| *v != 0)
        .or_else(|| i64_field(&meta, "clipSkip"));

    CanonicalMetadata {
        image_id: Some(record.id).filter(|id| *id > 0),
        image_url: record.url.clone(),
        prompt: str_field(&meta, "prompt").unwrap_or_default(),
        negative_prompt: str_field(&meta, "negativePrompt").unwrap_or_default(),
        sampler: str_field(&meta, "sampler").unwrap_or_default(),
        schedule_type: str_field(&meta, "Schedule type"),
        steps: u64_field(&meta, "steps").and_then(|v| u32::try_from(v).ok()),
        cfg_scale: f64_field(&meta, "cfgScale"),
        seed: u64_field(&meta, "seed"),
        size,
        base_size,
        model_name: str_field(&meta, "Model").unwrap_or_default(),
        model_hash: str_field(&meta, "Model hash").unwrap_or_default(),
        clip_skip,
        resources: Vec::new(),
        workflow_type,
        topology,
        denoise: f64_field(&meta, "denoise"),
        upscalers: upscaler_hints(&meta),
        raw_meta: Value::Object(meta),
    }
}

/// Populate `metadata.resources` from the first source that yields any.
///
/// A failing generation-data lookup is logged and treated as empty so the
/// embedded sources still get a chance.
pub async fn enrich_metadata(
    metadata: &mut CanonicalMetadata,
    source: &dyn CivitaiSource,
) -> ResourceSource {
    let mut chosen = ResourceSource::None;
    let mut resources = Vec::new();

    if let Some(image_id) = metadata.image_id {
        match source.get_generation_data(image_id).await {
            Ok(Some(data)) => {
                resources = resources_from_generation_data(&data);
            }
            Ok(None) => debug!("No generation data for image {}", image_id),
            Err(e) => warn!("Generation data lookup for image {} failed: {}", image_id, e),
        }
        if !resources.is_empty() {
            chosen = ResourceSource::GenerationData;
        }
    }

    if resources.is_empty() {
        resources = resources_from_civitai_resources(&metadata.raw_meta);
        if !resources.is_empty() {
            chosen = ResourceSource::CivitaiResources;
        }
    }

    if resources.is_empty() {
        resources = resources_from_meta_resources(&metadata.raw_meta);
        if !resources.is_empty() {
            chosen = ResourceSource::MetaResources;
        }
    }

    metadata.resources = resources;
    let checkpoints = metadata.checkpoint_reference_names();
    metadata.backfill_model_name(checkpoints.iter().map(String::as_str));

    debug!(
        "Resource source {:?}: {} reference(s)",
        chosen,
        metadata.resources.len()
    );
    chosen
}

/// Extract and enrich in one step.
pub async fn normalize(record: &ImageRecord, source: &dyn CivitaiSource) -> CanonicalMetadata {
    let mut metadata = extract_metadata(record);
    enrich_metadata(&mut metadata, source).await;
    metadata
}

/// References from server-resolved generation data. Entries without a
/// version id are dropped.
pub fn resources_from_generation_data(data: &GenerationData) -> Vec<ResourceReference> {
    data.resources
        .iter()
        .filter_map(|r| {
            let version_id = r.model_version_id.filter(|id| *id > 0)?;
            let resource_type =
                ResourceType::from_platform_label(r.model_type.as_deref().unwrap_or_default());
            Some(ResourceReference::new(
                r.model_name.clone().unwrap_or_else(|| "unknown".to_string()),
                resource_type,
                r.strength,
                None,
                Some(version_id),
            ))
        })
        .collect()
}

/// References from the embedded `civitaiResources` list, deduplicated by
/// version id. A later duplicate replaces an earlier one only when the
/// earlier entry has an unknown type and the later one does not.
pub fn resources_from_civitai_resources(meta: &Value) -> Vec<ResourceReference> {
    let Some(entries) = meta.get("civitaiResources").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut resources: Vec<ResourceReference> = Vec::new();
    let mut seen: HashMap<u64, usize> = HashMap::new();

    for entry in entries {
        let version_id = u64_field_of(entry, "modelVersionId");
        let resource_type = ResourceType::from_platform_label(
            &str_field_of(entry, "type").unwrap_or_else(|| "unknown".to_string()),
        );
        let reference = ResourceReference::new(
            str_field_of(entry, "modelName").unwrap_or_else(|| "unknown".to_string()),
            resource_type,
            f64_field_of(entry, "weight"),
            None,
            version_id,
        );

        if let Some(id) = version_id {
            if let Some(&idx) = seen.get(&id) {
                if !resources[idx].resource_type.is_known() && resource_type.is_known() {
                    resources[idx] = reference;
                }
                continue;
            }
            seen.insert(id, resources.len());
        }
        resources.push(reference);
    }

    resources
}

/// References from the embedded `resources` list. LoRA hashes missing on the
/// entry are backfilled from the `hashes` map (`"LORA:<name>" -> hash`).
pub fn resources_from_meta_resources(meta: &Value) -> Vec<ResourceReference> {
    let Some(entries) = meta.get("resources").and_then(Value::as_array) else {
        return Vec::new();
    };

    let lora_hashes: HashMap<&str, &str> = meta
        .get("hashes")
        .and_then(Value::as_object)
        .map(|hashes| {
            hashes
                .iter()
                .filter_map(|(k, v)| Some((k.strip_prefix("LORA:")?, v.as_str()?)))
                .collect()
        })
        .unwrap_or_default();

    entries
        .iter()
        .map(|entry| {
            let name = str_field_of(entry, "name").unwrap_or_else(|| "unknown".to_string());
            let resource_type = ResourceType::from_platform_label(
                &str_field_of(entry, "type").unwrap_or_else(|| "unknown".to_string()),
            );
            let mut hash = str_field_of(entry, "hash");
            if hash.is_none() && resource_type == ResourceType::Lora {
                hash = lora_hashes.get(name.as_str()).map(|h| h.to_string());
            }
            ResourceReference::new(
                name,
                resource_type,
                f64_field_of(entry, "weight"),
                hash,
                None,
            )
        })
        .collect()
}

fn unwrap_meta(meta: Option<&Value>) -> Map<String, Value> {
    let Some(Value::Object(outer)) = meta else {
        return Map::new();
    };
    match outer.get("meta") {
        Some(Value::Object(inner)) => inner.clone(),
        _ => outer.clone(),
    }
}

fn upscaler_hints(meta: &Map<String, Value>) -> Vec<String> {
    meta.get("upscalers")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(o) => o.get("name").and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn str_field(meta: &Map<String, Value>, key: &str) -> Option<String> {
    meta.get(key).and_then(as_string)
}

fn u64_field(meta: &Map<String, Value>, key: &str) -> Option<u64> {
    meta.get(key).and_then(as_u64)
}

fn i64_field(meta: &Map<String, Value>, key: &str) -> Option<i64> {
    meta.get(key).and_then(as_i64)
}

fn f64_field(meta: &Map<String, Value>, key: &str) -> Option<f64> {
    meta.get(key).and_then(as_f64)
}

fn str_field_of(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(as_string)
}

fn u64_field_of(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(as_u64).filter(|v| *v > 0)
}

fn f64_field_of(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(as_f64)
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civitai::{GenerationResource, MemorySource};
    use serde_json::json;

    fn record(meta: Value) -> ImageRecord {
        ImageRecord {
            id: 42,
            url: Some("https://image.civitai.com/42.jpeg".into()),
            width: Some(1024),
            height: Some(1536),
            meta: Some(meta),
        }
    }

    #[test]
    fn test_unwraps_nested_meta() {
        let m = extract_metadata(&record(json!({
            "meta": {"prompt": "inner", "steps": 30, "cfgScale": 5.5, "seed": 123}
        })));
        assert_eq!(m.prompt, "inner");
        assert_eq!(m.steps, Some(30));
        assert_eq!(m.cfg_scale, Some(5.5));
        assert_eq!(m.seed, Some(123));
    }

    #[test]
    fn test_size_string_then_record_then_default() {
        let m = extract_metadata(&record(json!({"Size": "512x768"})));
        assert_eq!(m.size, Size::new(512, 768));
        assert_eq!(m.base_size, m.size);

        let m = extract_metadata(&record(json!({"prompt": "x"})));
        assert_eq!(m.size, Size::new(1024, 1536));

        let mut bare = record(json!({}));
        bare.width = None;
        let m = extract_metadata(&bare);
        assert_eq!(m.size, Size::new(512, 512));
    }

    #[test]
    fn test_hires_sizes_are_asymmetric() {
        let m = extract_metadata(&record(json!({
            "workflow": "txt2img-hires",
            "Size": "512x768",
            "width": 512,
            "height": 768,
            "denoise": 0.35
        })));
        assert_eq!(m.topology, Topology::TwoPassUpscale);
        assert_eq!(m.base_size, Size::new(512, 768));
        assert_eq!(m.size, Size::new(1024, 1536));
        assert_eq!(m.denoise, Some(0.35));
    }

    #[test]
    fn test_clip_skip_from_either_key() {
        let m = extract_metadata(&record(json!({"Clip skip": "2"})));
        assert_eq!(m.clip_skip, Some(2));
        let m = extract_metadata(&record(json!({"clipSkip": 1})));
        assert_eq!(m.clip_skip, Some(1));
    }

    #[test]
    fn test_civitai_resources_dedupe_prefers_known_type() {
        let refs = resources_from_civitai_resources(&json!({
            "civitaiResources": [
                {"modelVersionId": 9, "type": "mystery", "weight": 0.5},
                {"modelVersionId": 9, "type": "lora", "weight": null},
                {"modelVersionId": 9, "type": "checkpoint"},
                {"modelVersionId": 10, "type": "checkpoint"}
            ]
        }));
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].resource_type, ResourceType::Lora);
        assert_eq!(refs[0].weight, Some(1.0));
        assert_eq!(refs[1].model_version_id, Some(10));
    }

    #[test]
    fn test_meta_resources_backfill_lora_hash() {
        let refs = resources_from_meta_resources(&json!({
            "resources": [
                {"name": "detail", "type": "lora", "weight": null},
                {"name": "base", "type": "model", "hash": "abcd"}
            ],
            "hashes": {"LORA:detail": "feed", "model": "abcd"}
        }));
        assert_eq!(refs[0].hash.as_deref(), Some("feed"));
        assert_eq!(refs[0].weight, Some(1.0));
        assert_eq!(refs[1].resource_type, ResourceType::Checkpoint);
        assert_eq!(refs[1].model_version_id, None);
    }

    #[tokio::test]
    async fn test_generation_data_wins_without_merging() {
        let source = MemorySource::new().with_generation_data(
            42,
            GenerationData {
                meta: None,
                resources: vec![
                    GenerationResource {
                        model_version_id: Some(1),
                        model_name: Some("Base Model".into()),
                        model_type: Some("Checkpoint".into()),
                        ..Default::default()
                    },
                    GenerationResource {
                        model_version_id: None,
                        model_name: Some("dropped".into()),
                        ..Default::default()
                    },
                ],
            },
        );
        let mut m = extract_metadata(&record(json!({
            "Model": "unknown",
            "civitaiResources": [{"modelVersionId": 2, "type": "lora"}]
        })));

        let chosen = enrich_metadata(&mut m, &source).await;
        assert_eq!(chosen, ResourceSource::GenerationData);
        assert_eq!(m.resources.len(), 1);
        assert_eq!(m.resources[0].model_version_id, Some(1));
        assert_eq!(m.model_name, "Base Model");
    }

    #[tokio::test]
    async fn test_generation_failure_falls_back_to_embedded() {
        let source = MemorySource::new().rejecting_credentials();
        let mut m = extract_metadata(&record(json!({
            "civitaiResources": [{"modelVersionId": 2, "type": "lora", "weight": 0.8}]
        })));

        let chosen = enrich_metadata(&mut m, &source).await;
        assert_eq!(chosen, ResourceSource::CivitaiResources);
        assert_eq!(m.resources[0].weight, Some(0.8));
    }

    #[tokio::test]
    async fn test_no_sources_leaves_resources_empty() {
        let source = MemorySource::new();
        let m = normalize(&record(json!({"prompt": "p"})), &source).await;
        assert!(m.resources.is_empty());
    }
}
