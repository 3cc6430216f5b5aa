//! Wire types for the Civitai REST and tRPC endpoints.
//!
//! Every field the platform may omit is optional or defaulted; the platform
//! is inconsistent about which keys appear on which endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An item from `GET /images?imageId=`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageRecord {
    pub id: u64,
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Loosely typed generation metadata, sometimes nested one level deep.
    pub meta: Option<Value>,
}

/// Payload of the `image.getGenerationData` tRPC procedure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationData {
    pub meta: Option<Value>,
    pub resources: Vec<GenerationResource>,
}

/// A server-resolved resource. Present even when the uploader hid the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenerationResource {
    pub model_version_id: Option<u64>,
    pub model_name: Option<String>,
    pub model_type: Option<String>,
    pub model_id: Option<u64>,
    pub strength: Option<f64>,
    pub base_model: Option<String>,
}

/// Response of `GET /model-versions/{id}` and `/model-versions/by-hash/{hash}`,
/// and the element type of `modelVersions` in search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelVersion {
    pub id: u64,
    pub model_id: Option<u64>,
    pub name: Option<String>,
    pub base_model: Option<String>,
    pub model: Option<VersionModelInfo>,
    pub files: Vec<VersionFile>,
    pub download_url: Option<String>,
}

impl ModelVersion {
    /// The file flagged primary, else the first file.
    pub fn primary_file(&self) -> Option<&VersionFile> {
        self.files
            .iter()
            .find(|f| f.primary.unwrap_or(false))
            .or_else(|| self.files.first())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionModelInfo {
    pub id: Option<u64>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub model_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VersionFile {
    pub name: String,
    #[serde(rename = "sizeKB")]
    pub size_kb: Option<f64>,
    pub download_url: Option<String>,
    pub primary: Option<bool>,
    /// Hash algorithm name ("SHA256", "AutoV2", ...) to hex digest.
    pub hashes: HashMap<String, String>,
}

impl VersionFile {
    pub fn sha256(&self) -> Option<&str> {
        self.hashes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("sha256"))
            .map(|(_, v)| v.as_str())
    }
}

/// An item from `GET /models?query=`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelSummary {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: Option<String>,
    pub model_versions: Vec<ModelVersion>,
}
