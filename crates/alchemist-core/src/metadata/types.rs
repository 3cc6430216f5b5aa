//! Canonical generation metadata and resource references.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Closed set of resource kinds.
///
/// Deserialization accepts any platform label and normalizes it, so a raw
/// label such as `"LORA"` or `"LoCon"` never survives past parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", from = "Option<String>")]
pub enum ResourceType {
    Checkpoint,
    Lora,
    Vae,
    Embedding,
    Upscaler,
    #[default]
    Unknown,
}

impl ResourceType {
    /// Map a platform type label into the closed set.
    pub fn from_platform_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "checkpoint" | "model" => Self::Checkpoint,
            "lora" | "locon" | "lycoris" | "dora" => Self::Lora,
            "vae" => Self::Vae,
            "textualinversion" | "embedding" | "embed" => Self::Embedding,
            "upscaler" => Self::Upscaler,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkpoint => "checkpoint",
            Self::Lora => "lora",
            Self::Vae => "vae",
            Self::Embedding => "embedding",
            Self::Upscaler => "upscaler",
            Self::Unknown => "unknown",
        }
    }

    /// Models subdirectory for this kind, following the ComfyUI layout.
    pub fn directory_name(&self) -> &'static str {
        match self {
            Self::Checkpoint => "checkpoints",
            Self::Lora => "loras",
            Self::Vae => "vae",
            Self::Embedding => "embeddings",
            Self::Upscaler => "upscale_models",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl From<Option<String>> for ResourceType {
    fn from(label: Option<String>) -> Self {
        label
            .as_deref()
            .map(Self::from_platform_label)
            .unwrap_or_default()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unresolved mention of a model inside generation metadata.
///
/// Deserialization goes through [`ResourceReference::new`], so references read
/// from RPC params or stored documents get the same defaults as parsed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawReference")]
pub struct ResourceReference {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub weight: Option<f64>,
    pub hash: Option<String>,
    pub model_version_id: Option<u64>,
}

#[derive(Deserialize)]
struct RawReference {
    #[serde(default = "unknown_name")]
    name: String,
    #[serde(rename = "type", default)]
    resource_type: ResourceType,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    model_version_id: Option<u64>,
}

impl From<RawReference> for ResourceReference {
    fn from(raw: RawReference) -> Self {
        Self::new(
            raw.name,
            raw.resource_type,
            raw.weight,
            raw.hash,
            raw.model_version_id,
        )
    }
}

fn unknown_name() -> String {
    "unknown".to_string()
}

impl ResourceReference {
    /// Build a reference, applying the LoRA weight convention: a LoRA with no
    /// declared weight is applied at full strength.
    pub fn new(
        name: impl Into<String>,
        resource_type: ResourceType,
        weight: Option<f64>,
        hash: Option<String>,
        model_version_id: Option<u64>,
    ) -> Self {
        let weight = match (resource_type, weight) {
            (ResourceType::Lora, None) => Some(1.0),
            (_, w) => w,
        };
        Self {
            name: name.into(),
            resource_type,
            weight,
            hash: hash.filter(|h| !h.trim().is_empty()),
            model_version_id,
        }
    }

    pub fn has_placeholder_name(&self) -> bool {
        is_placeholder_name(&self.name)
    }
}

/// Names the platform uses when the real model name is hidden.
pub fn is_placeholder_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    matches!(lowered.as_str(), "" | "unknown" | "unknown_model")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a `"WxH"` string.
    pub fn parse(text: &str) -> Option<Self> {
        let (w, h) = text.trim().split_once(['x', 'X'])?;
        let width = w.trim().parse().ok()?;
        let height = h.trim().parse().ok()?;
        (width > 0 && height > 0).then_some(Self { width, height })
    }
}

impl Default for Size {
    fn default() -> Self {
        Self::new(
            crate::config::WorkflowDefaults::IMAGE_SIZE,
            crate::config::WorkflowDefaults::IMAGE_SIZE,
        )
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Generation pipeline shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    #[default]
    SinglePass,
    TwoPassUpscale,
}

impl Topology {
    /// A workflow tag containing "hires" (any case) selects the two-pass shape.
    pub fn from_workflow_tag(tag: Option<&str>) -> Self {
        match tag {
            Some(t) if t.to_ascii_lowercase().contains("hires") => Self::TwoPassUpscale,
            _ => Self::SinglePass,
        }
    }
}

/// Normalized generation parameters of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMetadata {
    #[serde(default)]
    pub image_id: Option<u64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default)]
    pub sampler: String,
    #[serde(default)]
    pub schedule_type: Option<String>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub cfg_scale: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub size: Size,
    /// Pre-upscale size. Equals `size` for single-pass images.
    #[serde(default)]
    pub base_size: Size,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub model_hash: String,
    #[serde(default)]
    pub clip_skip: Option<i64>,
    #[serde(default)]
    pub resources: Vec<ResourceReference>,
    #[serde(default)]
    pub workflow_type: Option<String>,
    #[serde(default)]
    pub topology: Topology,
    #[serde(default)]
    pub denoise: Option<f64>,
    #[serde(default)]
    pub upscalers: Vec<String>,
    /// Source record, retained for diagnostics only.
    #[serde(default)]
    pub raw_meta: Value,
}

impl CanonicalMetadata {
    /// Replace a placeholder model name with the first usable checkpoint name.
    ///
    /// Returns `true` when the name changed.
    pub fn backfill_model_name<'a>(
        &mut self,
        checkpoint_names: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        if !is_placeholder_name(&self.model_name) {
            return false;
        }
        match checkpoint_names
            .into_iter()
            .find(|name| !is_placeholder_name(name))
        {
            Some(name) => {
                self.model_name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Topology to build, honouring the workflow tag when a document was
    /// produced without an explicit topology.
    pub fn effective_topology(&self) -> Topology {
        match self.topology {
            Topology::TwoPassUpscale => Topology::TwoPassUpscale,
            Topology::SinglePass => Topology::from_workflow_tag(self.workflow_type.as_deref()),
        }
    }

    /// Checkpoint names among the references, in discovery order.
    pub fn checkpoint_reference_names(&self) -> Vec<String> {
        self.resources
            .iter()
            .filter(|r| r.resource_type == ResourceType::Checkpoint)
            .map(|r| r.name.clone())
            .collect()
    }
}
