//! Compiles canonical metadata and resolved artifacts into a workflow graph.

use super::channels::ChannelSet;
use super::graph::{Node, NodeId, NodeInput, NodeKind, NodeRef, WorkflowGraph};
use super::sampler::map_sampler;
use crate::config::WorkflowDefaults;
use crate::metadata::{is_placeholder_name, CanonicalMetadata, ResourceType, Size, Topology};
use crate::model_library::sanitize_filename;
use crate::resolver::ResolvedArtifact;
use crate::{AlchemistError, Result};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, warn};

// Shared nodes.
const CHECKPOINT: NodeId = NodeId(1);
const POSITIVE: NodeId = NodeId(2);
const NEGATIVE: NodeId = NodeId(3);
const CANVAS: NodeId = NodeId(4);
const SAMPLER: NodeId = NodeId(5);
const DECODE: NodeId = NodeId(6);
const SAVE: NodeId = NodeId(7);
const CLIP_SKIP: NodeId = NodeId(8);

// Two-pass nodes.
const HIRES_DECODE: NodeId = NodeId(20);
const HIRES_UPSCALER: NodeId = NodeId(21);
const HIRES_UPSCALE: NodeId = NodeId(22);
const HIRES_SCALE: NodeId = NodeId(23);
const HIRES_ENCODE: NodeId = NodeId(24);
const HIRES_SAMPLER: NodeId = NodeId(25);

// LoRA chain.
const LORA_BASE: u32 = 100;

const CHECKPOINT_EXTENSIONS: [&str; 4] = [".safetensors", ".ckpt", ".pt", ".bin"];

static LORA_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*<lora:[^>]+>").unwrap());

/// Options for [`build_workflow_with`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Seed used when the metadata has none. Random when unset.
    pub seed_fallback: Option<u64>,
}

/// A validated graph plus what the builder decided along the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltWorkflow {
    #[serde(rename = "workflow")]
    pub graph: WorkflowGraph,
    pub seed: u64,
    pub checkpoint: String,
    pub topology: Topology,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Build a workflow, drawing a random seed if the metadata lacks one.
pub fn build_workflow(
    metadata: &CanonicalMetadata,
    artifacts: &[ResolvedArtifact],
) -> Result<BuiltWorkflow> {
    build_workflow_with(metadata, artifacts, &BuildOptions::default())
}

pub fn build_workflow_with(
    metadata: &CanonicalMetadata,
    artifacts: &[ResolvedArtifact],
    options: &BuildOptions,
) -> Result<BuiltWorkflow> {
    let mut warnings = Vec::new();
    let checkpoint = select_checkpoint(metadata, artifacts, &mut warnings)?;

    let seed = metadata
        .seed
        .or(options.seed_fallback)
        .unwrap_or_else(random_seed);
    let topology = metadata.effective_topology();
    let (sampler_name, scheduler) =
        map_sampler(&metadata.sampler, metadata.schedule_type.as_deref());
    let sampling = Sampling {
        seed,
        steps: metadata.steps.filter(|s| *s > 0).unwrap_or(WorkflowDefaults::STEPS),
        cfg: metadata
            .cfg_scale
            .filter(|c| *c > 0.0)
            .unwrap_or(WorkflowDefaults::CFG_SCALE),
        sampler_name,
        scheduler,
    };

    let mut graph = WorkflowGraph::new();
    graph.insert(
        CHECKPOINT,
        Node::new(
            NodeKind::CheckpointLoaderSimple,
            [("ckpt_name", NodeInput::literal(checkpoint.clone()))],
        ),
    )?;
    let mut channels = ChannelSet::from_checkpoint(CHECKPOINT);

    for (index, lora) in loras(artifacts).enumerate() {
        let id = NodeId(LORA_BASE + index as u32);
        let strength = lora.reference.weight.unwrap_or(1.0);
        graph.insert(
            id,
            Node::new(
                NodeKind::LoraLoader,
                [
                    ("lora_name", NodeInput::literal(lora.filename.clone())),
                    ("strength_model", NodeInput::literal(strength)),
                    ("strength_clip", NodeInput::literal(strength)),
                    ("model", NodeInput::Link(channels.model)),
                    ("clip", NodeInput::Link(channels.clip)),
                ],
            ),
        )?;
        channels = channels.through_lora(id);
    }

    if let Some(layers) = metadata.clip_skip.filter(|c| *c > 0) {
        graph.insert(
            CLIP_SKIP,
            Node::new(
                NodeKind::CLIPSetLastLayer,
                [
                    ("stop_at_clip_layer", NodeInput::literal(-layers)),
                    ("clip", NodeInput::Link(channels.clip)),
                ],
            ),
        )?;
        channels = channels.through_clip_skip(CLIP_SKIP);
    }

    for (id, text) in [
        (POSITIVE, &metadata.prompt),
        (NEGATIVE, &metadata.negative_prompt),
    ] {
        graph.insert(
            id,
            Node::new(
                NodeKind::CLIPTextEncode,
                [
                    ("text", NodeInput::literal(strip_lora_tags(text))),
                    ("clip", NodeInput::Link(channels.clip)),
                ],
            ),
        )?;
    }

    let canvas = match topology {
        Topology::SinglePass => metadata.size,
        Topology::TwoPassUpscale => metadata.base_size,
    };
    graph.insert(CANVAS, canvas_node(canvas))?;
    graph.insert(
        SAMPLER,
        sampling.node(channels.model, NodeRef::new(CANVAS, 0), 1.0),
    )?;

    let mut samples = NodeRef::new(SAMPLER, 0);
    if topology == Topology::TwoPassUpscale {
        let latent = match upscaler(artifacts) {
            Some(model_name) => {
                debug!("Two-pass graph with upscaler '{}'", model_name);
                upscale_with_model(&mut graph, samples, channels, &model_name, metadata.size)?
            }
            None => {
                warn!("No upscaler resolved, rescaling in latent space");
                graph.insert(
                    HIRES_DECODE,
                    Node::new(
                        NodeKind::LatentUpscale,
                        [
                            ("samples", NodeInput::Link(samples)),
                            ("upscale_method", NodeInput::literal("bislerp")),
                            ("width", NodeInput::literal(metadata.size.width)),
                            ("height", NodeInput::literal(metadata.size.height)),
                            ("crop", NodeInput::literal("disabled")),
                        ],
                    ),
                )?;
                NodeRef::new(HIRES_DECODE, 0)
            }
        };

        let denoise = metadata
            .denoise
            .filter(|d| *d > 0.0)
            .unwrap_or(WorkflowDefaults::REFINE_DENOISE);
        graph.insert(HIRES_SAMPLER, sampling.node(channels.model, latent, denoise))?;
        samples = NodeRef::new(HIRES_SAMPLER, 0);
    }

    graph.insert(
        DECODE,
        Node::new(
            NodeKind::VAEDecode,
            [("samples", NodeInput::Link(samples)), ("vae", NodeInput::Link(channels.vae))],
        ),
    )?;
    graph.insert(
        SAVE,
        Node::new(
            NodeKind::SaveImage,
            [
                ("images", NodeInput::Link(NodeRef::new(DECODE, 0))),
                ("filename_prefix", NodeInput::literal(filename_prefix(metadata))),
            ],
        ),
    )?;

    graph.validate()?;
    debug!(
        "Built {:?} workflow with {} node(s), seed {}",
        topology,
        graph.len(),
        seed
    );

    Ok(BuiltWorkflow {
        graph,
        seed,
        checkpoint,
        topology,
        warnings,
    })
}

/// Remove inline `<lora:name:weight>` tags from a prompt.
pub fn strip_lora_tags(text: &str) -> String {
    LORA_TAG.replace_all(text, "").trim().to_string()
}

/// Uniform 63-bit seed.
pub fn random_seed() -> u64 {
    rand::rng().random_range(0..=i64::MAX as u64)
}

struct Sampling {
    seed: u64,
    steps: u32,
    cfg: f64,
    sampler_name: &'static str,
    scheduler: &'static str,
}

impl Sampling {
    fn node(&self, model: NodeRef, latent: NodeRef, denoise: f64) -> Node {
        Node::new(
            NodeKind::KSampler,
            [
                ("model", NodeInput::Link(model)),
                ("positive", NodeInput::Link(NodeRef::new(POSITIVE, 0))),
                ("negative", NodeInput::Link(NodeRef::new(NEGATIVE, 0))),
                ("latent_image", NodeInput::Link(latent)),
                ("seed", NodeInput::literal(self.seed)),
                ("steps", NodeInput::literal(self.steps)),
                ("cfg", NodeInput::literal(self.cfg)),
                ("sampler_name", NodeInput::literal(self.sampler_name)),
                ("scheduler", NodeInput::literal(self.scheduler)),
                ("denoise", NodeInput::literal(denoise)),
            ],
        )
    }
}

fn canvas_node(size: Size) -> Node {
    Node::new(
        NodeKind::EmptyLatentImage,
        [
            ("width", NodeInput::literal(size.width)),
            ("height", NodeInput::literal(size.height)),
            ("batch_size", NodeInput::literal(1)),
        ],
    )
}

/// Decode, model-upscale, rescale to the final size and re-encode.
fn upscale_with_model(
    graph: &mut WorkflowGraph,
    samples: NodeRef,
    channels: ChannelSet,
    model_name: &str,
    size: Size,
) -> Result<NodeRef> {
    graph.insert(
        HIRES_DECODE,
        Node::new(
            NodeKind::VAEDecode,
            [("samples", NodeInput::Link(samples)), ("vae", NodeInput::Link(channels.vae))],
        ),
    )?;
    graph.insert(
        HIRES_UPSCALER,
        Node::new(
            NodeKind::UpscaleModelLoader,
            [("model_name", NodeInput::literal(model_name))],
        ),
    )?;
    graph.insert(
        HIRES_UPSCALE,
        Node::new(
            NodeKind::ImageUpscaleWithModel,
            [
                ("upscale_model", NodeInput::Link(NodeRef::new(HIRES_UPSCALER, 0))),
                ("image", NodeInput::Link(NodeRef::new(HIRES_DECODE, 0))),
            ],
        ),
    )?;
    graph.insert(
        HIRES_SCALE,
        Node::new(
            NodeKind::ImageScale,
            [
                ("image", NodeInput::Link(NodeRef::new(HIRES_UPSCALE, 0))),
                ("upscale_method", NodeInput::literal("lanczos")),
                ("width", NodeInput::literal(size.width)),
                ("height", NodeInput::literal(size.height)),
                ("crop", NodeInput::literal("disabled")),
            ],
        ),
    )?;
    graph.insert(
        HIRES_ENCODE,
        Node::new(
            NodeKind::VAEEncode,
            [
                ("pixels", NodeInput::Link(NodeRef::new(HIRES_SCALE, 0))),
                ("vae", NodeInput::Link(channels.vae)),
            ],
        ),
    )?;
    Ok(NodeRef::new(HIRES_ENCODE, 0))
}

/// A resolved artifact of one type with a usable filename.
struct Usable<'a> {
    reference: &'a crate::metadata::ResourceReference,
    filename: String,
}

fn usable(artifacts: &[ResolvedArtifact], kind: ResourceType) -> impl Iterator<Item = Usable<'_>> {
    artifacts
        .iter()
        .filter(move |a| a.resolved && a.resource_type() == kind)
        .filter_map(|a| {
            let filename = a.filename.as_deref().filter(|f| !f.is_empty())?;
            Some(Usable {
                reference: &a.reference,
                filename: filename.to_string(),
            })
        })
}

fn loras(artifacts: &[ResolvedArtifact]) -> impl Iterator<Item = Usable<'_>> {
    usable(artifacts, ResourceType::Lora)
}

fn upscaler(artifacts: &[ResolvedArtifact]) -> Option<String> {
    usable(artifacts, ResourceType::Upscaler)
        .next()
        .map(|u| u.filename)
}

/// First resolved checkpoint, else a filename synthesized from the model name.
fn select_checkpoint(
    metadata: &CanonicalMetadata,
    artifacts: &[ResolvedArtifact],
    warnings: &mut Vec<String>,
) -> Result<String> {
    if let Some(found) = usable(artifacts, ResourceType::Checkpoint).next() {
        return Ok(found.filename);
    }

    if is_placeholder_name(&metadata.model_name) {
        return Err(AlchemistError::NoCheckpoint);
    }
    let base = sanitize_filename(metadata.model_name.trim()).ok_or(AlchemistError::NoCheckpoint)?;
    let lowered = base.to_ascii_lowercase();
    let filename = if CHECKPOINT_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext)) {
        base
    } else {
        format!("{}.safetensors", base)
    };

    let message = format!(
        "No checkpoint resolved; guessing filename '{}' from model name '{}'",
        filename, metadata.model_name
    );
    warn!("{}", message);
    warnings.push(message);
    Ok(filename)
}

fn filename_prefix(metadata: &CanonicalMetadata) -> String {
    match metadata.image_id {
        Some(id) => format!("{}{}", WorkflowDefaults::FILENAME_PREFIX, id),
        None => format!("{}unknown", WorkflowDefaults::FILENAME_PREFIX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ResourceReference;
    use serde_json::json;
    use std::path::PathBuf;

    fn artifact(name: &str, kind: ResourceType, filename: &str, weight: Option<f64>) -> ResolvedArtifact {
        let mut a = ResolvedArtifact::unresolved(
            ResourceReference::new(name, kind, weight, None, Some(1)),
            "",
        );
        a.resolved = true;
        a.error = None;
        a.filename = Some(filename.to_string());
        a.download_url = Some("https://civitai.com/api/download/models/1".into());
        a.target_path = Some(PathBuf::from("/models").join(filename));
        a
    }

    fn metadata() -> CanonicalMetadata {
        let mut m: CanonicalMetadata = serde_json::from_value(json!({})).unwrap();
        m.image_id = Some(42);
        m.prompt = "a castle <lora:detail:0.8>, dusk <lora:ink:1>".into();
        m.negative_prompt = "blurry".into();
        m.sampler = "DPM++ 2M Karras".into();
        m.steps = Some(30);
        m.cfg_scale = Some(6.5);
        m.seed = Some(1234);
        m.size = Size::new(512, 768);
        m.base_size = Size::new(512, 768);
        m.model_name = "Dream".into();
        m
    }

    fn input<'a>(built: &'a BuiltWorkflow, id: u32, name: &str) -> &'a NodeInput {
        built.graph.get(NodeId(id)).unwrap().input(name).unwrap()
    }

    fn link(id: u32, slot: u32) -> Option<NodeRef> {
        Some(NodeRef::new(NodeId(id), slot))
    }

    #[test]
    fn test_single_pass_chains_loras_and_clip_skip() {
        let mut m = metadata();
        m.clip_skip = Some(2);
        let artifacts = vec![
            artifact("Dream", ResourceType::Checkpoint, "dream.safetensors", None),
            artifact("Detail", ResourceType::Lora, "detail.safetensors", Some(0.8)),
            artifact("Ink", ResourceType::Lora, "ink.safetensors", None),
        ];

        let built = build_workflow(&m, &artifacts).unwrap();
        assert_eq!(built.graph.len(), 7 + 2 + 1);
        assert_eq!(built.seed, 1234);
        assert!(built.warnings.is_empty());

        assert_eq!(input(&built, 100, "model").as_link(), link(1, 0));
        assert_eq!(input(&built, 101, "clip").as_link(), link(100, 1));
        assert_eq!(input(&built, 101, "strength_model").as_literal(), Some(&json!(1.0)));
        assert_eq!(input(&built, 8, "clip").as_link(), link(101, 1));
        assert_eq!(input(&built, 8, "stop_at_clip_layer").as_literal(), Some(&json!(-2)));
        assert_eq!(input(&built, 2, "clip").as_link(), link(8, 0));
        assert_eq!(input(&built, 5, "model").as_link(), link(101, 0));
        assert_eq!(input(&built, 6, "vae").as_link(), link(1, 2));
        assert_eq!(input(&built, 5, "sampler_name").as_literal(), Some(&json!("dpmpp_2m")));
        assert_eq!(input(&built, 5, "scheduler").as_literal(), Some(&json!("karras")));
        assert_eq!(
            input(&built, 7, "filename_prefix").as_literal(),
            Some(&json!("civitai_42"))
        );
    }

    #[test]
    fn test_prompts_lose_lora_tags() {
        let artifacts = vec![artifact("Dream", ResourceType::Checkpoint, "dream.safetensors", None)];
        let built = build_workflow(&metadata(), &artifacts).unwrap();
        assert_eq!(
            input(&built, 2, "text").as_literal(),
            Some(&json!("a castle, dusk"))
        );
        assert_eq!(built.graph.len(), 7);
    }

    #[test]
    fn test_hires_without_upscaler_uses_latent_rescale() {
        let mut m = metadata();
        m.workflow_type = Some("txt2img hires".into());
        m.topology = Topology::TwoPassUpscale;
        m.base_size = Size::new(512, 768);
        m.size = Size::new(1024, 1536);
        let artifacts = vec![artifact("Dream", ResourceType::Checkpoint, "dream.safetensors", None)];

        let built = build_workflow(&m, &artifacts).unwrap();
        assert_eq!(built.topology, Topology::TwoPassUpscale);
        assert_eq!(built.graph.count_of(NodeKind::LatentUpscale), 1);
        assert_eq!(built.graph.count_of(NodeKind::ImageUpscaleWithModel), 0);
        assert_eq!(built.graph.len(), 9);
        assert_eq!(input(&built, 4, "width").as_literal(), Some(&json!(512)));
        assert_eq!(input(&built, 20, "height").as_literal(), Some(&json!(1536)));
        assert_eq!(input(&built, 25, "latent_image").as_link(), link(20, 0));
        assert_eq!(input(&built, 25, "denoise").as_literal(), Some(&json!(0.4)));
        assert_eq!(input(&built, 6, "samples").as_link(), link(25, 0));
    }

    #[test]
    fn test_hires_with_upscaler_builds_model_upscale_branch() {
        let mut m = metadata();
        m.workflow_type = Some("Hires fix".into());
        m.size = Size::new(1024, 1536);
        m.denoise = Some(0.55);
        let artifacts = vec![
            artifact("Dream", ResourceType::Checkpoint, "dream.safetensors", None),
            artifact("4x", ResourceType::Upscaler, "4x-UltraSharp.pth", None),
        ];

        let built = build_workflow(&m, &artifacts).unwrap();
        assert_eq!(built.graph.len(), 13);
        assert_eq!(
            input(&built, 21, "model_name").as_literal(),
            Some(&json!("4x-UltraSharp.pth"))
        );
        assert_eq!(input(&built, 22, "image").as_link(), link(20, 0));
        assert_eq!(input(&built, 23, "width").as_literal(), Some(&json!(1024)));
        assert_eq!(input(&built, 24, "pixels").as_link(), link(23, 0));
        assert_eq!(input(&built, 25, "latent_image").as_link(), link(24, 0));
        assert_eq!(input(&built, 25, "denoise").as_literal(), Some(&json!(0.55)));
    }

    #[test]
    fn test_missing_checkpoint_synthesizes_with_warning() {
        let built = build_workflow(&metadata(), &[]).unwrap();
        assert_eq!(built.checkpoint, "Dream.safetensors");
        assert_eq!(built.warnings.len(), 1);
    }

    #[test]
    fn test_no_checkpoint_and_placeholder_name_fails() {
        let mut m = metadata();
        m.model_name = "unknown".into();
        let unresolved = ResolvedArtifact::unresolved(
            ResourceReference::new("x", ResourceType::Checkpoint, None, None, None),
            "Could not resolve resource",
        );
        assert!(matches!(
            build_workflow(&m, &[unresolved]),
            Err(AlchemistError::NoCheckpoint)
        ));
    }

    #[test]
    fn test_missing_seed_uses_fallback_or_random() {
        let mut m = metadata();
        m.seed = None;
        let artifacts = vec![artifact("Dream", ResourceType::Checkpoint, "dream.safetensors", None)];
        let options = BuildOptions {
            seed_fallback: Some(7),
        };
        assert_eq!(build_workflow_with(&m, &artifacts, &options).unwrap().seed, 7);

        let random = build_workflow(&m, &artifacts).unwrap().seed;
        assert!(random <= i64::MAX as u64);
    }
}
