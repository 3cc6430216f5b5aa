//! Typed node graph in the ComfyUI API format.
//!
//! Serializes to `{ "<id>": { "class_type": ..., "inputs": { ... } } }` with
//! links encoded as `["<id>", <slot>]`.

use crate::{AlchemistError, Result};
use serde::de::{self, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Stable node identifier. Serialized as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct NodeIdVisitor;

        impl Visitor<'_> for NodeIdVisitor {
            type Value = NodeId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a numeric node id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<NodeId, E> {
                v.parse().map(NodeId).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<NodeId, E> {
                u32::try_from(v).map(NodeId).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(NodeIdVisitor)
    }
}

/// A `(producer node, output slot)` edge endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub node: NodeId,
    pub slot: u32,
}

impl NodeRef {
    pub const fn new(node: NodeId, slot: u32) -> Self {
        Self { node, slot }
    }
}

impl Serialize for NodeRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.node)?;
        tuple.serialize_element(&self.slot)?;
        tuple.end()
    }
}

/// A node input: either a link to another node's output or a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeInput {
    Link(NodeRef),
    Literal(Value),
}

impl From<NodeRef> for NodeInput {
    fn from(r: NodeRef) -> Self {
        Self::Link(r)
    }
}

impl From<Value> for NodeInput {
    fn from(v: Value) -> Self {
        Self::Literal(v)
    }
}

impl NodeInput {
    pub fn literal(v: impl Into<Value>) -> Self {
        Self::Literal(v.into())
    }

    pub fn as_link(&self) -> Option<NodeRef> {
        match self {
            Self::Link(r) => Some(*r),
            Self::Literal(_) => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(v) => Some(v),
            Self::Link(_) => None,
        }
    }
}

impl Serialize for NodeInput {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Link(r) => r.serialize(serializer),
            Self::Literal(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for NodeInput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if let Value::Array(items) = &value {
            if let [Value::String(id), Value::Number(slot)] = items.as_slice() {
                if let (Ok(id), Some(slot)) = (id.parse::<u32>(), slot.as_u64()) {
                    if let Ok(slot) = u32::try_from(slot) {
                        return Ok(Self::Link(NodeRef::new(NodeId(id), slot)));
                    }
                }
            }
        }
        Ok(Self::Literal(value))
    }
}

/// Node classes the builder emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    CheckpointLoaderSimple,
    LoraLoader,
    CLIPSetLastLayer,
    CLIPTextEncode,
    EmptyLatentImage,
    KSampler,
    VAEDecode,
    VAEEncode,
    SaveImage,
    UpscaleModelLoader,
    ImageUpscaleWithModel,
    ImageScale,
    LatentUpscale,
}

impl NodeKind {
    pub const ALL: [NodeKind; 13] = [
        Self::CheckpointLoaderSimple,
        Self::LoraLoader,
        Self::CLIPSetLastLayer,
        Self::CLIPTextEncode,
        Self::EmptyLatentImage,
        Self::KSampler,
        Self::VAEDecode,
        Self::VAEEncode,
        Self::SaveImage,
        Self::UpscaleModelLoader,
        Self::ImageUpscaleWithModel,
        Self::ImageScale,
        Self::LatentUpscale,
    ];

    pub fn class_type(&self) -> &'static str {
        match self {
            Self::CheckpointLoaderSimple => "CheckpointLoaderSimple",
            Self::LoraLoader => "LoraLoader",
            Self::CLIPSetLastLayer => "CLIPSetLastLayer",
            Self::CLIPTextEncode => "CLIPTextEncode",
            Self::EmptyLatentImage => "EmptyLatentImage",
            Self::KSampler => "KSampler",
            Self::VAEDecode => "VAEDecode",
            Self::VAEEncode => "VAEEncode",
            Self::SaveImage => "SaveImage",
            Self::UpscaleModelLoader => "UpscaleModelLoader",
            Self::ImageUpscaleWithModel => "ImageUpscaleWithModel",
            Self::ImageScale => "ImageScale",
            Self::LatentUpscale => "LatentUpscale",
        }
    }

    /// Declared output channels, by slot.
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            Self::CheckpointLoaderSimple => &["MODEL", "CLIP", "VAE"],
            Self::LoraLoader => &["MODEL", "CLIP"],
            Self::CLIPSetLastLayer => &["CLIP"],
            Self::CLIPTextEncode => &["CONDITIONING"],
            Self::EmptyLatentImage
            | Self::KSampler
            | Self::VAEEncode
            | Self::LatentUpscale => &["LATENT"],
            Self::VAEDecode | Self::ImageUpscaleWithModel | Self::ImageScale => &["IMAGE"],
            Self::UpscaleModelLoader => &["UPSCALE_MODEL"],
            Self::SaveImage => &[],
        }
    }
}

impl FromStr for NodeKind {
    type Err = AlchemistError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.class_type() == s)
            .ok_or_else(|| AlchemistError::InvalidGraph {
                message: format!("unsupported node class '{}'", s),
            })
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_type())
    }
}

/// One graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    pub kind: NodeKind,
    pub inputs: BTreeMap<String, NodeInput>,
}

impl Node {
    pub fn new<K, I>(kind: NodeKind, inputs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, NodeInput)>,
    {
        Self {
            kind,
            inputs: inputs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn input(&self, name: &str) -> Option<&NodeInput> {
        self.inputs.get(name)
    }

    pub fn links(&self) -> impl Iterator<Item = (&str, NodeRef)> {
        self.inputs.iter().filter_map(|(name, input)| match input {
            NodeInput::Link(r) => Some((name.as_str(), *r)),
            NodeInput::Literal(_) => None,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct RawNode {
    class_type: String,
    #[serde(default)]
    inputs: BTreeMap<String, NodeInput>,
}

impl TryFrom<RawNode> for Node {
    type Error = AlchemistError;

    fn try_from(raw: RawNode) -> Result<Self> {
        Ok(Self {
            kind: raw.class_type.parse()?,
            inputs: raw.inputs,
        })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        Self {
            class_type: node.kind.class_type().to_string(),
            inputs: node.inputs,
        }
    }
}

/// Directed acyclic node graph keyed by stable ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    nodes: BTreeMap<NodeId, Node>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node; ids must be unique.
    pub fn insert(&mut self, id: NodeId, node: Node) -> Result<NodeId> {
        if self.nodes.contains_key(&id) {
            return Err(AlchemistError::InvalidGraph {
                message: format!("duplicate node id {}", id),
            });
        }
        self.nodes.insert(id, node);
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = (NodeId, &Node)> {
        self.iter().filter(move |(_, node)| node.kind == kind)
    }

    pub fn count_of(&self, kind: NodeKind) -> usize {
        self.nodes_of(kind).count()
    }

    /// Check that every link resolves to a declared output, the graph is
    /// acyclic and exactly one save node exists.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| AlchemistError::InvalidGraph { message };

        for (id, node) in self.iter() {
            for (input, link) in node.links() {
                let producer = self.get(link.node).ok_or_else(|| {
                    invalid(format!(
                        "node {} input '{}' links to missing node {}",
                        id, input, link.node
                    ))
                })?;
                if link.slot as usize >= producer.kind.outputs().len() {
                    return Err(invalid(format!(
                        "node {} input '{}' links to slot {} of {} which has {} output(s)",
                        id,
                        input,
                        link.slot,
                        producer.kind,
                        producer.kind.outputs().len()
                    )));
                }
            }
        }

        let saves = self.count_of(NodeKind::SaveImage);
        if saves != 1 {
            return Err(invalid(format!("expected exactly one SaveImage node, found {}", saves)));
        }

        self.topological_order().map(|_| ())
    }

    /// Node ids ordered so every producer precedes its consumers.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut indegree: HashMap<NodeId, usize> = self.nodes.keys().map(|id| (*id, 0)).collect();
        let mut consumers: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (id, node) in self.iter() {
            for (_, link) in node.links() {
                if self.nodes.contains_key(&link.node) {
                    *indegree.entry(id).or_default() += 1;
                    consumers.entry(link.node).or_default().push(id);
                }
            }
        }

        let mut ready: Vec<NodeId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_unstable_by(|a, b| b.cmp(a));

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop() {
            order.push(id);
            for consumer in consumers.get(&id).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(consumer) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(*consumer);
                        ready.sort_unstable_by(|a, b| b.cmp(a));
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(AlchemistError::InvalidGraph {
                message: "graph contains a cycle".to_string(),
            });
        }
        Ok(order)
    }
}
