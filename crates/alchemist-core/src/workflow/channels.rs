use super::graph::{NodeId, NodeRef};

/// Current producer of each checkpoint channel while the graph is assembled.
///
/// Every modifier node consumes the set and returns the re-pointed one, so
/// the builder never mutates a shared "current model" variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSet {
    /// Generation parameters (`MODEL`).
    pub model: NodeRef,
    /// Text conditioning (`CLIP`).
    pub clip: NodeRef,
    /// Decode context (`VAE`).
    pub vae: NodeRef,
}

impl ChannelSet {
    pub fn from_checkpoint(node: NodeId) -> Self {
        Self {
            model: NodeRef::new(node, 0),
            clip: NodeRef::new(node, 1),
            vae: NodeRef::new(node, 2),
        }
    }

    /// Channels after a LoRA node that re-exposes model and clip.
    pub fn through_lora(self, node: NodeId) -> Self {
        Self {
            model: NodeRef::new(node, 0),
            clip: NodeRef::new(node, 1),
            ..self
        }
    }

    /// Channels after a clip-layer truncation node.
    pub fn through_clip_skip(self, node: NodeId) -> Self {
        Self {
            clip: NodeRef::new(node, 0),
            ..self
        }
    }
}
