//! Workflow graph builder.
//!
//! A pure function of canonical metadata and resolved artifacts producing a
//! validated node graph in the generation engine's API format.
//!
//! Node ids are namespaced: shared nodes use 1-8, the two-pass branch uses
//! 20-25 and the LoRA chain counts up from 100. Callers must not assume a
//! fixed node count.

mod builder;
mod channels;
mod graph;
mod sampler;

pub use builder::{
    build_workflow, build_workflow_with, random_seed, strip_lora_tags, BuildOptions,
    BuiltWorkflow,
};
pub use channels::ChannelSet;
pub use graph::{Node, NodeId, NodeInput, NodeKind, NodeRef, WorkflowGraph};
pub use sampler::{map_sampler, DEFAULT_SAMPLER, DEFAULT_SCHEDULER};
