//! Instanced draw batching
//!
//! Submissions that share a pass are merged into instance groups, one group
//! per (index buffer, lightmap, stride) combination, and each group becomes a
//! single instanced draw call.

pub mod instance_group;
pub mod instanced_batch;
pub mod registry;

#[cfg(test)]
mod tests;

pub use instance_group::{InputAssembler, InstanceGroup};
pub use instanced_batch::{
    BatchError, BatchStats, InstancedBatch, InstancedDraw, MergeOutcome, SkipReason,
};
pub use registry::{BatchRegistry, PRIMARY_KEY};
