//! # Instance Batcher
//!
//! Instanced draw-batch aggregation for GPU renderers.
//!
//! Render submissions that share a pass are grouped into instance buffers,
//! one group per compatible geometry/lightmap/stride combination. Buffers
//! grow by doubling on demand, are uploaded once per frame, and are kept
//! across frames so steady-state frames do not allocate.
//!
//! ## Quick Start
//!
//! ```rust
//! use instance_batcher::prelude::*;
//!
//! let mut device = HeadlessDevice::new();
//! let mut recorder = HeadlessRecorder::new();
//! let mut registry = BatchRegistry::new();
//!
//! let pass = device.create_pass("forward");
//! let submission = SubmissionDesc::new(GeometrySource::default(), device.create_descriptor_set())
//!     .with_shader(device.create_shader("forward"));
//! let block = AttributeBlock::from_bytes(
//!     vec![Attribute::new("a_color", Format::Rgba32F)],
//!     vec![0u8; 16],
//! );
//!
//! let batch = registry.get(pass, PRIMARY_KEY);
//! batch.merge(&mut device, &submission, &block, 0, None)?;
//! batch.upload_buffers(&mut recorder);
//! for draw in batch.draws() {
//!     assert_eq!(draw.instance_count, 1);
//! }
//! batch.clear();
//! registry.destroy_all(&mut device);
//! # Ok::<(), BatchError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod batching;
pub mod config;
pub mod device;
pub mod submission;

/// Common imports for batcher users
pub mod prelude {
    pub use crate::{
        batching::{
            BatchError, BatchRegistry, BatchStats, InstanceGroup, InstancedBatch, InstancedDraw,
            MergeOutcome, SkipReason, PRIMARY_KEY,
        },
        config::{BatchingConfig, Config, ConfigError},
        device::{
            Attribute, BufferHandle, BufferInfo, BufferUsage, CommandRecorder,
            DescriptorSetHandle, DeviceError, Format, GraphicsDevice, HeadlessDevice,
            HeadlessRecorder, MemoryFlags, PassHandle, ShaderHandle, TextureHandle,
        },
        submission::{AttributeBlock, GeometrySource, RenderSubmission, SubmissionDesc},
    };
}
