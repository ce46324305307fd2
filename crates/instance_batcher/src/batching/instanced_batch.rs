//! Instanced batch aggregator
//!
//! Collects the submissions of one pass into instance groups and uploads
//! them once per frame.
//!
//! # Frame lifecycle
//!
//! ```text
//! merge() × N  →  upload_buffers()  →  draws()  →  clear()
//! ```
//!
//! Groups and their GPU buffers survive [`InstancedBatch::clear`], so a
//! frame with the same composition as the previous one allocates nothing.
//! GPU resources are only released by [`InstancedBatch::destroy`].

use crate::config::{BatchingConfig, ConfigError};
use crate::device::{
    CommandRecorder, DescriptorSetHandle, DeviceError, GraphicsDevice, InputAssemblerHandle,
    PassHandle, ShaderHandle,
};
use crate::submission::{AttributeBlock, RenderSubmission};

use super::instance_group::InstanceGroup;

/// Errors that abort a merge
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// The device failed to create or resize a resource
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Why a submission was dropped without touching any group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The attribute block carried no bytes
    EmptyPayload,
    /// No shader for the pass index and no override given
    MissingShader,
    /// The first compatible group was built with a different stride
    StrideMismatch {
        /// Stride of the matching group
        expected: usize,
        /// Stride of the rejected payload
        found: usize,
    },
}

/// Result of a successful merge call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Payload appended to an existing group
    Appended {
        /// Index of the group in [`InstancedBatch::instances`]
        group: usize,
    },
    /// A new group was created for the payload
    Created {
        /// Index of the group in [`InstancedBatch::instances`]
        group: usize,
    },
    /// Submission dropped for this frame
    Skipped(SkipReason),
}

/// One instanced draw call ready to be recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstancedDraw {
    /// Binding holding geometry and instance buffers
    pub input_assembler: InputAssemblerHandle,
    /// Shader to bind
    pub shader: ShaderHandle,
    /// Descriptor set to bind
    pub descriptor_set: DescriptorSetHandle,
    /// Instances published by the last upload
    pub instance_count: u32,
}

/// Occupancy snapshot of an aggregator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Number of instance groups
    pub groups: usize,
    /// Instances written this frame across all groups
    pub instances: usize,
    /// Allocated instance slots across all groups
    pub capacity: usize,
    /// Host bytes reserved for instance data
    pub bytes_reserved: usize,
}

/// Aggregates per-instance submissions of a pass into instance groups
#[derive(Debug)]
pub struct InstancedBatch {
    pass: PassHandle,
    instances: Vec<InstanceGroup>,
    has_pending_models: bool,
    dynamic_offsets: Vec<u32>,
    initial_capacity: usize,
    max_capacity: usize,
    lightmap_binding: u32,
}

impl InstancedBatch {
    /// Create an empty aggregator for `pass`
    ///
    /// Fails if `config` would let group capacities leave the power-of-two
    /// schedule or exceed the cap.
    pub fn new(pass: PassHandle, config: &BatchingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_validated_config(pass, config))
    }

    /// Create an aggregator from a configuration that already passed validation
    pub(crate) fn with_validated_config(pass: PassHandle, config: &BatchingConfig) -> Self {
        Self {
            pass,
            instances: Vec::new(),
            has_pending_models: false,
            dynamic_offsets: Vec::new(),
            initial_capacity: config.initial_capacity as usize,
            max_capacity: config.max_capacity as usize,
            lightmap_binding: config.lightmap_binding,
        }
    }

    /// Append one submission's per-instance payload
    ///
    /// Groups are searched in creation order. The first group sharing the
    /// submission's index buffer and lightmap, and still below the capacity
    /// cap, receives the payload; if none exists a new group is created.
    /// A matching group takes over the submission's shader and descriptor
    /// set, so the last merged submission decides what the group draws with.
    ///
    /// Policy skips are reported as [`MergeOutcome::Skipped`] and leave the
    /// aggregator untouched. Only device failures are errors.
    pub fn merge(
        &mut self,
        device: &mut dyn GraphicsDevice,
        submission: &dyn RenderSubmission,
        block: &AttributeBlock,
        pass_index: usize,
        shader_override: Option<ShaderHandle>,
    ) -> Result<MergeOutcome, BatchError> {
        if block.is_empty() {
            log::trace!("Skipping submission without instance attributes");
            return Ok(MergeOutcome::Skipped(SkipReason::EmptyPayload));
        }

        let lightmap = submission.texture(self.lightmap_binding);
        let Some(shader) = shader_override.or_else(|| submission.shader(pass_index)) else {
            log::debug!("Skipping submission with no shader for pass index {}", pass_index);
            return Ok(MergeOutcome::Skipped(SkipReason::MissingShader));
        };
        let descriptor_set = submission.descriptor_set();
        let geometry = submission.geometry();
        let stride = block.stride();

        let candidate = self
            .instances
            .iter()
            .position(|group| group.accepts(geometry.index_buffer, lightmap, self.max_capacity));

        if let Some(index) = candidate {
            let group = &mut self.instances[index];

            if group.stride() != stride {
                log::debug!(
                    "Dropping submission: stride {} does not match group stride {}",
                    stride,
                    group.stride()
                );
                return Ok(MergeOutcome::Skipped(SkipReason::StrideMismatch {
                    expected: group.stride(),
                    found: stride,
                }));
            }

            if group.count() == group.capacity() {
                group.grow(device)?;
            }
            group.rebind(shader, descriptor_set);
            group.push(block.buffer());
            self.has_pending_models = true;

            log::trace!("Merged instance {} into group {}", group.count(), index);
            return Ok(MergeOutcome::Appended { group: index });
        }

        let group = InstanceGroup::create(
            device,
            geometry,
            block,
            shader,
            descriptor_set,
            lightmap,
            self.initial_capacity,
        )?;
        self.instances.push(group);
        self.has_pending_models = true;

        Ok(MergeOutcome::Created {
            group: self.instances.len() - 1,
        })
    }

    /// Record buffer updates for every non-empty group
    ///
    /// Each group's whole host buffer is transferred, including slots past
    /// its current count. Returns the number of updates recorded.
    pub fn upload_buffers(&mut self, recorder: &mut dyn CommandRecorder) -> usize {
        let uploaded = self
            .instances
            .iter_mut()
            .map(|group| group.upload(recorder))
            .filter(|recorded| *recorded)
            .count();

        log::trace!("Uploaded {} of {} instance groups", uploaded, self.instances.len());
        uploaded
    }

    /// Reset every group to zero instances, keeping all allocations
    pub fn clear(&mut self) {
        for group in &mut self.instances {
            group.reset();
        }
        self.has_pending_models = false;
    }

    /// Release every group's GPU resources and forget the groups
    pub fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        let released = self.instances.len();
        for group in self.instances.drain(..) {
            group.destroy(device);
        }
        self.has_pending_models = false;

        if released > 0 {
            log::info!("Destroyed {} instance groups for pass {:?}", released, self.pass);
        }
    }

    /// Draw calls for the groups that hold instances
    pub fn draws(&self) -> impl Iterator<Item = InstancedDraw> + '_ {
        self.instances
            .iter()
            .filter(|group| !group.is_empty())
            .map(|group| InstancedDraw {
                input_assembler: group.input_assembler().handle(),
                shader: group.shader(),
                descriptor_set: group.descriptor_set(),
                instance_count: group.input_assembler().instance_count(),
            })
    }

    /// Occupancy across all groups
    pub fn stats(&self) -> BatchStats {
        self.instances
            .iter()
            .fold(BatchStats::default(), |mut stats, group| {
                stats.groups += 1;
                stats.instances += group.count();
                stats.capacity += group.capacity();
                stats.bytes_reserved += group.data().len();
                stats
            })
    }

    /// Instance groups in creation order
    pub fn instances(&self) -> &[InstanceGroup] {
        &self.instances
    }

    /// Pass this aggregator batches for
    pub const fn pass(&self) -> PassHandle {
        self.pass
    }

    /// Whether anything was merged since the last clear
    pub const fn has_pending_models(&self) -> bool {
        self.has_pending_models
    }

    /// Per-draw dynamic offsets owned by the draw path
    pub fn dynamic_offsets(&self) -> &[u32] {
        &self.dynamic_offsets
    }

    /// Mutable per-draw dynamic offsets
    pub fn dynamic_offsets_mut(&mut self) -> &mut Vec<u32> {
        &mut self.dynamic_offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LIGHTMAP_TEXTURE_BINDING;
    use crate::device::{
        Attribute, BufferInfo, BufferUsage, Format, HeadlessDevice, HeadlessRecorder, MemoryFlags,
    };
    use crate::submission::{GeometrySource, SubmissionDesc};

    struct Fixture {
        device: HeadlessDevice,
        batch: InstancedBatch,
        submission: SubmissionDesc,
    }

    fn index_buffer(device: &mut HeadlessDevice) -> crate::device::BufferHandle {
        device
            .create_buffer(&BufferInfo {
                usage: BufferUsage::INDEX,
                memory: MemoryFlags::DEVICE,
                size: 12,
                stride: 2,
            })
            .unwrap()
    }

    fn fixture() -> Fixture {
        let mut device = HeadlessDevice::new();
        let pass = device.create_pass("forward");
        let ib = index_buffer(&mut device);
        let shader = device.create_shader("forward");
        let ds = device.create_descriptor_set();
        let submission = SubmissionDesc::new(
            GeometrySource {
                index_buffer: Some(ib),
                ..GeometrySource::default()
            },
            ds,
        )
        .with_shader(shader);

        Fixture {
            device,
            batch: InstancedBatch::new(pass, &BatchingConfig::default()).unwrap(),
            submission,
        }
    }

    fn payload(stride: usize, byte: u8) -> AttributeBlock {
        AttributeBlock::from_bytes(vec![Attribute::new("a_data", Format::R8)], vec![byte; stride])
    }

    #[test]
    fn test_empty_payload_is_skipped() {
        let mut f = fixture();

        let outcome = f
            .batch
            .merge(&mut f.device, &f.submission, &AttributeBlock::default(), 0, None)
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Skipped(SkipReason::EmptyPayload));
        assert!(f.batch.instances().is_empty());
        assert!(!f.batch.has_pending_models());
    }

    #[test]
    fn test_missing_shader_is_skipped_unless_overridden() {
        let mut f = fixture();
        let block = payload(16, 1);

        let outcome = f.batch.merge(&mut f.device, &f.submission, &block, 3, None).unwrap();
        assert_eq!(outcome, MergeOutcome::Skipped(SkipReason::MissingShader));

        let shadow = f.device.create_shader("shadow");
        let outcome = f
            .batch
            .merge(&mut f.device, &f.submission, &block, 3, Some(shadow))
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Created { group: 0 });
        assert_eq!(f.batch.instances()[0].shader(), shadow);
    }

    #[test]
    fn test_three_merges_share_one_group() {
        let mut f = fixture();

        for byte in 1..=3 {
            f.batch
                .merge(&mut f.device, &f.submission, &payload(16, byte), 0, None)
                .unwrap();
        }

        let groups = f.batch.instances();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count(), 3);
        assert_eq!(groups[0].capacity(), 32);
        assert_eq!(&groups[0].data()[0..16], &[1; 16]);
        assert_eq!(&groups[0].data()[16..32], &[2; 16]);
        assert_eq!(&groups[0].data()[32..48], &[3; 16]);
        assert!(groups[0].data()[48..].iter().all(|b| *b == 0));
        assert!(f.batch.has_pending_models());
    }

    #[test]
    fn test_stride_mismatch_drops_submission() {
        let mut f = fixture();
        f.batch
            .merge(&mut f.device, &f.submission, &payload(16, 1), 0, None)
            .unwrap();

        let outcome = f
            .batch
            .merge(&mut f.device, &f.submission, &payload(8, 2), 0, None)
            .unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::Skipped(SkipReason::StrideMismatch { expected: 16, found: 8 })
        );
        assert_eq!(f.batch.instances().len(), 1);
        assert_eq!(f.batch.instances()[0].count(), 1);
    }

    #[test]
    fn test_lightmap_identity_partitions_groups() {
        let mut f = fixture();
        let lightmap_a = f.device.create_texture("lightmap");
        let lightmap_b = f.device.create_texture("lightmap");
        let a = f.submission.clone().with_texture(LIGHTMAP_TEXTURE_BINDING, lightmap_a);
        let b = f.submission.clone().with_texture(LIGHTMAP_TEXTURE_BINDING, lightmap_b);
        let block = payload(16, 1);

        let first = f.batch.merge(&mut f.device, &a, &block, 0, None).unwrap();
        let second = f.batch.merge(&mut f.device, &b, &block, 0, None).unwrap();
        let third = f.batch.merge(&mut f.device, &f.submission, &block, 0, None).unwrap();
        let fourth = f.batch.merge(&mut f.device, &a, &block, 0, None).unwrap();

        assert_eq!(first, MergeOutcome::Created { group: 0 });
        assert_eq!(second, MergeOutcome::Created { group: 1 });
        assert_eq!(third, MergeOutcome::Created { group: 2 });
        assert_eq!(fourth, MergeOutcome::Appended { group: 0 });
    }

    #[test]
    fn test_textures_outside_lightmap_slot_are_ignored() {
        let mut f = fixture();
        let albedo = f.device.create_texture("albedo");
        let textured = f.submission.clone().with_texture(0, albedo);
        let block = payload(16, 1);

        f.batch.merge(&mut f.device, &f.submission, &block, 0, None).unwrap();
        let outcome = f.batch.merge(&mut f.device, &textured, &block, 0, None).unwrap();

        assert_eq!(outcome, MergeOutcome::Appended { group: 0 });
    }

    #[test]
    fn test_index_buffer_identity_partitions_groups() {
        let mut f = fixture();
        let other_ib = index_buffer(&mut f.device);
        let ds = f.submission.descriptor_set();
        let shader = f.submission.shader(0).unwrap();
        let other = SubmissionDesc::new(
            GeometrySource {
                index_buffer: Some(other_ib),
                ..GeometrySource::default()
            },
            ds,
        )
        .with_shader(shader);
        let block = payload(16, 1);

        f.batch.merge(&mut f.device, &f.submission, &block, 0, None).unwrap();
        let outcome = f.batch.merge(&mut f.device, &other, &block, 0, None).unwrap();

        assert_eq!(outcome, MergeOutcome::Created { group: 1 });
        assert_eq!(f.batch.instances()[1].input_assembler().index_buffer(), Some(other_ib));
    }

    #[test]
    fn test_latest_shader_and_descriptor_set_win() {
        let mut f = fixture();
        let block = payload(16, 1);
        f.batch.merge(&mut f.device, &f.submission, &block, 0, None).unwrap();

        let mut tweaked = f.submission.clone();
        let ds = f.device.create_descriptor_set();
        tweaked.set_descriptor_set(ds);
        let shader = f.device.create_shader("forward_tweaked");
        f.batch
            .merge(&mut f.device, &tweaked, &block, 0, Some(shader))
            .unwrap();

        let group = &f.batch.instances()[0];
        assert_eq!(group.count(), 2);
        assert_eq!(group.shader(), shader);
        assert_eq!(group.descriptor_set(), ds);
    }

    #[test]
    fn test_growth_to_64_preserves_entries() {
        let mut f = fixture();

        for i in 0..33u8 {
            f.batch
                .merge(&mut f.device, &f.submission, &payload(8, i), 0, None)
                .unwrap();
        }

        let group = &f.batch.instances()[0];
        assert_eq!(group.capacity(), 64);
        assert_eq!(group.data().len(), 512);
        for i in 0..33usize {
            assert_eq!(&group.data()[i * 8..(i + 1) * 8], &[i as u8; 8]);
        }
        assert_eq!(f.device.buffer_size(group.vertex_buffer()), Some(512));
    }

    #[test]
    fn test_device_failure_propagates() {
        let mut device = HeadlessDevice::with_memory_budget(12);
        let pass = device.create_pass("forward");
        let ib = index_buffer(&mut device);
        let submission = SubmissionDesc::new(
            GeometrySource {
                index_buffer: Some(ib),
                ..GeometrySource::default()
            },
            device.create_descriptor_set(),
        )
        .with_shader(device.create_shader("forward"));
        let mut batch = InstancedBatch::new(pass, &BatchingConfig::default()).unwrap();

        let result = batch.merge(&mut device, &submission, &payload(16, 1), 0, None);

        assert!(matches!(result, Err(BatchError::Device(DeviceError::OutOfMemory { .. }))));
        assert!(batch.instances().is_empty());
        assert!(!batch.has_pending_models());
    }

    #[test]
    fn test_upload_draws_and_clear() {
        let mut f = fixture();
        let mut recorder = HeadlessRecorder::new();
        for _ in 0..5 {
            f.batch
                .merge(&mut f.device, &f.submission, &payload(16, 9), 0, None)
                .unwrap();
        }

        assert_eq!(f.batch.upload_buffers(&mut recorder), 1);
        assert_eq!(f.device.submit(&mut recorder).unwrap(), 1);

        let draws: Vec<_> = f.batch.draws().collect();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].instance_count, 5);
        assert_eq!(draws[0].shader, f.submission.shader(0).unwrap());

        let vb = f.batch.instances()[0].vertex_buffer();
        assert_eq!(&f.device.buffer_contents(vb).unwrap()[..80], &[9; 80]);

        f.batch.clear();
        assert!(!f.batch.has_pending_models());
        assert_eq!(f.batch.draws().count(), 0);
        assert_eq!(f.batch.upload_buffers(&mut recorder), 0);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_new_rejects_invalid_capacities() {
        let mut device = HeadlessDevice::new();
        let pass = device.create_pass("forward");

        for (initial_capacity, max_capacity) in [(0, 1024), (3, 1024), (32, 1000), (64, 32)] {
            let config = BatchingConfig {
                initial_capacity,
                max_capacity,
                ..BatchingConfig::default()
            };
            assert!(
                matches!(InstancedBatch::new(pass, &config), Err(ConfigError::Invalid(_))),
                "initial {initial_capacity}, max {max_capacity}"
            );
        }
    }

    #[test]
    fn test_stats_and_dynamic_offsets() {
        let mut f = fixture();
        for _ in 0..3 {
            f.batch
                .merge(&mut f.device, &f.submission, &payload(16, 1), 0, None)
                .unwrap();
        }
        f.batch.dynamic_offsets_mut().extend([0, 256]);

        assert_eq!(
            f.batch.stats(),
            BatchStats {
                groups: 1,
                instances: 3,
                capacity: 32,
                bytes_reserved: 512,
            }
        );
        assert_eq!(f.batch.dynamic_offsets(), &[0, 256]);
    }
}
