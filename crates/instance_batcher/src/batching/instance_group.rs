//! Instance groups
//!
//! One group is one instanced draw call: a shared geometry source, a texture
//! binding, a fixed per-instance stride, and a host-side byte buffer that
//! mirrors the group's per-instance vertex buffer on the GPU.

use crate::device::{
    Attribute, BufferHandle, BufferInfo, BufferUsage, CommandRecorder, DescriptorSetHandle,
    DeviceResult, GraphicsDevice, InputAssemblerHandle, InputAssemblerInfo, MemoryFlags,
    ShaderHandle, TextureHandle,
};
use crate::submission::{AttributeBlock, GeometrySource};

/// Input-assembler binding owned by a group
#[derive(Debug, Clone)]
pub struct InputAssembler {
    handle: InputAssemblerHandle,
    info: InputAssemblerInfo,
    instance_count: u32,
}

impl InputAssembler {
    /// Device handle of the binding
    pub const fn handle(&self) -> InputAssemblerHandle {
        self.handle
    }

    /// Shared index buffer; the primary compatibility key of the group
    pub const fn index_buffer(&self) -> Option<BufferHandle> {
        self.info.index_buffer
    }

    /// Vertex buffers; the last one is the group's instance buffer
    pub fn vertex_buffers(&self) -> &[BufferHandle] {
        &self.info.vertex_buffers
    }

    /// Combined per-vertex and per-instance attribute layout
    pub fn attributes(&self) -> &[Attribute] {
        &self.info.attributes
    }

    /// Instances drawn by the next draw call
    pub const fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Set the number of instances to draw
    pub fn set_instance_count(&mut self, count: u32) {
        self.instance_count = count;
    }
}

/// A batch of compatible submissions drawn with a single instanced call
#[derive(Debug)]
pub struct InstanceGroup {
    count: usize,
    capacity: usize,
    stride: usize,
    data: Vec<u8>,
    vb: BufferHandle,
    ia: InputAssembler,
    shader: ShaderHandle,
    descriptor_set: DescriptorSetHandle,
    lightmap: Option<TextureHandle>,
}

impl InstanceGroup {
    /// Build a group around its first submission
    ///
    /// The instance buffer is appended after the geometry's own vertex
    /// buffers and every attribute of `block` is bound to it as a
    /// per-instance attribute.
    pub(crate) fn create(
        device: &mut dyn GraphicsDevice,
        geometry: &GeometrySource,
        block: &AttributeBlock,
        shader: ShaderHandle,
        descriptor_set: DescriptorSetHandle,
        lightmap: Option<TextureHandle>,
        initial_capacity: usize,
    ) -> DeviceResult<Self> {
        let stride = block.stride();
        let size = stride * initial_capacity;

        let vb = device.create_buffer(&BufferInfo {
            usage: BufferUsage::VERTEX | BufferUsage::TRANSFER_DST,
            memory: MemoryFlags::HOST | MemoryFlags::DEVICE,
            size: size as u64,
            stride: stride as u32,
        })?;

        let mut vertex_buffers = geometry.vertex_buffers.clone();
        vertex_buffers.push(vb);
        let slot = (vertex_buffers.len() - 1) as u32;

        let mut attributes = geometry.attributes.clone();
        attributes.extend(block.attributes().iter().map(|attr| Attribute {
            stream: slot,
            instanced: true,
            ..attr.clone()
        }));

        let info = InputAssemblerInfo {
            attributes,
            vertex_buffers,
            index_buffer: geometry.index_buffer,
        };

        let handle = match device.create_input_assembler(&info) {
            Ok(handle) => handle,
            Err(err) => {
                device.destroy_buffer(vb);
                return Err(err);
            }
        };

        let mut data = vec![0; size];
        data[..stride].copy_from_slice(block.buffer());

        log::debug!(
            "Created instance group: stride {} bytes, capacity {}, index buffer {:?}",
            stride,
            initial_capacity,
            geometry.index_buffer
        );

        Ok(Self {
            count: 1,
            capacity: initial_capacity,
            stride,
            data,
            vb,
            ia: InputAssembler {
                handle,
                info,
                instance_count: 0,
            },
            shader,
            descriptor_set,
            lightmap,
        })
    }

    /// Whether a submission with this index buffer and lightmap may join
    pub(crate) fn accepts(
        &self,
        index_buffer: Option<BufferHandle>,
        lightmap: Option<TextureHandle>,
        max_capacity: usize,
    ) -> bool {
        self.ia.index_buffer() == index_buffer
            && self.count < max_capacity
            && self.lightmap == lightmap
    }

    /// Adopt the most recent shader and descriptor set
    pub(crate) fn rebind(&mut self, shader: ShaderHandle, descriptor_set: DescriptorSetHandle) {
        if self.shader != shader {
            self.shader = shader;
        }
        if self.descriptor_set != descriptor_set {
            self.descriptor_set = descriptor_set;
        }
    }

    /// Double the capacity, keeping existing instances in the low region
    ///
    /// The device buffer is resized first so a failed resize leaves the
    /// group unchanged.
    pub(crate) fn grow(&mut self, device: &mut dyn GraphicsDevice) -> DeviceResult<()> {
        let capacity = self.capacity << 1;
        let size = self.stride * capacity;

        device.resize_buffer(self.vb, size as u64)?;
        self.data.resize(size, 0);
        self.capacity = capacity;

        log::debug!(
            "Grew instance group to capacity {} ({} bytes)",
            capacity,
            size
        );
        Ok(())
    }

    /// Copy one instance payload into the next free slot
    pub(crate) fn push(&mut self, payload: &[u8]) {
        debug_assert!(self.count < self.capacity);
        debug_assert_eq!(payload.len(), self.stride);

        let offset = self.stride * self.count;
        self.data[offset..offset + self.stride].copy_from_slice(payload);
        self.count += 1;
    }

    /// Publish the instance count and record the full buffer transfer
    ///
    /// Returns `false` without recording anything when the group is empty.
    pub(crate) fn upload(&mut self, recorder: &mut dyn CommandRecorder) -> bool {
        if self.count == 0 {
            return false;
        }

        self.ia.set_instance_count(self.count as u32);
        recorder.update_buffer(self.vb, &self.data);
        true
    }

    /// Forget this frame's instances, keeping capacity and buffers
    pub(crate) fn reset(&mut self) {
        self.count = 0;
    }

    /// Release the instance buffer and input assembler
    pub(crate) fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.destroy_buffer(self.vb);
        device.destroy_input_assembler(self.ia.handle);
    }

    /// Instances written this frame
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Allocated instance slots
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes per instance
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Host mirror of the instance buffer, `stride * capacity` bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Per-instance vertex buffer
    pub const fn vertex_buffer(&self) -> BufferHandle {
        self.vb
    }

    /// Input-assembler binding
    pub const fn input_assembler(&self) -> &InputAssembler {
        &self.ia
    }

    /// Shader used at draw time
    pub const fn shader(&self) -> ShaderHandle {
        self.shader
    }

    /// Descriptor set used at draw time
    pub const fn descriptor_set(&self) -> DescriptorSetHandle {
        self.descriptor_set
    }

    /// Lightmap texture shared by every instance
    pub const fn lightmap(&self) -> Option<TextureHandle> {
        self.lightmap
    }

    /// Whether nothing was written this frame
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Format, HeadlessDevice, HeadlessRecorder};

    fn block(byte: u8) -> AttributeBlock {
        AttributeBlock::from_bytes(
            vec![
                Attribute::new("a_offset", Format::Rg32F),
                Attribute::new("a_tint", Format::Rgba8).normalized(true),
            ],
            vec![byte; 12],
        )
    }

    fn setup(device: &mut HeadlessDevice) -> (GeometrySource, ShaderHandle, DescriptorSetHandle) {
        let position = device
            .create_buffer(&BufferInfo {
                usage: BufferUsage::VERTEX,
                memory: MemoryFlags::DEVICE,
                size: 36,
                stride: 12,
            })
            .unwrap();
        let geometry = GeometrySource {
            vertex_buffers: vec![position],
            attributes: vec![Attribute::new("a_position", Format::Rgb32F)],
            index_buffer: None,
        };
        (geometry, device.create_shader("unlit"), device.create_descriptor_set())
    }

    #[test]
    fn test_create_binds_instance_attributes() {
        let mut device = HeadlessDevice::new();
        let (geometry, shader, ds) = setup(&mut device);

        let group =
            InstanceGroup::create(&mut device, &geometry, &block(7), shader, ds, None, 32).unwrap();

        let ia = group.input_assembler();
        assert_eq!(ia.vertex_buffers().len(), 2);
        assert_eq!(ia.vertex_buffers()[1], group.vertex_buffer());
        assert_eq!(ia.attributes().len(), 3);
        assert!(!ia.attributes()[0].instanced);
        assert!(ia.attributes()[1..].iter().all(|a| a.instanced && a.stream == 1));
        assert!(ia.attributes()[2].normalized);

        assert_eq!(group.count(), 1);
        assert_eq!(group.capacity(), 32);
        assert_eq!(group.data().len(), 12 * 32);
        assert_eq!(&group.data()[..12], &[7; 12]);
        assert!(group.data()[12..].iter().all(|b| *b == 0));
        assert_eq!(device.buffer_size(group.vertex_buffer()), Some(12 * 32));
    }

    #[test]
    fn test_failed_input_assembler_releases_buffer() {
        let mut device = HeadlessDevice::new();
        let (mut geometry, shader, ds) = setup(&mut device);
        let stale = geometry.vertex_buffers[0];
        device.destroy_buffer(stale);
        geometry.vertex_buffers = vec![stale];

        let result = InstanceGroup::create(&mut device, &geometry, &block(1), shader, ds, None, 32);

        assert!(result.is_err());
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_grow_preserves_contents() {
        let mut device = HeadlessDevice::new();
        let (geometry, shader, ds) = setup(&mut device);
        let mut group =
            InstanceGroup::create(&mut device, &geometry, &block(1), shader, ds, None, 2).unwrap();
        group.push(&[2; 12]);

        group.grow(&mut device).unwrap();
        group.push(&[3; 12]);

        assert_eq!(group.capacity(), 4);
        assert_eq!(group.data().len(), 48);
        assert_eq!(&group.data()[..12], &[1; 12]);
        assert_eq!(&group.data()[12..24], &[2; 12]);
        assert_eq!(&group.data()[24..36], &[3; 12]);
        assert_eq!(device.buffer_size(group.vertex_buffer()), Some(48));
    }

    #[test]
    fn test_failed_grow_leaves_group_unchanged() {
        let mut device = HeadlessDevice::with_memory_budget(36 + 24);
        let (geometry, shader, ds) = setup(&mut device);
        let mut group =
            InstanceGroup::create(&mut device, &geometry, &block(1), shader, ds, None, 2).unwrap();

        assert!(group.grow(&mut device).is_err());
        assert_eq!(group.capacity(), 2);
        assert_eq!(group.data().len(), 24);
    }

    #[test]
    fn test_upload_and_reset() {
        let mut device = HeadlessDevice::new();
        let mut recorder = HeadlessRecorder::new();
        let (geometry, shader, ds) = setup(&mut device);
        let mut group =
            InstanceGroup::create(&mut device, &geometry, &block(5), shader, ds, None, 32).unwrap();

        assert!(group.upload(&mut recorder));
        assert_eq!(group.input_assembler().instance_count(), 1);
        assert_eq!(recorder.updates()[0].data.len(), 12 * 32);

        group.reset();
        recorder.reset();
        assert!(!group.upload(&mut recorder));
        assert!(recorder.is_empty());
        assert_eq!(group.capacity(), 32);
    }

    #[test]
    fn test_rebind_is_last_writer_wins() {
        let mut device = HeadlessDevice::new();
        let (geometry, shader, ds) = setup(&mut device);
        let mut group =
            InstanceGroup::create(&mut device, &geometry, &block(5), shader, ds, None, 32).unwrap();
        let other_shader = device.create_shader("unlit_variant");
        let other_ds = device.create_descriptor_set();

        group.rebind(other_shader, other_ds);

        assert_eq!(group.shader(), other_shader);
        assert_eq!(group.descriptor_set(), other_ds);
    }

    #[test]
    fn test_destroy_releases_resources() {
        let mut device = HeadlessDevice::new();
        let (geometry, shader, ds) = setup(&mut device);
        let group =
            InstanceGroup::create(&mut device, &geometry, &block(5), shader, ds, None, 32).unwrap();

        group.destroy(&mut device);

        assert_eq!(device.live_buffers(), 1);
        assert_eq!(device.live_input_assemblers(), 0);
    }
}
