//! Headless device backend
//!
//! A CPU-only implementation of [`GraphicsDevice`] and [`CommandRecorder`].
//! Buffers are plain byte vectors held in `slotmap` tables, so handles are
//! generational and stale handles are detected. Recorded updates are kept
//! until [`HeadlessDevice::submit`] applies them, which makes the backend
//! useful for tests and for driving the batcher without a window.

use slotmap::SlotMap;

use super::{
    BufferHandle, BufferInfo, CommandRecorder, DescriptorSetHandle, DeviceError, DeviceResult,
    GraphicsDevice, InputAssemblerHandle, InputAssemblerInfo, PassHandle, ShaderHandle,
    TextureHandle,
};

/// CPU-side storage for one buffer
#[derive(Debug, Clone)]
struct HeadlessBuffer {
    info: BufferInfo,
    contents: Vec<u8>,
}

/// Recording device that keeps every resource in host memory
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    buffers: SlotMap<BufferHandle, HeadlessBuffer>,
    input_assemblers: SlotMap<InputAssemblerHandle, InputAssemblerInfo>,
    textures: SlotMap<TextureHandle, String>,
    shaders: SlotMap<ShaderHandle, String>,
    descriptor_sets: SlotMap<DescriptorSetHandle, ()>,
    passes: SlotMap<PassHandle, String>,
    memory_budget: Option<u64>,
    allocated_bytes: u64,
    resize_count: usize,
}

impl HeadlessDevice {
    /// Create a device with unlimited memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device that fails allocations beyond `bytes` in total
    pub fn with_memory_budget(bytes: u64) -> Self {
        Self {
            memory_budget: Some(bytes),
            ..Self::default()
        }
    }

    /// Register a texture
    pub fn create_texture(&mut self, name: impl Into<String>) -> TextureHandle {
        self.textures.insert(name.into())
    }

    /// Register a shader variant
    pub fn create_shader(&mut self, name: impl Into<String>) -> ShaderHandle {
        self.shaders.insert(name.into())
    }

    /// Register a descriptor set
    pub fn create_descriptor_set(&mut self) -> DescriptorSetHandle {
        self.descriptor_sets.insert(())
    }

    /// Register a pass / pipeline configuration
    pub fn create_pass(&mut self, name: impl Into<String>) -> PassHandle {
        self.passes.insert(name.into())
    }

    /// Name a pass was registered with
    pub fn pass_name(&self, pass: PassHandle) -> Option<&str> {
        self.passes.get(pass).map(String::as_str)
    }

    /// Current size of a buffer in bytes
    pub fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffers.get(buffer).map(|b| b.contents.len() as u64)
    }

    /// Creation parameters of a buffer (size is the requested creation size)
    pub fn buffer_info(&self, buffer: BufferHandle) -> Option<&BufferInfo> {
        self.buffers.get(buffer).map(|b| &b.info)
    }

    /// Current contents of a buffer
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(buffer).map(|b| b.contents.as_slice())
    }

    /// Layout an input assembler was created with
    pub fn input_assembler(&self, handle: InputAssemblerHandle) -> Option<&InputAssemblerInfo> {
        self.input_assemblers.get(handle)
    }

    /// Number of live buffers
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Number of live input assemblers
    pub fn live_input_assemblers(&self) -> usize {
        self.input_assemblers.len()
    }

    /// Total bytes held by live buffers
    pub const fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// Number of successful in-place resizes since creation
    pub const fn resize_count(&self) -> usize {
        self.resize_count
    }

    /// Apply every update recorded in `recorder`, then empty it
    ///
    /// Returns the number of updates applied.
    pub fn submit(&mut self, recorder: &mut HeadlessRecorder) -> DeviceResult<usize> {
        let applied = recorder.updates.len();

        for update in recorder.updates.drain(..) {
            let buffer = self.buffers.get_mut(update.buffer).ok_or_else(|| {
                DeviceError::InvalidHandle(format!("{:?}", update.buffer))
            })?;

            if update.data.len() > buffer.contents.len() {
                return Err(DeviceError::Backend(format!(
                    "update of {} bytes overflows buffer of {} bytes",
                    update.data.len(),
                    buffer.contents.len()
                )));
            }

            buffer.contents[..update.data.len()].copy_from_slice(&update.data);
        }

        log::trace!("Headless device applied {} buffer updates", applied);
        Ok(applied)
    }

    fn reserve(&mut self, bytes: u64) -> DeviceResult<()> {
        if let Some(budget) = self.memory_budget {
            if self.allocated_bytes + bytes > budget {
                return Err(DeviceError::OutOfMemory { requested: bytes });
            }
        }
        self.allocated_bytes += bytes;
        Ok(())
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_buffer(&mut self, info: &BufferInfo) -> DeviceResult<BufferHandle> {
        let len = usize::try_from(info.size)
            .map_err(|_| DeviceError::OutOfMemory { requested: info.size })?;
        self.reserve(info.size)?;

        Ok(self.buffers.insert(HeadlessBuffer {
            info: *info,
            contents: vec![0; len],
        }))
    }

    fn resize_buffer(&mut self, buffer: BufferHandle, size: u64) -> DeviceResult<()> {
        let len = usize::try_from(size).map_err(|_| DeviceError::OutOfMemory { requested: size })?;
        let current = self
            .buffers
            .get(buffer)
            .ok_or_else(|| DeviceError::InvalidHandle(format!("{buffer:?}")))?
            .contents
            .len() as u64;

        if size > current {
            self.reserve(size - current)?;
        } else {
            self.allocated_bytes -= current - size;
        }

        if let Some(entry) = self.buffers.get_mut(buffer) {
            entry.contents.resize(len, 0);
        }
        self.resize_count += 1;
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(entry) = self.buffers.remove(buffer) {
            self.allocated_bytes -= entry.contents.len() as u64;
        } else {
            log::warn!("Destroying unknown buffer {:?}", buffer);
        }
    }

    fn create_input_assembler(
        &mut self,
        info: &InputAssemblerInfo,
    ) -> DeviceResult<InputAssemblerHandle> {
        let referenced = info.vertex_buffers.iter().chain(info.index_buffer.iter());
        for buffer in referenced {
            if !self.buffers.contains_key(*buffer) {
                return Err(DeviceError::InvalidHandle(format!("{buffer:?}")));
            }
        }

        Ok(self.input_assemblers.insert(info.clone()))
    }

    fn destroy_input_assembler(&mut self, input_assembler: InputAssemblerHandle) {
        if self.input_assemblers.remove(input_assembler).is_none() {
            log::warn!("Destroying unknown input assembler {:?}", input_assembler);
        }
    }
}

/// One recorded buffer transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferUpdate {
    /// Destination buffer
    pub buffer: BufferHandle,
    /// Bytes written from offset 0
    pub data: Vec<u8>,
}

/// Command stream that records buffer updates for later submission
#[derive(Debug, Default)]
pub struct HeadlessRecorder {
    updates: Vec<BufferUpdate>,
}

impl HeadlessRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates recorded since the last submit
    pub fn updates(&self) -> &[BufferUpdate] {
        &self.updates
    }

    /// Number of recorded updates
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Drop every recorded update without applying it
    pub fn reset(&mut self) {
        self.updates.clear();
    }
}

impl CommandRecorder for HeadlessRecorder {
    fn update_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        self.updates.push(BufferUpdate {
            buffer,
            data: data.to_vec(),
        });
    }
}
