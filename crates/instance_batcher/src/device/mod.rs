//! Graphics device capability surface
//!
//! The batcher never talks to a concrete graphics API. It consumes the small
//! set of operations declared here: buffer creation and in-place resize,
//! input-assembler creation, and buffer updates recorded into a command
//! stream. Resources are referred to by opaque handles that compare by
//! identity only, so two byte-identical buffers are still different buffers.

pub mod headless;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub use headless::{BufferUpdate, HeadlessDevice, HeadlessRecorder};

slotmap::new_key_type! {
    /// Handle to a GPU buffer (vertex, index or instance data)
    pub struct BufferHandle;
    /// Handle to an input-assembler binding (vertex buffers + attributes + index buffer)
    pub struct InputAssemblerHandle;
    /// Handle to a bound texture
    pub struct TextureHandle;
    /// Handle to a compiled shader variant
    pub struct ShaderHandle;
    /// Handle to a descriptor set
    pub struct DescriptorSetHandle;
    /// Handle to a render pass / pipeline configuration
    pub struct PassHandle;
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors reported by a graphics device implementation
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device could not satisfy an allocation
    #[error("Out of device memory: requested {requested} bytes")]
    OutOfMemory {
        /// Requested allocation size in bytes
        requested: u64,
    },

    /// A handle did not refer to a live resource
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Backend-specific failure
    #[error("Backend error: {0}")]
    Backend(String),
}

bitflags! {
    /// How a buffer is going to be used by the pipeline
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Source of a transfer
        const TRANSFER_SRC = 1 << 0;
        /// Destination of a transfer (`update_buffer`)
        const TRANSFER_DST = 1 << 1;
        /// Index data
        const INDEX = 1 << 2;
        /// Vertex or per-instance data
        const VERTEX = 1 << 3;
        /// Uniform data
        const UNIFORM = 1 << 4;
    }
}

bitflags! {
    /// Where buffer memory lives and who can see it
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryFlags: u32 {
        /// Device-local memory
        const DEVICE = 1 << 0;
        /// Host-visible memory
        const HOST = 1 << 1;
    }
}

/// Vertex attribute element format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// One 8-bit unsigned component
    R8,
    /// Four 8-bit unsigned components
    Rgba8,
    /// One 16-bit float component
    R16F,
    /// Four 16-bit float components
    Rgba16F,
    /// One 32-bit unsigned integer component
    R32UI,
    /// Four 32-bit unsigned integer components
    Rgba32UI,
    /// One 32-bit float component
    R32F,
    /// Two 32-bit float components
    Rg32F,
    /// Three 32-bit float components
    Rgb32F,
    /// Four 32-bit float components
    Rgba32F,
}

impl Format {
    /// Size of one element of this format in bytes
    pub const fn size_bytes(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::Rgba8 | Self::R32UI | Self::R32F => 4,
            Self::R16F => 2,
            Self::Rgba16F | Self::Rg32F => 8,
            Self::Rgb32F => 12,
            Self::Rgba32UI | Self::Rgba32F => 16,
        }
    }
}

/// A vertex attribute descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    /// Shader-visible attribute name
    pub name: String,
    /// Element format
    pub format: Format,
    /// Whether integer data is normalized when read as float
    pub normalized: bool,
    /// Index of the vertex buffer this attribute reads from
    pub stream: u32,
    /// Whether the attribute advances per instance instead of per vertex
    pub instanced: bool,
}

impl Attribute {
    /// Per-vertex attribute on stream 0
    pub fn new(name: impl Into<String>, format: Format) -> Self {
        Self {
            name: name.into(),
            format,
            normalized: false,
            stream: 0,
            instanced: false,
        }
    }

    /// Set the normalization flag
    #[must_use]
    pub const fn normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    /// Bind the attribute to a vertex buffer slot
    #[must_use]
    pub const fn with_stream(mut self, stream: u32) -> Self {
        self.stream = stream;
        self
    }

    /// Mark the attribute as per-instance
    #[must_use]
    pub const fn per_instance(mut self) -> Self {
        self.instanced = true;
        self
    }
}

/// Buffer creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Usage flags
    pub usage: BufferUsage,
    /// Memory placement
    pub memory: MemoryFlags,
    /// Size in bytes
    pub size: u64,
    /// Element stride in bytes
    pub stride: u32,
}

/// Input-assembler creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputAssemblerInfo {
    /// Attribute layout across all vertex buffers
    pub attributes: Vec<Attribute>,
    /// Vertex buffers, indexed by attribute stream
    pub vertex_buffers: Vec<BufferHandle>,
    /// Optional index buffer
    pub index_buffer: Option<BufferHandle>,
}

/// Resource creation side of a graphics device
pub trait GraphicsDevice {
    /// Create a buffer
    fn create_buffer(&mut self, info: &BufferInfo) -> DeviceResult<BufferHandle>;

    /// Resize a buffer in place; the handle stays valid
    fn resize_buffer(&mut self, buffer: BufferHandle, size: u64) -> DeviceResult<()>;

    /// Release a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Create an input-assembler binding
    fn create_input_assembler(
        &mut self,
        info: &InputAssemblerInfo,
    ) -> DeviceResult<InputAssemblerHandle>;

    /// Release an input-assembler binding
    fn destroy_input_assembler(&mut self, input_assembler: InputAssemblerHandle);
}

/// Command recording side of a graphics device
pub trait CommandRecorder {
    /// Record a transfer of `data` into `buffer`, starting at offset 0
    fn update_buffer(&mut self, buffer: BufferHandle, data: &[u8]);
}
