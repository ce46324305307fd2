//! Render submissions and per-instance attribute blocks
//!
//! A submission is one object asking to be drawn through a pass. The batcher
//! only reads from it: the geometry it draws, the shader for the active pass,
//! its descriptor set and whatever texture sits in the lightmap slot.

use std::collections::HashMap;

use bytemuck::Pod;

use crate::device::{Attribute, BufferHandle, DescriptorSetHandle, ShaderHandle, TextureHandle};

/// Geometry a submission draws from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeometrySource {
    /// Per-vertex buffers, indexed by attribute stream
    pub vertex_buffers: Vec<BufferHandle>,
    /// Per-vertex attribute layout
    pub attributes: Vec<Attribute>,
    /// Shared index buffer, if the geometry is indexed
    pub index_buffer: Option<BufferHandle>,
}

/// Read-only view of a render submission
pub trait RenderSubmission {
    /// Geometry to draw
    fn geometry(&self) -> &GeometrySource;

    /// Shader variant for the given pass index
    fn shader(&self, pass_index: usize) -> Option<ShaderHandle>;

    /// Descriptor set bound when drawing this submission
    fn descriptor_set(&self) -> DescriptorSetHandle;

    /// Texture bound at `binding`, if any
    fn texture(&self, binding: u32) -> Option<TextureHandle>;
}

/// Plain-data submission
#[derive(Debug, Clone)]
pub struct SubmissionDesc {
    geometry: GeometrySource,
    shaders: Vec<ShaderHandle>,
    descriptor_set: DescriptorSetHandle,
    textures: HashMap<u32, TextureHandle>,
}

impl SubmissionDesc {
    /// Submission with no shaders and no textures bound
    pub fn new(geometry: GeometrySource, descriptor_set: DescriptorSetHandle) -> Self {
        Self {
            geometry,
            shaders: Vec::new(),
            descriptor_set,
            textures: HashMap::new(),
        }
    }

    /// Append the shader used by the next pass index
    #[must_use]
    pub fn with_shader(mut self, shader: ShaderHandle) -> Self {
        self.shaders.push(shader);
        self
    }

    /// Bind a texture at `binding`
    #[must_use]
    pub fn with_texture(mut self, binding: u32, texture: TextureHandle) -> Self {
        self.textures.insert(binding, texture);
        self
    }

    /// Replace the descriptor set
    pub fn set_descriptor_set(&mut self, descriptor_set: DescriptorSetHandle) {
        self.descriptor_set = descriptor_set;
    }
}

impl RenderSubmission for SubmissionDesc {
    fn geometry(&self) -> &GeometrySource {
        &self.geometry
    }

    fn shader(&self, pass_index: usize) -> Option<ShaderHandle> {
        self.shaders.get(pass_index).copied()
    }

    fn descriptor_set(&self) -> DescriptorSetHandle {
        self.descriptor_set
    }

    fn texture(&self, binding: u32) -> Option<TextureHandle> {
        self.textures.get(&binding).copied()
    }
}

/// Per-instance payload and the layout describing it
///
/// The byte length of the buffer is the instance stride.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributeBlock {
    buffer: Vec<u8>,
    attributes: Vec<Attribute>,
}

impl AttributeBlock {
    /// Zeroed block sized from the attribute formats
    pub fn new(attributes: Vec<Attribute>) -> Self {
        let size: usize = attributes
            .iter()
            .map(|attr| attr.format.size_bytes() as usize)
            .sum();

        Self {
            buffer: vec![0; size],
            attributes,
        }
    }

    /// Block over existing bytes
    pub fn from_bytes(attributes: Vec<Attribute>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            buffer: bytes.into(),
            attributes,
        }
    }

    /// Block holding the bytes of a `Pod` value
    pub fn from_pod<T: Pod>(attributes: Vec<Attribute>, value: &T) -> Self {
        Self::from_bytes(attributes, bytemuck::bytes_of(value))
    }

    /// Overwrite the payload with the bytes of a `Pod` value
    pub fn write_pod<T: Pod>(&mut self, value: &T) {
        self.buffer.clear();
        self.buffer.extend_from_slice(bytemuck::bytes_of(value));
    }

    /// Payload bytes
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Mutable payload bytes
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Layout of the payload
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Size of one instance in bytes
    pub fn stride(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
