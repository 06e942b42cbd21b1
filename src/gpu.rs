//! Backend independent description of the GPU operations used by the canvas.
use std::{
    borrow::Cow,
    ops::{BitAnd, BitOr, BitOrAssign},
};

use crate::{
    error::{ResourceError, ShaderCompileError},
    wgsl::AttributeType,
};

/// Identifier of a buffer allocated by a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawBufferId(pub u64);

/// Identifier of a program compiled by a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawProgramId(pub u64);

/// Usage flags of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const NONE: Self = Self(0);
    pub const INDEX: Self = Self(0x0010);
    pub const VERTEX: Self = Self(0x0020);
    pub const UNIFORM: Self = Self(0x0040);
    pub const COPY_DST: Self = Self(0x0008);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        (self & other) == other
    }
}

impl BitAnd for BufferUsage {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferUsage {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    pub label: Cow<'a, str>,
    pub size: usize,
    pub usage: BufferUsage,
}

/// Possible primitive topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

impl PrimitiveTopology {
    pub fn is_strip(self) -> bool {
        matches!(
            self,
            PrimitiveTopology::LineStrip | PrimitiveTopology::TriangleStrip
        )
    }
}

/// Whether an attribute advances per vertex or per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VertexStepMode {
    Vertex,
    Instance,
}

/// Layout of a vertex buffer holding a single attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferLayout {
    pub location: u32,
    pub format: AttributeType,
    pub step_mode: VertexStepMode,
}

#[derive(Debug, Clone)]
pub struct ProgramDescriptor<'a> {
    pub label: Cow<'a, str>,
    pub source: &'a str,
    pub vertex_entry_point: &'a str,
    pub fragment_entry_point: &'a str,
    pub vertex_buffers: &'a [VertexBufferLayout],
    pub uniform_size: usize,
    pub topology: PrimitiveTopology,
}

/// Pixel rectangle a draw call is restricted to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub struct DrawCall<'a> {
    pub label: &'a str,
    pub program: RawProgramId,
    pub vertex_buffers: &'a [RawBufferId],
    pub index_buffer: Option<RawBufferId>,
    pub uniform_buffer: RawBufferId,
    /// Number of vertices, or indices if an index buffer is bound.
    pub count: u32,
    pub instance_count: u32,
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameDescriptor {
    pub clear_color: [f32; 4],
    pub width: u32,
    pub height: u32,
}

/// A GPU backend.
///
/// The device is owned by the canvas and lent to the buffer store and the
/// program registry for the duration of a call.
pub trait Device {
    /// Largest buffer the device can allocate, in bytes.
    fn max_buffer_size(&self) -> usize;

    fn create_buffer(&mut self, descriptor: &BufferDescriptor<'_>)
        -> Result<RawBufferId, ResourceError>;

    /// Writes `data` at `offset` bytes into the buffer.
    fn write_buffer(&mut self, buffer: RawBufferId, offset: usize, data: &[u8]);

    fn destroy_buffer(&mut self, buffer: RawBufferId);

    fn create_program(
        &mut self,
        descriptor: &ProgramDescriptor<'_>,
    ) -> Result<RawProgramId, ShaderCompileError>;

    /// Starts a frame, returning `false` if nothing can be drawn to.
    fn begin_frame(&mut self, frame: &FrameDescriptor) -> bool;

    fn draw(&mut self, call: &DrawCall<'_>);

    fn end_frame(&mut self);
}
