//! Device backends.
//!
//! [`Device`] is the seam between the command executor and an actual GPU.
//! The executor owns every handle; a device only ever sees object references
//! the executor has already resolved and validated.
//!
//! Two backends ship with the crate:
//! - [`SoftDevice`]: a deterministic CPU rasterizer. Used by tests and by
//!   replay verification on machines without a GPU.
//! - [`GpuDevice`]: a headless wgpu device with an offscreen default
//!   framebuffer.

mod gpu;
mod limits;
mod soft;
mod texel;
pub mod types;

pub use gpu::{GpuDevice, GpuInit};
pub use limits::{Extensions, Limits};
pub use soft::{SoftDevice, SoftDeviceOptions};

use thiserror::Error;

use crate::error::StatusError;
use crate::state::StateChange;

use types::{
    BlitMask, BufferUsage, ClearValue, Filter, IndexType, PixelFormat, PixelType, Rect,
    RenderTargetDesc, SamplerDesc, TextureFormat, Topology, UniformDecl, UniformValue,
};

/// Failures reported by a backend.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("out of device memory")]
    OutOfMemory,
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Rejected(String),
    #[error("device lost")]
    Lost,
}

// ── descriptors ──────────────────────────────────────────────────────────

pub struct ProgramDesc<'a> {
    pub vertex: &'a str,
    pub fragment: &'a str,
    pub flags: &'a [String],
    pub uniforms: &'a [UniformDecl],
    /// Sampler names, in texture-unit order.
    pub textures: &'a [String],
    /// Uniform block names, in binding order.
    pub uniform_blocks: &'a [String],
}

pub struct BufferDesc<'a> {
    pub size: u64,
    pub contents: Option<&'a [u8]>,
    pub usage: BufferUsage,
}

/// One enabled vertex attribute.
///
/// `slot` indexes the per-draw vertex buffer list, not a handle.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexAttributeDesc {
    pub location: u32,
    pub slot: usize,
    pub components: u8,
    pub ty: types::AttributeType,
    pub normalized: bool,
    /// Effective stride in bytes (never 0).
    pub stride: u32,
    pub offset: u64,
    pub divisor: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VertexArrayDesc {
    pub attributes: Vec<VertexAttributeDesc>,
    pub slots: usize,
    pub indexed: bool,
}

pub struct TextureDesc<'a> {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Option<&'a [u8]>,
}

/// Sub-image region, bottom-left origin.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

pub enum AttachmentRef<'a, D: Device + ?Sized> {
    Texture(&'a D::Texture),
    RenderTarget(&'a D::RenderTarget),
}

pub struct FrameTargetDesc<'a, D: Device + ?Sized> {
    pub color: Vec<AttachmentRef<'a, D>>,
    pub depth_stencil: Option<AttachmentRef<'a, D>>,
}

// ── commands ─────────────────────────────────────────────────────────────

/// Clear request after the executor has filled defaults.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ClearOp {
    /// `index: None` clears every active draw buffer.
    Color { index: Option<u32>, value: ClearValue },
    Depth(f32),
    Stencil(i32),
    DepthStencil(f32, i32),
}

pub struct BufferRange<'a, D: Device + ?Sized> {
    pub buffer: &'a D::Buffer,
    pub offset: u64,
    pub size: Option<u64>,
}

pub struct TextureUnit<'a, D: Device + ?Sized> {
    pub texture: &'a D::Texture,
    pub sampler: Option<&'a D::Sampler>,
}

/// Vertex count and range form of a draw.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawRange {
    Arrays { first: u32, count: u32, instances: u32 },
    Elements { index_type: IndexType, offset: u64, count: u32, instances: u32 },
    /// Already checked against the multi-draw extension.
    MultiArrays { firsts: Vec<u32>, counts: Vec<u32> },
}

pub struct DrawCall<'a, D: Device + ?Sized> {
    pub program: &'a D::Program,
    pub uniforms: &'a std::collections::BTreeMap<String, UniformValue>,
    pub vertex_array: Option<&'a D::VertexArray>,
    /// Indexed by [`VertexAttributeDesc::slot`].
    pub vertex_buffers: Vec<&'a D::Buffer>,
    pub index_buffer: Option<&'a D::Buffer>,
    /// Indexed by texture unit.
    pub textures: Vec<Option<TextureUnit<'a, D>>>,
    /// Indexed by uniform block binding.
    pub uniform_buffers: Vec<Option<BufferRange<'a, D>>>,
    pub target: Option<&'a D::FrameTarget>,
    pub topology: Topology,
    pub range: DrawRange,
}

pub struct BlitOp<'a, D: Device + ?Sized> {
    pub src: Option<&'a D::FrameTarget>,
    pub dst: Option<&'a D::FrameTarget>,
    pub src_rect: Rect,
    pub dst_rect: Rect,
    pub mask: BlitMask,
    pub filter: Filter,
}

pub struct ReadOp<'a, D: Device + ?Sized> {
    pub source: Option<&'a D::FrameTarget>,
    pub attachment: u32,
    pub rect: Rect,
    pub format: PixelFormat,
    pub ty: PixelType,
}

// ── fences ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum FenceStatus {
    Pending,
    Ready(Vec<u8>),
    Failed(String),
}

/// A device-side marker plus the staging storage a readback lands in.
pub trait Fence {
    /// Checks completion once. Never blocks.
    fn poll(&mut self) -> FenceStatus;

    /// Releases staging resources. Further polls report `Failed`.
    fn cancel(&mut self);
}

// ── the backend seam ─────────────────────────────────────────────────────

/// A GPU backend.
///
/// Object types are owned by the caller; `destroy_*` consumes them. The
/// default framebuffer is whatever `target: None` names.
pub trait Device {
    type Program;
    type Buffer;
    type VertexArray;
    type Sampler;
    type Texture;
    type RenderTarget;
    type FrameTarget;

    /// Short human-readable backend description for logs.
    fn describe(&self) -> String;

    fn limits(&self) -> Limits;

    /// Size of the default framebuffer.
    fn default_size(&self) -> (u32, u32);

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<Self::Program, DeviceError>;
    fn destroy_program(&mut self, program: Self::Program);

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<Self::Buffer, DeviceError>;
    fn write_buffer(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDesc,
    ) -> Result<Self::VertexArray, DeviceError>;
    fn destroy_vertex_array(&mut self, vertex_array: Self::VertexArray);

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<Self::Sampler, DeviceError>;
    fn destroy_sampler(&mut self, sampler: Self::Sampler);

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<Self::Texture, DeviceError>;
    fn write_texture(
        &mut self,
        texture: &Self::Texture,
        region: TextureRegion,
        data: &[u8],
    ) -> Result<(), DeviceError>;
    fn destroy_texture(&mut self, texture: Self::Texture);

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDesc,
    ) -> Result<Self::RenderTarget, DeviceError>;
    fn destroy_render_target(&mut self, target: Self::RenderTarget);

    fn create_frame_target(
        &mut self,
        desc: &FrameTargetDesc<'_, Self>,
    ) -> Result<Self::FrameTarget, DeviceError>;
    fn destroy_frame_target(&mut self, target: Self::FrameTarget);

    fn set_state(&mut self, change: &StateChange);

    fn clear(&mut self, target: Option<&Self::FrameTarget>, op: ClearOp)
    -> Result<(), DeviceError>;
    fn draw(&mut self, call: &DrawCall<'_, Self>) -> Result<(), DeviceError>;
    fn blit(&mut self, op: &BlitOp<'_, Self>) -> Result<(), DeviceError>;
    fn copy_buffer(
        &mut self,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), DeviceError>;

    /// Starts an asynchronous readback. Must not stall.
    fn read_pixels(&mut self, op: &ReadOp<'_, Self>) -> Result<Box<dyn Fence>, DeviceError>;

    /// Marks the start of a timed span.
    fn begin_timer(&mut self) -> Result<(), DeviceError>;

    /// Closes the span opened by `begin_timer`. The fence yields the
    /// elapsed nanoseconds as a little-endian `u64`.
    fn end_timer(&mut self) -> Result<Box<dyn Fence>, DeviceError>;

    fn flush(&mut self) -> Result<(), DeviceError>;

    /// Pops the oldest pending advisory status, if any.
    fn check_status(&mut self) -> Option<StatusError>;
}
