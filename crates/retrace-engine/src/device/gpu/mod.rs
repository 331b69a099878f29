//! Headless wgpu backend.
//!
//! Window-space rectangles arrive with a bottom-left origin and are flipped
//! to wgpu's top-left origin at this boundary. Texture uploads and readbacks
//! flip rows the same way, so everything observable through the command
//! interface matches the GL convention. Inside shaders the texture `v`
//! coordinate is wgpu-native and grows downward.
//!
//! Every device call runs inside a validation + out-of-memory error scope.
//! Errors from create calls fail the call; errors from commands become
//! advisory status.

mod clear;
mod convert;
mod pipeline;
mod program;
mod readback;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU64;
use std::ops::Range;
use std::rc::Rc;
use std::sync::mpsc;

use anyhow::{Context, Result};
use wgpu::util::DeviceExt;

use crate::error::StatusError;
use crate::state::{RasterState, StateChange};

use super::types::{
    ClearValue, DrawBuffer, FormatClass, IndexType, Rect, RenderTargetDesc, SamplerDesc,
    TextureFormat, Topology,
};
use super::{
    AttachmentRef, BlitOp, BufferDesc, ClearOp, Device, DeviceError, DrawCall, DrawRange,
    Extensions, Fence, FrameTargetDesc, Limits, ProgramDesc, ReadOp, TextureDesc, TextureRegion,
    VertexArrayDesc,
};
use clear::{ClearQuad, QuadClear};
use pipeline::{PipelineKey, VertexSlot};
use readback::{Decode, GpuFence, ReadLayout};

pub use program::GpuProgram;

/// Initialization parameters for the headless device.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Default framebuffer size.
    pub width: u32,
    pub height: u32,

    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,

    /// Use a software adapter (e.g. llvmpipe, WARP) when one is available.
    pub force_fallback_adapter: bool,

    /// Required wgpu features.
    ///
    /// Favor an empty set for portability unless a feature is strictly necessary.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,

    /// Also request the timestamp features when the adapter has them.
    pub timer_query: bool,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            timer_query: false,
        }
    }
}

/// A texture or render target.
pub struct GpuImage {
    texture: wgpu::Texture,
    format: TextureFormat,
}

pub struct GpuBuffer {
    buffer: wgpu::Buffer,
    /// CPU copy of the contents. Index conversion and unaligned writes go
    /// through it; the GPU never writes buffers.
    shadow: RefCell<Vec<u8>>,
}

struct GpuAttribute {
    slot: usize,
    offset: u64,
    key: VertexSlot,
}

pub struct GpuVertexArray {
    attributes: Vec<GpuAttribute>,
}

pub struct GpuSampler {
    sampler: wgpu::Sampler,
}

#[derive(Clone)]
struct Attachment {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: TextureFormat,
}

impl Attachment {
    fn new(image: &GpuImage) -> Self {
        Self {
            texture: image.texture.clone(),
            view: image
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
            format: image.format,
        }
    }

    fn size(&self) -> (u32, u32) {
        (self.texture.width(), self.texture.height())
    }
}

pub struct GpuFrameTarget {
    colors: Vec<Attachment>,
    depth_stencil: Option<Attachment>,
    width: u32,
    height: u32,
}

impl GpuFrameTarget {
    /// Bottom-left rect to wgpu's top-left origin.
    fn flip(&self, r: Rect) -> Rect {
        let top = r.y.saturating_add(r.height);
        Rect::new(r.x, (self.height as i32).saturating_sub(top), r.width, r.height)
    }

    fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }
}

/// What one draw inside the pass covers. The last field is the instance
/// count.
enum Piece {
    Vertices(Range<u32>, u32),
    BoundIndices(wgpu::IndexFormat, Range<u32>, u32),
    /// CPU-built `u32` index list.
    Expanded(Vec<u32>, u32),
}

/// Rewrites fans and loops as lists the native topologies can draw.
fn expand(topology: Topology, ids: &[u32]) -> Vec<u32> {
    match topology {
        Topology::TriangleFan if ids.len() >= 3 => ids[1..]
            .windows(2)
            .flat_map(|w| [ids[0], w[0], w[1]])
            .collect(),
        Topology::TriangleFan => Vec::new(),
        Topology::LineLoop if ids.len() >= 2 => {
            let mut out = ids.to_vec();
            out.push(ids[0]);
            out
        }
        _ => ids.to_vec(),
    }
}

/// Load-and-store operations for a plane the pass keeps, `None` otherwise.
fn keep<V>(on: bool) -> Option<wgpu::Operations<V>> {
    on.then_some(wgpu::Operations {
        load: wgpu::LoadOp::Load,
        store: wgpu::StoreOp::Store,
    })
}

/// Clips an equal-size copy to both images. Returns the surviving source and
/// destination rects.
fn clip_copy(src: Rect, src_bounds: Rect, dst: Rect, dst_bounds: Rect) -> Option<(Rect, Rect)> {
    let shift =
        |v: i32, by: i64| (i64::from(v) + by).clamp(i32::MIN.into(), i32::MAX.into()) as i32;
    let dx = i64::from(dst.x) - i64::from(src.x);
    let dy = i64::from(dst.y) - i64::from(src.y);
    let s = src.intersect(src_bounds);
    let d = Rect::new(shift(s.x, dx), shift(s.y, dy), s.width, s.height).intersect(dst_bounds);
    (!d.is_empty()).then(|| {
        let back = Rect::new(shift(d.x, -dx), shift(d.y, -dy), d.width, d.height);
        (back, d)
    })
}

/// Both are needed to write timestamps between passes.
const TIMER_FEATURES: wgpu::Features =
    wgpu::Features::TIMESTAMP_QUERY.union(wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS);

fn limits_from(l: &wgpu::Limits, features: wgpu::Features) -> Limits {
    Limits {
        max_texture_size: l.max_texture_dimension_2d,
        max_renderbuffer_size: l.max_texture_dimension_2d,
        max_draw_buffers: l.max_color_attachments,
        max_color_attachments: l.max_color_attachments,
        // Binding 0 of the uniform group holds the loose uniforms.
        max_uniform_buffer_bindings: l.max_uniform_buffers_per_shader_stage.saturating_sub(1),
        max_texture_units: l
            .max_sampled_textures_per_shader_stage
            .min(l.max_samplers_per_shader_stage),
        // One vertex buffer binding per attribute.
        max_vertex_attributes: l.max_vertex_attributes.min(l.max_vertex_buffers),
        max_samples: 1,
        max_viewport_dims: [l.max_texture_dimension_2d; 2],
        max_buffer_size: l.max_buffer_size,
        line_width_range: [1.0, 1.0],
        extensions: Extensions {
            // Emulated by looping inside one pass.
            multi_draw: true,
            timer_query: features.contains(TIMER_FEATURES),
        },
    }
}

/// Owns the wgpu device, the offscreen default framebuffer and the
/// pipeline caches.
pub struct GpuDevice {
    info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: Limits,
    framebuffer: Rc<GpuFrameTarget>,
    raster: RasterState,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    clear_quad: ClearQuad,
    /// Bound to texture units the draw leaves empty.
    blank: GpuImage,
    default_sampler: wgpu::Sampler,
    next_program: u64,
    status: VecDeque<StatusError>,
    /// Query set of the running timer; slot 0 holds its start.
    timer: Option<wgpu::QuerySet>,
}

impl GpuDevice {
    /// Creates a headless device.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(init: GpuInit) -> Result<Self> {
        anyhow::ensure!(init.width > 0 && init.height > 0, "framebuffer has zero size");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: init.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: init.force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let mut required_features = init.required_features;
        if init.timer_query {
            let available = adapter.features() & TIMER_FEATURES;
            if available != TIMER_FEATURES {
                log::warn!("adapter lacks timestamp queries; timers are unsupported");
            }
            required_features |= available;
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("retrace device"),
                required_features,
                required_limits: init.required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let info = adapter.get_info();
        log::info!("wgpu adapter: {} ({:?})", info.name, info.backend);
        let limits = limits_from(&device.limits(), device.features());

        let color = image(
            &device,
            init.width,
            init.height,
            TextureFormat::Rgba8,
            "retrace framebuffer colour",
        );
        let depth = image(
            &device,
            init.width,
            init.height,
            TextureFormat::Depth24Stencil8,
            "retrace framebuffer depth",
        );
        let framebuffer = Rc::new(GpuFrameTarget {
            colors: vec![Attachment::new(&color)],
            depth_stencil: Some(Attachment::new(&depth)),
            width: init.width,
            height: init.height,
        });

        let blank = image(&device, 1, 1, TextureFormat::Rgba8, "retrace blank texture");
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &blank.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255; 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let default_sampler = sampler(&device, &SamplerDesc::default());
        let clear_quad = ClearQuad::new(&device);

        let mut dev = Self {
            info,
            raster: RasterState::new(&limits, init.width, init.height),
            limits,
            framebuffer,
            pipelines: HashMap::new(),
            clear_quad,
            blank,
            default_sampler,
            next_program: 0,
            status: VecDeque::new(),
            timer: None,
            device,
            queue,
        };
        // Same starting contents as the soft device: zero colour, far depth.
        dev.clear(None, ClearOp::Color {
            index: None,
            value: ClearValue::Float([0.0, 0.0, 0.0, 0.0]),
        })?;
        dev.clear(None, ClearOp::DepthStencil(1.0, 0))?;
        Ok(dev)
    }

    /// Blocking wrapper around [`GpuDevice::new`].
    pub fn new_blocking(init: GpuInit) -> Result<Self> {
        pollster::block_on(Self::new(init))
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    fn flag(&mut self, status: StatusError) {
        log::debug!("gpu device status: {status}");
        self.status.push_back(status);
    }

    /// Runs `f` inside validation and out-of-memory error scopes.
    fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> (R, Option<(StatusError, String)>) {
        let oom = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let validation = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f(self);
        let validation = pollster::block_on(validation.pop());
        let oom = pollster::block_on(oom.pop());
        let status = match (oom, validation) {
            (Some(e), _) => Some((StatusError::OutOfMemory, e.to_string())),
            (None, Some(e)) => Some((StatusError::InvalidOperation, e.to_string())),
            (None, None) => None,
        };
        if let Some((_, message)) = &status {
            log::warn!("wgpu: {message}");
        }
        (out, status)
    }

    /// A create call: scoped errors fail it.
    fn create<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        match self.scoped(f) {
            (_, Some((StatusError::OutOfMemory, _))) => Err(DeviceError::OutOfMemory),
            (_, Some((_, message))) => Err(DeviceError::Rejected(message)),
            (out, None) => out,
        }
    }

    /// A command: scoped errors become status.
    fn command(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), DeviceError>,
    ) -> Result<(), DeviceError> {
        let (out, status) = self.scoped(f);
        if let Some((status, _)) = status {
            self.flag(status);
        }
        out
    }

    /// Attachments named by the draw buffers, in fragment output order.
    fn draw_attachments(&self, target: &GpuFrameTarget) -> Vec<Option<Attachment>> {
        self.raster
            .draw_buffers
            .iter()
            .map(|db| match db {
                DrawBuffer::None => None,
                DrawBuffer::Back => target.colors.first().cloned(),
                DrawBuffer::Color(n) => target.colors.get(*n as usize).cloned(),
            })
            .collect()
    }

    /// Scissor box in wgpu coordinates, or `None` when nothing survives.
    fn scissor(&self, target: &GpuFrameTarget) -> Option<[u32; 4]> {
        let r = if self.raster.scissor_test {
            self.raster.scissor.intersect(target.bounds())
        } else {
            target.bounds()
        };
        if r.is_empty() {
            return None;
        }
        let r = target.flip(r);
        Some([r.x as u32, r.y as u32, r.width as u32, r.height as u32])
    }

    fn full_scissor(&self, target: &GpuFrameTarget) -> bool {
        let bounds = target.bounds();
        !self.raster.scissor_test || self.raster.scissor.intersect(bounds) == bounds
    }

    fn write_shadow(&self, buffer: &GpuBuffer, start: u64, end: u64) {
        let shadow = buffer.shadow.borrow();
        let start = start & !(wgpu::COPY_BUFFER_ALIGNMENT - 1);
        let end = end.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let mut chunk = shadow
            .get(start as usize..(end as usize).min(shadow.len()))
            .unwrap_or_default()
            .to_vec();
        chunk.resize((end - start) as usize, 0);
        if !chunk.is_empty() {
            self.queue.write_buffer(&buffer.buffer, start, &chunk);
        }
    }

    fn clear_color(
        &mut self,
        target: &GpuFrameTarget,
        attachment: &Attachment,
        value: ClearValue,
    ) -> Result<(), DeviceError> {
        let integer = matches!(attachment.format.class(), FormatClass::Uint | FormatClass::Sint);
        let (color, matches) = match value {
            ClearValue::Float(v) => (v.map(f64::from), !integer),
            ClearValue::Int(v) => (
                v.map(f64::from),
                attachment.format.class() == FormatClass::Sint,
            ),
            ClearValue::Uint(v) => (
                v.map(f64::from),
                attachment.format.class() == FormatClass::Uint,
            ),
        };
        if !matches {
            self.flag(StatusError::InvalidOperation);
            return Ok(());
        }
        let Some(scissor) = self.scissor(target) else {
            return Ok(());
        };

        if self.full_scissor(target) && self.raster.color_mask == [true; 4] {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("retrace clear encoder"),
                });
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("retrace clear pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &attachment.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color[0],
                            g: color[1],
                            b: color[2],
                            a: color[3],
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            self.queue.submit(std::iter::once(encoder.finish()));
            return Ok(());
        }

        if integer {
            return Err(DeviceError::Unsupported(
                "scissored or masked clears of integer attachments".into(),
            ));
        }
        let mut write_mask = wgpu::ColorWrites::empty();
        for (on, bit) in self.raster.color_mask.iter().zip([
            wgpu::ColorWrites::RED,
            wgpu::ColorWrites::GREEN,
            wgpu::ColorWrites::BLUE,
            wgpu::ColorWrites::ALPHA,
        ]) {
            if *on {
                write_mask |= bit;
            }
        }
        self.clear_quad.run(
            &self.device,
            &self.queue,
            &QuadClear {
                color: Some((
                    &attachment.view,
                    convert::texture_format(attachment.format),
                    write_mask,
                    color.map(|c| c as f32),
                )),
                depth_stencil: None,
                depth: None,
                stencil: None,
                scissor,
            },
        );
        Ok(())
    }

    fn clear_depth_stencil(
        &mut self,
        target: &GpuFrameTarget,
        depth: Option<f32>,
        stencil: Option<i32>,
    ) -> Result<(), DeviceError> {
        let Some(attachment) = &target.depth_stencil else {
            return Ok(());
        };
        // The depth mask gates depth clears as it gates depth writes.
        let depth = depth
            .filter(|_| self.raster.depth_mask && attachment.format.has_depth())
            .map(|z| z.clamp(0.0, 1.0));
        let stencil = stencil.filter(|_| attachment.format.has_stencil());
        let stencil_mask = self.raster.stencil_mask & 0xff;
        if depth.is_none() && stencil.is_none() {
            return Ok(());
        }
        let Some(scissor) = self.scissor(target) else {
            return Ok(());
        };

        let whole_stencil = stencil.is_none() || stencil_mask == 0xff;
        if self.full_scissor(target) && whole_stencil {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("retrace clear encoder"),
                });
            let depth_ops = attachment.format.has_depth().then(|| wgpu::Operations {
                load: depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                store: wgpu::StoreOp::Store,
            });
            let stencil_ops = attachment.format.has_stencil().then(|| wgpu::Operations {
                load: stencil.map_or(wgpu::LoadOp::Load, |s| wgpu::LoadOp::Clear(s as u32 & 0xff)),
                store: wgpu::StoreOp::Store,
            });
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("retrace clear pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &attachment.view,
                    depth_ops,
                    stencil_ops,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            self.queue.submit(std::iter::once(encoder.finish()));
            return Ok(());
        }

        self.clear_quad.run(
            &self.device,
            &self.queue,
            &QuadClear {
                color: None,
                depth_stencil: Some((&attachment.view, convert::texture_format(attachment.format))),
                depth,
                stencil: stencil.map(|s| (s as u32 & 0xff, stencil_mask)),
                scissor,
            },
        );
        Ok(())
    }

    fn encode_draw(&mut self, call: &DrawCall<'_, Self>) -> Result<(), DeviceError> {
        if self.raster.rasterizer_discard {
            return Ok(());
        }
        let fb = Rc::clone(&self.framebuffer);
        let target = call.target.unwrap_or(&*fb);
        let program = call.program;

        let native = convert::topology(call.topology);
        let topology = native.unwrap_or(match call.topology {
            Topology::TriangleFan => wgpu::PrimitiveTopology::TriangleList,
            _ => wgpu::PrimitiveTopology::LineStrip,
        });
        let triangles = matches!(
            topology,
            wgpu::PrimitiveTopology::TriangleList | wgpu::PrimitiveTopology::TriangleStrip
        );
        let cull = match convert::cull_mode(self.raster.cull, self.raster.cull_face) {
            Some(cull) if triangles => cull,
            Some(_) => None,
            None if triangles => return Ok(()),
            None => None,
        };

        // Vertex inputs, one binding per attribute.
        let mut slots = Vec::new();
        let mut bindings = Vec::new();
        if let Some(va) = call.vertex_array {
            for attr in &va.attributes {
                let buffer = call
                    .vertex_buffers
                    .get(attr.slot)
                    .ok_or_else(|| {
                        DeviceError::Rejected(format!("no buffer for slot {}", attr.slot))
                    })?;
                if attr.offset >= buffer.buffer.size() {
                    self.flag(StatusError::InvalidOperation);
                    return Ok(());
                }
                slots.push(attr.key.clone());
                bindings.push((*buffer, attr.offset));
            }
        }

        // Draw pieces; fans, loops and byte indices go through expanded
        // index lists.
        let mut pieces = Vec::new();
        let listed = |first: u32, count: u32, instances: u32| {
            if native.is_some() {
                Piece::Vertices(first..first + count, instances)
            } else {
                let indices: Vec<u32> = (first..first + count).collect();
                Piece::Expanded(expand(call.topology, &indices), instances)
            }
        };
        match &call.range {
            DrawRange::Arrays {
                first,
                count,
                instances,
            } => pieces.push(listed(*first, *count, *instances)),
            DrawRange::MultiArrays { firsts, counts } => {
                for (first, count) in firsts.iter().zip(counts) {
                    pieces.push(listed(*first, *count, 1));
                }
            }
            DrawRange::Elements {
                index_type,
                offset,
                count,
                instances,
            } => {
                let ib = call
                    .index_buffer
                    .ok_or_else(|| {
                        DeviceError::Rejected("indexed draw without an index buffer".into())
                    })?;
                let size = index_type.size() as u64;
                let format = match index_type {
                    IndexType::Uint16 => Some(wgpu::IndexFormat::Uint16),
                    IndexType::Uint32 => Some(wgpu::IndexFormat::Uint32),
                    IndexType::Uint8 => None,
                };
                match format {
                    Some(format) if native.is_some() && offset % size == 0 => {
                        let first = (offset / size) as u32;
                        pieces.push(Piece::BoundIndices(format, first..first + count, *instances));
                    }
                    _ => {
                        let ids = {
                            let shadow = ib.shadow.borrow();
                            let start = (offset / size) as usize;
                            (0..*count as usize)
                                .map(|i| index_type.read(&shadow, start + i))
                                .collect::<Option<Vec<u32>>>()
                        };
                        let Some(ids) = ids else {
                            self.flag(StatusError::InvalidOperation);
                            return Ok(());
                        };
                        pieces.push(Piece::Expanded(expand(call.topology, &ids), *instances));
                    }
                }
            }
        }
        pieces.retain(|p| match p {
            Piece::Vertices(range, _) | Piece::BoundIndices(_, range, _) => !range.is_empty(),
            Piece::Expanded(ids, _) => !ids.is_empty(),
        });
        if pieces.is_empty() {
            return Ok(());
        }
        let strips = matches!(
            topology,
            wgpu::PrimitiveTopology::LineStrip | wgpu::PrimitiveTopology::TriangleStrip
        );
        let strip_index = pieces
            .iter()
            .find_map(|p| match p {
                Piece::BoundIndices(format, ..) => Some(*format),
                Piece::Expanded(..) => Some(wgpu::IndexFormat::Uint32),
                Piece::Vertices(..) => None,
            })
            .filter(|_| strips);

        let colors = self.draw_attachments(target);
        let formats: Vec<Option<TextureFormat>> = colors
            .iter()
            .map(|a| a.as_ref().map(|a| a.format))
            .collect();
        let mut targets = Vec::with_capacity(formats.len());
        for format in &formats {
            targets.push(match format {
                Some(f) => pipeline::color_targets(&self.raster, &[*f])?.pop().flatten(),
                None => None,
            });
        }
        if colors.iter().all(Option::is_none) && target.depth_stencil.is_none() {
            return Ok(());
        }

        let key = PipelineKey {
            program: program.id,
            vertex: slots,
            topology,
            strip_index,
            cull,
            front_face: convert::front_face(self.raster.front_face),
            targets,
            depth_stencil: pipeline::depth_stencil(
                &self.raster,
                target.depth_stencil.as_ref().map(|a| a.format),
                triangles,
            ),
        };
        if !self.pipelines.contains_key(&key) {
            log::debug!("building pipeline for program {}", program.id);
            let built = pipeline::build(&self.device, program, &key);
            self.pipelines.insert(key.clone(), built);
        }

        // Group 0: loose uniforms then uniform blocks.
        let uniform_data = program.uniforms.pack(call.uniforms);
        let uniform_buffer = (!uniform_data.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("retrace uniforms"),
                contents: &uniform_data,
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });
        let mut entries = Vec::new();
        if let Some(b) = &uniform_buffer {
            entries.push(wgpu::BindGroupEntry {
                binding: 0,
                resource: b.as_entire_binding(),
            });
        }
        for i in 0..program.blocks {
            let Some(range) = call.uniform_buffers.get(i).and_then(Option::as_ref) else {
                self.flag(StatusError::InvalidOperation);
                return Ok(());
            };
            entries.push(wgpu::BindGroupEntry {
                binding: 1 + i as u32,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &range.buffer.buffer,
                    offset: range.offset,
                    size: range.size.and_then(NonZeroU64::new),
                }),
            });
        }
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("retrace uniform bind group"),
            layout: &program.uniform_group,
            entries: &entries,
        });

        // Group 1: texture/sampler pairs.
        let units: Vec<(wgpu::TextureView, &wgpu::Sampler)> = (0..program.textures)
            .map(|i| match call.textures.get(i).and_then(Option::as_ref) {
                Some(unit) => (
                    unit.texture.texture.create_view(&wgpu::TextureViewDescriptor::default()),
                    unit.sampler.map_or(&self.default_sampler, |s| &s.sampler),
                ),
                None => (
                    self.blank.texture.create_view(&wgpu::TextureViewDescriptor::default()),
                    &self.default_sampler,
                ),
            })
            .collect();
        let mut entries = Vec::new();
        for (i, (view, sampler)) in units.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 2 * i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: 2 * i as u32 + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        let texture_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("retrace texture bind group"),
            layout: &program.texture_group,
            entries: &entries,
        });

        let Some([sx, sy, sw, sh]) = self.scissor(target) else {
            return Ok(());
        };
        let vp = target.flip(self.raster.viewport);
        if vp.is_empty() {
            return Ok(());
        }
        let [near, far] = self.raster.depth_range.map(|z| z.clamp(0.0, 1.0));
        let index_lists: Vec<Option<wgpu::Buffer>> = pieces
            .iter()
            .map(|p| match p {
                Piece::Expanded(ids, _) => Some(self.device.create_buffer_init(
                    &wgpu::util::BufferInitDescriptor {
                        label: Some("retrace expanded indices"),
                        contents: bytemuck::cast_slice(ids),
                        usage: wgpu::BufferUsages::INDEX,
                    },
                )),
                _ => None,
            })
            .collect();

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = colors
            .iter()
            .map(|a| {
                a.as_ref().map(|a| wgpu::RenderPassColorAttachment {
                    view: &a.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();
        let depth_stencil_attachment =
            target
                .depth_stencil
                .as_ref()
                .map(|a| wgpu::RenderPassDepthStencilAttachment {
                    view: &a.view,
                    depth_ops: keep::<f32>(a.format.has_depth()),
                    stencil_ops: keep::<u32>(a.format.has_stencil()),
                });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("retrace draw encoder"),
            });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("retrace draw pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            rpass.set_pipeline(&self.pipelines[&key]);
            rpass.set_bind_group(0, &uniform_group, &[]);
            rpass.set_bind_group(1, &texture_group, &[]);
            for (i, (buffer, offset)) in bindings.iter().enumerate() {
                rpass.set_vertex_buffer(i as u32, buffer.buffer.slice(*offset..));
            }
            rpass.set_viewport(
                vp.x as f32,
                vp.y as f32,
                vp.width as f32,
                vp.height as f32,
                near,
                far.max(near),
            );
            rpass.set_scissor_rect(sx, sy, sw, sh);
            let c = self.raster.blend_color;
            rpass.set_blend_constant(wgpu::Color {
                r: f64::from(c[0]),
                g: f64::from(c[1]),
                b: f64::from(c[2]),
                a: f64::from(c[3]),
            });
            rpass.set_stencil_reference(self.raster.stencil_func.reference as u32);

            for (piece, list) in pieces.iter().zip(&index_lists) {
                match (piece, list, call.index_buffer) {
                    (Piece::Vertices(range, instances), ..) => {
                        rpass.draw(range.clone(), 0..*instances)
                    }
                    (Piece::BoundIndices(format, range, instances), _, Some(ib)) => {
                        rpass.set_index_buffer(ib.buffer.slice(..), *format);
                        rpass.draw_indexed(range.clone(), 0, 0..*instances);
                    }
                    (Piece::Expanded(ids, instances), Some(list), _) => {
                        rpass.set_index_buffer(list.slice(..), wgpu::IndexFormat::Uint32);
                        rpass.draw_indexed(0..ids.len() as u32, 0, 0..*instances);
                    }
                    _ => {}
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn encode_blit(&mut self, op: &BlitOp<'_, Self>) -> Result<(), DeviceError> {
        let fb = Rc::clone(&self.framebuffer);
        let src = op.src.unwrap_or(&*fb);
        let dst = op.dst.unwrap_or(&*fb);
        let (s, d) = (op.src_rect, op.dst_rect);
        if s.width < 0 || s.height < 0 || d.width < 0 || d.height < 0 {
            return Err(DeviceError::Unsupported("mirrored blits".into()));
        }
        if s.width != d.width || s.height != d.height {
            return Err(DeviceError::Unsupported("scaled blits".into()));
        }

        let mut pairs: Vec<(Attachment, Attachment)> = Vec::new();
        if op.mask.color {
            if let Some(read) = src.colors.first() {
                for draw in self.draw_attachments(dst).into_iter().flatten() {
                    pairs.push((read.clone(), draw));
                }
            }
        }
        if let (true, Some(a), Some(b)) = (
            op.mask.depth || op.mask.stencil,
            &src.depth_stencil,
            &dst.depth_stencil,
        ) {
            // wgpu cannot copy packed depth24 texels at all.
            if a.format == TextureFormat::Depth24Stencil8 {
                return Err(DeviceError::Unsupported("depth24_stencil8 blits".into()));
            }
            let full = s == src.bounds() && d == dst.bounds() && a.size() == b.size();
            if !full {
                return Err(DeviceError::Unsupported("partial depth blits".into()));
            }
            pairs.push((a.clone(), b.clone()));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("retrace blit encoder"),
            });
        for (from, to) in &pairs {
            if from.format != to.format {
                self.flag(StatusError::InvalidOperation);
                continue;
            }
            let (fw, fh) = from.size();
            let (tw, th) = to.size();
            let clipped = clip_copy(s, Rect::from_size(fw, fh), d, Rect::from_size(tw, th));
            let Some((cs, cd)) = clipped else {
                continue;
            };
            let (fs, fd) = (
                Rect::new(cs.x, fh as i32 - (cs.y + cs.height), cs.width, cs.height),
                Rect::new(cd.x, th as i32 - (cd.y + cd.height), cd.width, cd.height),
            );
            encoder.copy_texture_to_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &from.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: fs.x as u32,
                        y: fs.y as u32,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyTextureInfo {
                    texture: &to.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: fd.x as u32,
                        y: fd.y as u32,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: cs.width as u32,
                    height: cs.height as u32,
                    depth_or_array_layers: 1,
                },
            );
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

fn image(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    format: TextureFormat,
    label: &str,
) -> GpuImage {
    let usage = wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::RENDER_ATTACHMENT
        | wgpu::TextureUsages::COPY_SRC
        | wgpu::TextureUsages::COPY_DST;
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: convert::texture_format(format),
        usage,
        view_formats: &[],
    });
    GpuImage { texture, format }
}

fn sampler(device: &wgpu::Device, desc: &SamplerDesc) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("retrace sampler"),
        address_mode_u: convert::address_mode(desc.wrap_s),
        address_mode_v: convert::address_mode(desc.wrap_t),
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: convert::filter(desc.mag_filter),
        min_filter: convert::filter(desc.min_filter),
        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
        ..Default::default()
    })
}

/// Reverses row order of tightly packed rows.
fn flip_rows(data: &[u8], row: usize) -> Vec<u8> {
    if row == 0 {
        return Vec::new();
    }
    data.chunks_exact(row).rev().flatten().copied().collect()
}

impl Device for GpuDevice {
    type Program = GpuProgram;
    type Buffer = GpuBuffer;
    type VertexArray = GpuVertexArray;
    type Sampler = GpuSampler;
    type Texture = GpuImage;
    type RenderTarget = GpuImage;
    type FrameTarget = GpuFrameTarget;

    fn describe(&self) -> String {
        format!(
            "wgpu {} ({:?}) {}x{}",
            self.info.name, self.info.backend, self.framebuffer.width, self.framebuffer.height
        )
    }

    fn limits(&self) -> Limits {
        self.limits.clone()
    }

    fn default_size(&self) -> (u32, u32) {
        (self.framebuffer.width, self.framebuffer.height)
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<GpuProgram, DeviceError> {
        let id = self.next_program;
        self.next_program += 1;
        self.create(|dev| GpuProgram::new(&dev.device, id, desc))
    }

    fn destroy_program(&mut self, program: GpuProgram) {
        let id = program.id;
        self.pipelines.retain(|key, _| key.program != id);
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<GpuBuffer, DeviceError> {
        let mut shadow = Vec::new();
        shadow
            .try_reserve_exact(desc.size as usize)
            .map_err(|_| DeviceError::OutOfMemory)?;
        shadow.resize(desc.size as usize, 0);
        if let Some(contents) = desc.contents {
            let n = contents.len().min(shadow.len());
            shadow[..n].copy_from_slice(&contents[..n]);
        }
        let buffer = self.create(|dev| {
            Ok(dev.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("retrace buffer"),
                size: desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT).max(4),
                usage: wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::INDEX
                    | wgpu::BufferUsages::UNIFORM
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }))
        })?;
        let buffer = GpuBuffer {
            buffer,
            shadow: RefCell::new(shadow),
        };
        if desc.contents.is_some() {
            self.write_shadow(&buffer, 0, desc.size);
        }
        Ok(buffer)
    }

    fn write_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= buffer.shadow.borrow().len() as u64)
            .ok_or_else(|| {
                DeviceError::Rejected(format!(
                    "write of {} bytes at {offset} past the end of the buffer",
                    data.len()
                ))
            })?;
        buffer.shadow.borrow_mut()[offset as usize..end as usize].copy_from_slice(data);
        self.command(|dev| {
            dev.write_shadow(buffer, offset, end);
            Ok(())
        })
    }

    fn destroy_buffer(&mut self, buffer: GpuBuffer) {
        buffer.buffer.destroy();
    }

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDesc,
    ) -> Result<GpuVertexArray, DeviceError> {
        let attributes = desc
            .attributes
            .iter()
            .map(|a| {
                if a.divisor > 1 {
                    return Err(DeviceError::Unsupported("instance divisors above 1".into()));
                }
                Ok(GpuAttribute {
                    slot: a.slot,
                    offset: a.offset,
                    key: VertexSlot {
                        location: a.location,
                        stride: u64::from(a.stride),
                        instanced: a.divisor == 1,
                        format: convert::vertex_format(a.ty, a.components, a.normalized)?,
                    },
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GpuVertexArray { attributes })
    }

    fn destroy_vertex_array(&mut self, _vertex_array: GpuVertexArray) {}

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<GpuSampler, DeviceError> {
        self.create(|dev| {
            Ok(GpuSampler {
                sampler: sampler(&dev.device, desc),
            })
        })
    }

    fn destroy_sampler(&mut self, _sampler: GpuSampler) {}

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<GpuImage, DeviceError> {
        let texture = self.create(|dev| {
            Ok(image(&dev.device, desc.width, desc.height, desc.format, "retrace texture"))
        })?;
        if let Some(data) = desc.data {
            let region = TextureRegion {
                x: 0,
                y: 0,
                width: desc.width,
                height: desc.height,
            };
            self.write_texture(&texture, region, data)?;
        }
        Ok(texture)
    }

    fn write_texture(
        &mut self,
        texture: &GpuImage,
        region: TextureRegion,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        if texture.format == TextureFormat::Depth24Stencil8 {
            return Err(DeviceError::Unsupported("depth24_stencil8 uploads".into()));
        }
        let (w, h) = (texture.texture.width(), texture.texture.height());
        let past = |at: u32, len: u32, max: u32| at.checked_add(len).is_none_or(|end| end > max);
        if past(region.x, region.width, w) || past(region.y, region.height, h) {
            return Err(DeviceError::Rejected(format!(
                "region {}x{}+{}+{} outside {w}x{h} texture",
                region.width, region.height, region.x, region.y
            )));
        }
        let row = region.width as usize * texture.format.texel_size();
        let expected = row * region.height as usize;
        if data.len() < expected {
            return Err(DeviceError::Rejected(format!(
                "upload needs {expected} bytes, got {}",
                data.len()
            )));
        }
        if expected == 0 {
            return Ok(());
        }
        let flipped = flip_rows(&data[..expected], row);
        self.command(|dev| {
            dev.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: region.x,
                        y: h - (region.y + region.height),
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                &flipped,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(row as u32),
                    rows_per_image: Some(region.height),
                },
                wgpu::Extent3d {
                    width: region.width,
                    height: region.height,
                    depth_or_array_layers: 1,
                },
            );
            Ok(())
        })
    }

    fn destroy_texture(&mut self, texture: GpuImage) {
        texture.texture.destroy();
    }

    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> Result<GpuImage, DeviceError> {
        if desc.samples > 1 {
            return Err(DeviceError::Unsupported("multisampled render targets".into()));
        }
        self.create(|dev| {
            Ok(image(&dev.device, desc.width, desc.height, desc.format, "retrace render target"))
        })
    }

    fn destroy_render_target(&mut self, target: GpuImage) {
        target.texture.destroy();
    }

    fn create_frame_target(
        &mut self,
        desc: &FrameTargetDesc<'_, Self>,
    ) -> Result<GpuFrameTarget, DeviceError> {
        let attach = |a: &AttachmentRef<'_, Self>| match a {
            AttachmentRef::Texture(img) | AttachmentRef::RenderTarget(img) => Attachment::new(img),
        };
        let colors: Vec<Attachment> = desc.color.iter().map(attach).collect();
        let depth_stencil = desc.depth_stencil.as_ref().map(attach);

        if let Some(a) = colors.iter().find(|a| !a.format.is_color()) {
            return Err(DeviceError::Rejected(format!("{:?} is not a colour format", a.format)));
        }
        if let Some(a) = depth_stencil.as_ref().filter(|a| !a.format.has_depth()) {
            return Err(DeviceError::Rejected(format!("{:?} is not a depth format", a.format)));
        }
        let (width, height) = colors
            .iter()
            .chain(depth_stencil.as_ref())
            .map(Attachment::size)
            .reduce(|(w0, h0), (w1, h1)| (w0.min(w1), h0.min(h1)))
            .unwrap_or((0, 0));
        Ok(GpuFrameTarget {
            colors,
            depth_stencil,
            width,
            height,
        })
    }

    fn destroy_frame_target(&mut self, _target: GpuFrameTarget) {}

    fn set_state(&mut self, change: &StateChange) {
        log::trace!("gpu set_state {change:?}");
        self.raster.apply(change);
    }

    fn clear(&mut self, target: Option<&GpuFrameTarget>, op: ClearOp) -> Result<(), DeviceError> {
        let fb = Rc::clone(&self.framebuffer);
        let target = target.unwrap_or(&*fb);
        self.command(|dev| match op {
            ClearOp::Color { index: None, value } => {
                let mut done: Vec<wgpu::Texture> = Vec::new();
                for a in dev.draw_attachments(target).into_iter().flatten() {
                    if done.contains(&a.texture) {
                        continue;
                    }
                    dev.clear_color(target, &a, value)?;
                    done.push(a.texture);
                }
                Ok(())
            }
            ClearOp::Color {
                index: Some(i),
                value,
            } => {
                let a = dev
                    .draw_attachments(target)
                    .get(i as usize)
                    .cloned()
                    .flatten();
                match a {
                    Some(a) => dev.clear_color(target, &a, value),
                    None => Ok(()),
                }
            }
            ClearOp::Depth(z) => dev.clear_depth_stencil(target, Some(z), None),
            ClearOp::Stencil(s) => dev.clear_depth_stencil(target, None, Some(s)),
            ClearOp::DepthStencil(z, s) => dev.clear_depth_stencil(target, Some(z), Some(s)),
        })
    }

    fn draw(&mut self, call: &DrawCall<'_, Self>) -> Result<(), DeviceError> {
        self.command(|dev| dev.encode_draw(call))
    }

    fn blit(&mut self, op: &BlitOp<'_, Self>) -> Result<(), DeviceError> {
        self.command(|dev| dev.encode_blit(op))
    }

    fn copy_buffer(
        &mut self,
        src: &GpuBuffer,
        dst: &GpuBuffer,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), DeviceError> {
        let in_bounds = |b: &GpuBuffer, offset: u64| {
            offset
                .checked_add(size)
                .is_some_and(|end| end <= b.shadow.borrow().len() as u64)
        };
        if !in_bounds(src, src_offset) || !in_bounds(dst, dst_offset) {
            return Err(DeviceError::Rejected("copy range outside buffer".into()));
        }
        let span = |offset: u64| offset as usize..(offset + size) as usize;
        let bytes = src.shadow.borrow()[span(src_offset)].to_vec();
        dst.shadow.borrow_mut()[span(dst_offset)].copy_from_slice(&bytes);
        self.command(|dev| {
            dev.write_shadow(dst, dst_offset, dst_offset + size);
            Ok(())
        })
    }

    fn read_pixels(&mut self, op: &ReadOp<'_, Self>) -> Result<Box<dyn Fence>, DeviceError> {
        let fb = Rc::clone(&self.framebuffer);
        let source = op.source.unwrap_or(&*fb);
        let attachment = source
            .colors
            .get(op.attachment as usize)
            .cloned()
            .ok_or_else(|| {
                DeviceError::Rejected(format!("no colour attachment {}", op.attachment))
            })?;

        let (w, h) = attachment.size();
        let copied = op.rect.intersect(Rect::from_size(w, h));
        let texel = attachment.format.texel_size();
        let padded_row = (copied.width.max(0) as usize * texel)
            .next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize);
        let layout = ReadLayout {
            rect: op.rect,
            copied,
            padded_row,
            source: attachment.format,
            format: op.format,
            ty: op.ty,
        };
        let integer = matches!(attachment.format.class(), FormatClass::Uint | FormatClass::Sint);
        if integer != op.format.is_integer() {
            self.flag(StatusError::InvalidOperation);
            return Ok(Box::new(GpuFence::failed(
                self.device.clone(),
                layout,
                "pixel format does not match the attachment",
            )));
        }
        if copied.is_empty() {
            return Ok(Box::new(GpuFence::empty(self.device.clone(), layout)));
        }

        let (staging, status) = self.scoped(|dev| {
            let staging = dev.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("retrace readback staging"),
                size: (padded_row * copied.height as usize) as u64,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder = dev
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("retrace readback encoder"),
                });
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: &attachment.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: copied.x as u32,
                        y: (h as i32 - (copied.y + copied.height)) as u32,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &staging,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_row as u32),
                        rows_per_image: Some(copied.height as u32),
                    },
                },
                wgpu::Extent3d {
                    width: copied.width as u32,
                    height: copied.height as u32,
                    depth_or_array_layers: 1,
                },
            );
            dev.queue.submit(std::iter::once(encoder.finish()));
            staging
        });
        if let Some((status, message)) = status {
            self.flag(status);
            return Ok(Box::new(GpuFence::failed(self.device.clone(), layout, message)));
        }

        let (tx, rx) = mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        Ok(Box::new(GpuFence::mapping(self.device.clone(), staging, rx, layout)))
    }

    fn begin_timer(&mut self) -> Result<(), DeviceError> {
        if !self.device.features().contains(TIMER_FEATURES) {
            return Err(DeviceError::Unsupported("timer_query".into()));
        }
        if self.timer.is_some() {
            return Err(DeviceError::Rejected("timer already running".into()));
        }
        let query_set = self.create(|dev| {
            let query_set = dev.device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("retrace timer"),
                ty: wgpu::QueryType::Timestamp,
                count: 2,
            });
            let mut encoder = dev
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("retrace timer begin"),
                });
            encoder.write_timestamp(&query_set, 0);
            dev.queue.submit(std::iter::once(encoder.finish()));
            Ok(query_set)
        })?;
        self.timer = Some(query_set);
        Ok(())
    }

    fn end_timer(&mut self) -> Result<Box<dyn Fence>, DeviceError> {
        let query_set = self
            .timer
            .take()
            .ok_or_else(|| DeviceError::Rejected("no timer running".into()))?;
        let decode = Decode::Elapsed {
            period: self.queue.get_timestamp_period(),
        };
        let size = 2 * u64::from(wgpu::QUERY_SIZE);

        let (staging, status) = self.scoped(|dev| {
            let resolve = dev.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("retrace timer resolve"),
                size,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let staging = dev.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("retrace timer staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder = dev
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("retrace timer end"),
                });
            encoder.write_timestamp(&query_set, 1);
            encoder.resolve_query_set(&query_set, 0..2, &resolve, 0);
            encoder.copy_buffer_to_buffer(&resolve, 0, &staging, 0, size);
            dev.queue.submit(std::iter::once(encoder.finish()));
            staging
        });
        if let Some((status, message)) = status {
            self.flag(status);
            return Ok(Box::new(GpuFence::failed(self.device.clone(), decode, message)));
        }

        let (tx, rx) = mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        Ok(Box::new(GpuFence::mapping(self.device.clone(), staging, rx, decode)))
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.queue.submit(std::iter::empty());
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("device poll failed: {e}");
            return Err(DeviceError::Lost);
        }
        Ok(())
    }

    fn check_status(&mut self) -> Option<StatusError> {
        self.status.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fans_become_triangle_lists() {
        assert_eq!(expand(Topology::TriangleFan, &[0, 1, 2, 3]), vec![0, 1, 2, 0, 2, 3]);
        assert!(expand(Topology::TriangleFan, &[0, 1]).is_empty());
    }

    #[test]
    fn loops_close_back_to_the_first_vertex() {
        assert_eq!(expand(Topology::LineLoop, &[4, 5, 6]), vec![4, 5, 6, 4]);
    }

    #[test]
    fn copies_clip_to_both_images() {
        let (s, d) = clip_copy(
            Rect::new(-2, 0, 4, 4),
            Rect::from_size(8, 8),
            Rect::new(5, 0, 4, 4),
            Rect::from_size(8, 8),
        )
        .unwrap();
        // Two columns fall off the source's left edge, one more off the
        // destination's right edge.
        assert_eq!(s, Rect::new(0, 0, 1, 4));
        assert_eq!(d, Rect::new(7, 0, 1, 4));
        let bounds = Rect::from_size(8, 8);
        assert!(clip_copy(Rect::new(0, 0, 2, 2), bounds, Rect::new(9, 0, 2, 2), bounds).is_none());
    }

    #[test]
    fn rows_flip_bottom_up() {
        assert_eq!(flip_rows(&[1, 2, 3, 4, 5, 6], 2), vec![5, 6, 3, 4, 1, 2]);
    }

    #[test]
    fn limits_reserve_the_loose_uniform_binding() {
        let l = limits_from(&wgpu::Limits::default(), wgpu::Features::empty());
        assert_eq!(
            l.max_uniform_buffer_bindings,
            wgpu::Limits::default().max_uniform_buffers_per_shader_stage - 1
        );
        assert!(l.extensions.multi_draw);
        assert!(!l.extensions.timer_query);
    }

    #[test]
    fn kept_planes_load_and_store() {
        let depth = keep::<f32>(true).unwrap();
        assert_eq!(depth.load, wgpu::LoadOp::Load);
        assert_eq!(depth.store, wgpu::StoreOp::Store);
        assert!(keep::<u32>(false).is_none());
    }

    #[test]
    fn timer_queries_need_both_timestamp_features() {
        let partial = limits_from(&wgpu::Limits::default(), wgpu::Features::TIMESTAMP_QUERY);
        assert!(!partial.extensions.timer_query);
        let full = limits_from(&wgpu::Limits::default(), TIMER_FEATURES);
        assert!(full.extensions.timer_query);
    }
}
