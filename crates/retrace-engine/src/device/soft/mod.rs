//! Deterministic CPU reference device.
//!
//! Programs are not compiled. Every program runs the same fixed pipeline:
//! - attribute 0 is the clip-space position
//! - the colour is the `color` uniform when the program declares one and it
//!   has been set, else attribute 1 when enabled, else white for textured
//!   programs, else the attribute 1 default
//! - attribute 2 holds texture coordinates; programs declaring at least one
//!   sampler modulate the colour with texture unit 0
//!
//! Output is written to every active draw buffer.

mod raster;
mod surface;

use std::collections::VecDeque;
use std::time::Instant;

use slotmap::{SlotMap, new_key_type};

use crate::error::StatusError;
use crate::state::{RasterState, StateChange, defaults};

use super::texel::Texel;
use super::types::{
    ClearValue, DrawBuffer, Filter, FormatClass, Rect, SamplerDesc, TextureFormat, Wrap,
};
use super::{
    AttachmentRef, BlitOp, BufferDesc, ClearOp, Device, DeviceError, DrawCall, DrawRange,
    Extensions, Fence, FenceStatus, FrameTargetDesc, Limits, ProgramDesc, ReadOp,
    RenderTargetDesc, TextureDesc, TextureRegion, VertexArrayDesc,
};
use raster::{Pipeline, ShadedVertex, Targets, Varyings};
use surface::Surface;

new_key_type! {
    pub struct SoftProgram;
    pub struct SoftBuffer;
    pub struct SoftVertexArray;
    pub struct SoftSampler;
    pub struct SoftTexture;
    pub struct SoftRenderTarget;
    pub struct SoftFrameTarget;
}

#[derive(Debug, Clone)]
pub struct SoftDeviceOptions {
    /// Default framebuffer size.
    pub width: u32,
    pub height: u32,
    /// Polls a readback fence needs before it signals.
    pub fence_latency: u32,
    pub limits: Limits,
}

impl Default for SoftDeviceOptions {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            fence_latency: 1,
            limits: Limits {
                extensions: Extensions {
                    multi_draw: true,
                    timer_query: true,
                },
                ..Limits::default()
            },
        }
    }
}

struct ProgramEntry {
    has_color_uniform: bool,
    textured: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SurfaceRef {
    DefaultColor,
    DefaultDepth,
    Texture(SoftTexture),
    RenderTarget(SoftRenderTarget),
}

#[derive(Clone)]
struct FrameTargetEntry {
    color: Vec<SurfaceRef>,
    depth_stencil: Option<SurfaceRef>,
}

/// Attribute read past the end of its buffer.
struct OutOfRange;

pub struct SoftDevice {
    options: SoftDeviceOptions,
    color: Surface,
    depth_stencil: Surface,
    programs: SlotMap<SoftProgram, ProgramEntry>,
    buffers: SlotMap<SoftBuffer, Vec<u8>>,
    vertex_arrays: SlotMap<SoftVertexArray, VertexArrayDesc>,
    samplers: SlotMap<SoftSampler, SamplerDesc>,
    textures: SlotMap<SoftTexture, Surface>,
    render_targets: SlotMap<SoftRenderTarget, Surface>,
    frame_targets: SlotMap<SoftFrameTarget, FrameTargetEntry>,
    raster: RasterState,
    status: VecDeque<StatusError>,
    timer: Option<Instant>,
}

impl SoftDevice {
    pub fn new(options: SoftDeviceOptions) -> Self {
        let (w, h) = (options.width, options.height);
        log::debug!("soft device {w}x{h}, fence latency {}", options.fence_latency);
        Self {
            color: Surface::blank(w, h, TextureFormat::Rgba8),
            depth_stencil: Surface::blank(w, h, TextureFormat::Depth24Stencil8),
            programs: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            vertex_arrays: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            render_targets: SlotMap::with_key(),
            frame_targets: SlotMap::with_key(),
            raster: RasterState::new(&options.limits, w, h),
            status: VecDeque::new(),
            timer: None,
            options,
        }
    }

    /// Live device objects across every kind.
    pub fn object_count(&self) -> usize {
        self.programs.len()
            + self.buffers.len()
            + self.vertex_arrays.len()
            + self.samplers.len()
            + self.textures.len()
            + self.render_targets.len()
            + self.frame_targets.len()
    }

    fn flag(&mut self, status: StatusError) {
        log::debug!("soft device status: {status}");
        self.status.push_back(status);
    }

    fn surface(&self, r: SurfaceRef) -> Option<&Surface> {
        match r {
            SurfaceRef::DefaultColor => Some(&self.color),
            SurfaceRef::DefaultDepth => Some(&self.depth_stencil),
            SurfaceRef::Texture(k) => self.textures.get(k),
            SurfaceRef::RenderTarget(k) => self.render_targets.get(k),
        }
    }

    fn surface_mut(&mut self, r: SurfaceRef) -> Option<&mut Surface> {
        match r {
            SurfaceRef::DefaultColor => Some(&mut self.color),
            SurfaceRef::DefaultDepth => Some(&mut self.depth_stencil),
            SurfaceRef::Texture(k) => self.textures.get_mut(k),
            SurfaceRef::RenderTarget(k) => self.render_targets.get_mut(k),
        }
    }

    fn attachments(
        &self,
        target: Option<&SoftFrameTarget>,
    ) -> Result<FrameTargetEntry, DeviceError> {
        match target {
            None => Ok(FrameTargetEntry {
                color: vec![SurfaceRef::DefaultColor],
                depth_stencil: Some(SurfaceRef::DefaultDepth),
            }),
            Some(k) => self
                .frame_targets
                .get(*k)
                .cloned()
                .ok_or_else(|| DeviceError::Rejected("stale frame target".into())),
        }
    }

    /// Colour surfaces named by the active draw buffers, deduplicated.
    fn draw_surfaces(&self, entry: &FrameTargetEntry) -> Vec<SurfaceRef> {
        let mut out = Vec::new();
        for db in &self.raster.draw_buffers {
            let r = match db {
                DrawBuffer::None => None,
                DrawBuffer::Back => entry.color.first(),
                DrawBuffer::Color(n) => entry.color.get(*n as usize),
            };
            if let Some(r) = r {
                if !out.contains(r) {
                    out.push(*r);
                }
            }
        }
        out
    }

    /// Moves the named surfaces out for the duration of `f`.
    fn with_targets<R>(
        &mut self,
        colors: &[SurfaceRef],
        depth: Option<SurfaceRef>,
        f: impl FnOnce(&Self, &mut Targets) -> R,
    ) -> R {
        let mut taken = Vec::new();
        let mut targets = Targets::default();
        for r in colors {
            if let Some(s) = self.surface_mut(*r).map(std::mem::take) {
                taken.push(*r);
                targets.colors.push(s);
            }
        }
        let depth = depth.filter(|r| self.surface(*r).is_some_and(Surface::has_depth));
        targets.depth = depth.and_then(|r| self.surface_mut(r).map(std::mem::take));

        let out = f(self, &mut targets);

        for (r, s) in taken.into_iter().zip(targets.colors) {
            if let Some(slot) = self.surface_mut(r) {
                *slot = s;
            }
        }
        if let (Some(r), Some(s)) = (depth, targets.depth) {
            if let Some(slot) = self.surface_mut(r) {
                *slot = s;
            }
        }
        out
    }

    fn fetch(
        &self,
        va: Option<&VertexArrayDesc>,
        buffers: &[&[u8]],
        location: u32,
        vertex: u32,
        instance: u32,
    ) -> Result<Option<[f32; 4]>, OutOfRange> {
        let Some(attr) = va.and_then(|va| va.attributes.iter().find(|a| a.location == location))
        else {
            return Ok(None);
        };
        let element = if attr.divisor == 0 {
            vertex
        } else {
            instance / attr.divisor
        };
        let data = buffers.get(attr.slot).ok_or(OutOfRange)?;
        let base = u64::from(attr.stride)
            .checked_mul(u64::from(element))
            .and_then(|b| b.checked_add(attr.offset))
            .ok_or(OutOfRange)?;
        let mut out = defaults::ATTRIBUTE;
        for (c, slot) in out.iter_mut().enumerate().take(attr.components as usize) {
            let at = base
                .checked_add((c * attr.ty.size()) as u64)
                .and_then(|at| usize::try_from(at).ok())
                .ok_or(OutOfRange)?;
            let bytes = data.get(at..).ok_or(OutOfRange)?;
            *slot = attr.ty.read(bytes, attr.normalized).ok_or(OutOfRange)?;
        }
        Ok(Some(out))
    }

    fn attribute_default(&self, location: u32) -> [f32; 4] {
        self.raster
            .attribute_defaults
            .get(location as usize)
            .copied()
            .unwrap_or(defaults::ATTRIBUTE)
    }

    fn shade(
        &self,
        va: Option<&VertexArrayDesc>,
        buffers: &[&[u8]],
        color_uniform: Option<[f32; 4]>,
        textured: bool,
        vertex: u32,
        instance: u32,
    ) -> Result<ShadedVertex, OutOfRange> {
        let attr = |loc: u32| -> Result<[f32; 4], OutOfRange> {
            Ok(self
                .fetch(va, buffers, loc, vertex, instance)?
                .unwrap_or_else(|| self.attribute_default(loc)))
        };
        let clip = attr(0)?;
        let color = match color_uniform {
            Some(c) => c,
            None => match self.fetch(va, buffers, 1, vertex, instance)? {
                Some(c) => c,
                None if textured => [1.0; 4],
                None => self.attribute_default(1),
            },
        };
        let uv = attr(2)?;
        Ok(ShadedVertex {
            clip,
            vary: Varyings {
                color,
                uv: [uv[0], uv[1]],
            },
        })
    }

    fn index_batches(
        range: &DrawRange,
        indices: Option<&[u8]>,
    ) -> Result<(Vec<Vec<u32>>, u32), OutOfRange> {
        Ok(match range {
            DrawRange::Arrays {
                first,
                count,
                instances,
            } => {
                let end = first.checked_add(*count).ok_or(OutOfRange)?;
                (vec![(*first..end).collect()], *instances)
            }
            DrawRange::Elements {
                index_type,
                offset,
                count,
                instances,
            } => {
                let data = indices.ok_or(OutOfRange)?;
                let start = usize::try_from(*offset).map_err(|_| OutOfRange)? / index_type.size();
                let ids = (0..*count as usize)
                    .map(|i| {
                        let at = start.checked_add(i).ok_or(OutOfRange)?;
                        index_type.read(data, at).ok_or(OutOfRange)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (vec![ids], *instances)
            }
            DrawRange::MultiArrays { firsts, counts } => (
                firsts
                    .iter()
                    .zip(counts)
                    .map(|(f, c)| Ok((*f..f.checked_add(*c).ok_or(OutOfRange)?).collect()))
                    .collect::<Result<Vec<_>, OutOfRange>>()?,
                1,
            ),
        })
    }
}

impl Device for SoftDevice {
    type Program = SoftProgram;
    type Buffer = SoftBuffer;
    type VertexArray = SoftVertexArray;
    type Sampler = SoftSampler;
    type Texture = SoftTexture;
    type RenderTarget = SoftRenderTarget;
    type FrameTarget = SoftFrameTarget;

    fn describe(&self) -> String {
        format!("soft {}x{}", self.options.width, self.options.height)
    }

    fn limits(&self) -> Limits {
        self.options.limits.clone()
    }

    fn default_size(&self) -> (u32, u32) {
        (self.options.width, self.options.height)
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<SoftProgram, DeviceError> {
        if desc.vertex.trim().is_empty() || desc.fragment.trim().is_empty() {
            return Err(DeviceError::Rejected("empty shader source".into()));
        }
        Ok(self.programs.insert(ProgramEntry {
            has_color_uniform: desc.uniforms.iter().any(|u| u.name == "color"),
            textured: !desc.textures.is_empty(),
        }))
    }

    fn destroy_program(&mut self, program: SoftProgram) {
        self.programs.remove(program);
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<SoftBuffer, DeviceError> {
        let size = usize::try_from(desc.size).map_err(|_| DeviceError::OutOfMemory)?;
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| DeviceError::OutOfMemory)?;
        data.resize(size, 0);
        if let Some(contents) = desc.contents {
            let n = contents.len().min(size);
            data[..n].copy_from_slice(&contents[..n]);
        }
        Ok(self.buffers.insert(data))
    }

    fn write_buffer(
        &mut self,
        buffer: &SoftBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let buf = self
            .buffers
            .get_mut(*buffer)
            .ok_or_else(|| DeviceError::Rejected("stale buffer".into()))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(data.len());
        if end > buf.len() {
            return Err(DeviceError::Rejected(format!(
                "write of {} bytes at {offset} overruns {}-byte buffer",
                data.len(),
                buf.len()
            )));
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: SoftBuffer) {
        self.buffers.remove(buffer);
    }

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDesc,
    ) -> Result<SoftVertexArray, DeviceError> {
        Ok(self.vertex_arrays.insert(desc.clone()))
    }

    fn destroy_vertex_array(&mut self, vertex_array: SoftVertexArray) {
        self.vertex_arrays.remove(vertex_array);
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SoftSampler, DeviceError> {
        Ok(self.samplers.insert(*desc))
    }

    fn destroy_sampler(&mut self, sampler: SoftSampler) {
        self.samplers.remove(sampler);
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<SoftTexture, DeviceError> {
        let mut surface = Surface::new(desc.width, desc.height, desc.format)?;
        if let Some(data) = desc.data {
            let region = TextureRegion {
                x: 0,
                y: 0,
                width: desc.width,
                height: desc.height,
            };
            surface.upload(region, data)?;
        }
        Ok(self.textures.insert(surface))
    }

    fn write_texture(
        &mut self,
        texture: &SoftTexture,
        region: TextureRegion,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        self.textures
            .get_mut(*texture)
            .ok_or_else(|| DeviceError::Rejected("stale texture".into()))?
            .upload(region, data)
    }

    fn destroy_texture(&mut self, texture: SoftTexture) {
        self.textures.remove(texture);
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDesc,
    ) -> Result<SoftRenderTarget, DeviceError> {
        if desc.samples > 1 {
            log::trace!("soft device resolves {}x multisampling to one sample", desc.samples);
        }
        let surface = Surface::new(desc.width, desc.height, desc.format)?;
        Ok(self.render_targets.insert(surface))
    }

    fn destroy_render_target(&mut self, target: SoftRenderTarget) {
        self.render_targets.remove(target);
    }

    fn create_frame_target(
        &mut self,
        desc: &FrameTargetDesc<'_, Self>,
    ) -> Result<SoftFrameTarget, DeviceError> {
        let to_ref = |a: &AttachmentRef<'_, Self>| match a {
            AttachmentRef::Texture(k) => SurfaceRef::Texture(**k),
            AttachmentRef::RenderTarget(k) => SurfaceRef::RenderTarget(**k),
        };
        let color: Vec<SurfaceRef> = desc.color.iter().map(to_ref).collect();
        let depth_stencil = desc.depth_stencil.as_ref().map(to_ref);

        for r in &color {
            match self.surface(*r) {
                Some(s) if s.has_color() => {}
                Some(s) => {
                    return Err(DeviceError::Rejected(format!(
                        "{:?} is not a colour format",
                        s.format
                    )));
                }
                None => return Err(DeviceError::Rejected("stale colour attachment".into())),
            }
        }
        if let Some(r) = depth_stencil {
            match self.surface(r) {
                Some(s) if s.has_depth() => {}
                Some(s) => {
                    return Err(DeviceError::Rejected(format!(
                        "{:?} is not a depth format",
                        s.format
                    )));
                }
                None => return Err(DeviceError::Rejected("stale depth attachment".into())),
            }
        }
        Ok(self.frame_targets.insert(FrameTargetEntry {
            color,
            depth_stencil,
        }))
    }

    fn destroy_frame_target(&mut self, target: SoftFrameTarget) {
        self.frame_targets.remove(target);
    }

    fn set_state(&mut self, change: &StateChange) {
        log::trace!("soft set_state {change:?}");
        self.raster.apply(change);
    }

    fn clear(&mut self, target: Option<&SoftFrameTarget>, op: ClearOp) -> Result<(), DeviceError> {
        let entry = self.attachments(target)?;
        let rect = if self.raster.scissor_test {
            self.raster.scissor
        } else {
            Rect::new(0, 0, i32::MAX, i32::MAX)
        };
        let mask = self.raster.color_mask;
        let depth_mask = self.raster.depth_mask;
        let stencil_mask = (self.raster.stencil_mask & 0xff) as u8;

        let fill_color = |dev: &mut Self, r: SurfaceRef, value: ClearValue| {
            let Some(s) = dev.surface_mut(r) else { return };
            let class = s.format.class();
            let integer = matches!(class, FormatClass::Uint | FormatClass::Sint);
            let (texel, matches) = match value {
                ClearValue::Float(v) => (Texel::Float(v), !integer),
                ClearValue::Int(v) => (Texel::Int(v), class == FormatClass::Sint),
                ClearValue::Uint(v) => (Texel::Uint(v), class == FormatClass::Uint),
            };
            if matches {
                s.fill_color(rect, texel, mask);
            } else {
                dev.flag(StatusError::InvalidOperation);
            }
        };

        match op {
            ClearOp::Color { index: None, value } => {
                for r in self.draw_surfaces(&entry) {
                    fill_color(self, r, value);
                }
            }
            ClearOp::Color { index: Some(i), value } => {
                let r = match self.raster.draw_buffers.get(i as usize) {
                    Some(DrawBuffer::Back) => entry.color.first().copied(),
                    Some(DrawBuffer::Color(n)) => entry.color.get(*n as usize).copied(),
                    Some(DrawBuffer::None) => None,
                    None => {
                        self.flag(StatusError::InvalidValue);
                        None
                    }
                };
                if let Some(r) = r {
                    fill_color(self, r, value);
                }
            }
            ClearOp::Depth(z) => {
                if let Some(s) = entry.depth_stencil.and_then(|r| self.surface_mut(r)) {
                    if depth_mask {
                        s.fill_depth(rect, z);
                    }
                }
            }
            ClearOp::Stencil(st) => {
                if let Some(s) = entry.depth_stencil.and_then(|r| self.surface_mut(r)) {
                    s.fill_stencil(rect, st.clamp(0, 255) as u8, stencil_mask);
                }
            }
            ClearOp::DepthStencil(z, st) => {
                if let Some(s) = entry.depth_stencil.and_then(|r| self.surface_mut(r)) {
                    if depth_mask {
                        s.fill_depth(rect, z);
                    }
                    s.fill_stencil(rect, st.clamp(0, 255) as u8, stencil_mask);
                }
            }
        }
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_, Self>) -> Result<(), DeviceError> {
        if self.raster.rasterizer_discard {
            return Ok(());
        }
        let program = self
            .programs
            .get(*call.program)
            .ok_or_else(|| DeviceError::Rejected("stale program".into()))?;
        let color_uniform = if program.has_color_uniform {
            call.uniforms
                .get("color")
                .map(|v| defaults::fill4(&v.as_floats(), defaults::ATTRIBUTE))
        } else {
            None
        };
        let textured = program.textured;

        let va = match call.vertex_array {
            Some(k) => Some(
                self.vertex_arrays
                    .get(*k)
                    .ok_or_else(|| DeviceError::Rejected("stale vertex array".into()))?,
            ),
            None => None,
        };
        let buffers = call
            .vertex_buffers
            .iter()
            .map(|b| {
                self.buffers
                    .get(**b)
                    .map(Vec::as_slice)
                    .ok_or_else(|| DeviceError::Rejected("stale vertex buffer".into()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let indices = call
            .index_buffer
            .and_then(|b| self.buffers.get(*b))
            .map(Vec::as_slice);

        // Vertex stage runs up front so the targets can be borrowed mutably.
        let shaded = Self::index_batches(&call.range, indices).and_then(|(batches, instances)| {
            let mut out = Vec::new();
            for batch in &batches {
                for instance in 0..instances {
                    let vs = batch
                        .iter()
                        .map(|&v| self.shade(va, &buffers, color_uniform, textured, v, instance))
                        .collect::<Result<Vec<_>, _>>()?;
                    out.push(vs);
                }
            }
            Ok(out)
        });
        let Ok(shaded) = shaded else {
            self.flag(StatusError::InvalidOperation);
            return Ok(());
        };

        let texture = if textured {
            call.textures
                .first()
                .and_then(Option::as_ref)
                .and_then(|unit| {
                    let sampler = unit
                        .sampler
                        .and_then(|k| self.samplers.get(*k))
                        .copied()
                        .unwrap_or_default();
                    self.textures.get(*unit.texture).map(|s| (s.clone(), sampler))
                })
        } else {
            None
        };

        let entry = self.attachments(call.target)?;
        let colors = self.draw_surfaces(&entry);
        let topology = call.topology;
        self.with_targets(&colors, entry.depth_stencil, |dev, targets| {
            let pipeline = Pipeline {
                state: &dev.raster,
                texture: texture.as_ref().map(|(s, d)| (s, *d)),
                bounds: targets.bounds(),
            };
            for vs in &shaded {
                pipeline.draw(targets, topology, vs);
            }
        });
        Ok(())
    }

    fn blit(&mut self, op: &BlitOp<'_, Self>) -> Result<(), DeviceError> {
        let src = self.attachments(op.src)?;
        let dst = self.attachments(op.dst)?;
        if (op.mask.depth || op.mask.stencil) && op.filter == Filter::Linear {
            self.flag(StatusError::InvalidOperation);
            return Ok(());
        }

        let scissor = self.raster.scissor_test.then_some(self.raster.scissor);
        let map = |d: i32, d0: i32, d1: i32, s0: i32, s1: i32| -> f32 {
            let t = (d as f32 + 0.5 - d0 as f32) / (d1 - d0) as f32;
            s0 as f32 + t * (s1 - s0) as f32
        };
        let (sr, dr) = (op.src_rect, op.dst_rect);
        let edges = |r: Rect| {
            r.checked_end()
                .ok_or_else(|| DeviceError::Rejected(format!("blit rect {r:?} overflows")))
        };
        let (sx1, sy1) = edges(sr)?;
        let (dx1, dy1) = edges(dr)?;
        let (dx0, dy0) = (dr.x, dr.y);
        if dx0 == dx1 || dy0 == dy1 {
            return Ok(());
        }
        let mut region = Rect::new(dx0, dy0, dr.width, dr.height);
        if let Some(s) = scissor {
            region = region.intersect(s);
        }

        let source_color = if op.mask.color {
            src.color.first().and_then(|r| self.surface(*r)).cloned()
        } else {
            None
        };
        let source_depth = if op.mask.depth || op.mask.stencil {
            src.depth_stencil.and_then(|r| self.surface(r)).cloned()
        } else {
            None
        };
        let colors = if op.mask.color { self.draw_surfaces(&dst) } else { Vec::new() };
        let depth = if source_depth.is_some() { dst.depth_stencil } else { None };

        let linear = SamplerDesc {
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            wrap_s: Wrap::ClampToEdge,
            wrap_t: Wrap::ClampToEdge,
        };
        self.with_targets(&colors, depth, |_, targets| {
            let region = region.intersect(targets.bounds());
            for y in region.y..region.y + region.height {
                let sy = map(y, dy0, dy1, sr.y, sy1);
                for x in region.x..region.x + region.width {
                    let sx = map(x, dx0, dx1, sr.x, sx1);
                    let (ix, iy) = (sx.floor() as i32, sy.floor() as i32);
                    if let Some(src) = &source_color {
                        let texel = match op.filter {
                            Filter::Nearest => src.texel(ix, iy),
                            Filter::Linear => Texel::Float(src.sample(
                                [sx / src.width as f32, sy / src.height as f32],
                                &linear,
                            )),
                        };
                        for dst in &mut targets.colors {
                            dst.set_texel(x, y, texel.convert(dst.format));
                        }
                    }
                    if let (Some(src), Some(dst)) = (&source_depth, targets.depth.as_mut()) {
                        if op.mask.depth {
                            dst.set_depth(x, y, src.depth(ix, iy));
                        }
                        if op.mask.stencil {
                            dst.set_stencil(x, y, src.stencil(ix, iy));
                        }
                    }
                }
            }
        });
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: &SoftBuffer,
        dst: &SoftBuffer,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), DeviceError> {
        let range = |offset: u64, len: usize| -> Result<std::ops::Range<usize>, DeviceError> {
            let start = usize::try_from(offset).unwrap_or(usize::MAX);
            let end = usize::try_from(size).ok().and_then(|s| start.checked_add(s));
            match end {
                Some(end) if end <= len => Ok(start..end),
                _ => Err(DeviceError::Rejected(format!(
                    "copy of {size} bytes at {offset} overruns {len}-byte buffer"
                ))),
            }
        };
        let stale = || DeviceError::Rejected("stale buffer".into());
        let source = self.buffers.get(*src).ok_or_else(stale)?;
        let chunk = source[range(src_offset, source.len())?].to_vec();
        let target = self.buffers.get_mut(*dst).ok_or_else(stale)?;
        let r = range(dst_offset, target.len())?;
        target[r].copy_from_slice(&chunk);
        Ok(())
    }

    fn read_pixels(&mut self, op: &ReadOp<'_, Self>) -> Result<Box<dyn Fence>, DeviceError> {
        let entry = self.attachments(op.source)?;
        let surface = entry
            .color
            .get(op.attachment as usize)
            .and_then(|r| self.surface(*r))
            .ok_or_else(|| {
                DeviceError::Rejected(format!("no colour attachment {}", op.attachment))
            })?;

        let integer_surface =
            matches!(surface.format.class(), FormatClass::Uint | FormatClass::Sint);
        if integer_surface != op.format.is_integer() {
            self.flag(StatusError::InvalidOperation);
            return Ok(Box::new(SoftFence::failed("pixel format does not match the attachment")));
        }

        let channels = op.format.channels();
        let (w, h) = (op.rect.width.max(0), op.rect.height.max(0));
        let mut data = Vec::with_capacity(w as usize * h as usize * channels * op.ty.size());
        for y in op.rect.y..op.rect.y + h {
            for x in op.rect.x..op.rect.x + w {
                let inside =
                    x >= 0 && y >= 0 && (x as u32) < surface.width && (y as u32) < surface.height;
                let v = if inside {
                    surface.texel(x, y).to_f64()
                } else {
                    [0.0; 4]
                };
                for c in v.iter().take(channels) {
                    op.ty.push(*c, &mut data);
                }
            }
        }
        Ok(Box::new(SoftFence {
            remaining: self.options.fence_latency,
            data: Some(data),
            error: None,
        }))
    }

    fn begin_timer(&mut self) -> Result<(), DeviceError> {
        if self.timer.is_some() {
            return Err(DeviceError::Rejected("timer already running".into()));
        }
        self.timer = Some(Instant::now());
        Ok(())
    }

    fn end_timer(&mut self) -> Result<Box<dyn Fence>, DeviceError> {
        let started = self
            .timer
            .take()
            .ok_or_else(|| DeviceError::Rejected("no timer running".into()))?;
        let nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Ok(Box::new(SoftFence {
            remaining: self.options.fence_latency,
            data: Some(nanos.to_le_bytes().to_vec()),
            error: None,
        }))
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn check_status(&mut self) -> Option<StatusError> {
        self.status.pop_front()
    }
}

/// Readback that signals after a fixed number of polls.
struct SoftFence {
    remaining: u32,
    data: Option<Vec<u8>>,
    error: Option<String>,
}

impl SoftFence {
    fn failed(reason: &str) -> Self {
        Self {
            remaining: 0,
            data: None,
            error: Some(reason.to_string()),
        }
    }
}

impl Fence for SoftFence {
    fn poll(&mut self) -> FenceStatus {
        if let Some(e) = &self.error {
            return FenceStatus::Failed(e.clone());
        }
        if self.remaining > 0 {
            self.remaining -= 1;
            return FenceStatus::Pending;
        }
        match self.data.take() {
            Some(data) => FenceStatus::Ready(data),
            None => FenceStatus::Failed("fence already consumed".into()),
        }
    }

    fn cancel(&mut self) {
        self.data = None;
        self.error = Some("cancelled".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::{AttributeType, BufferUsage, PixelFormat, PixelType, Topology};
    use crate::device::VertexAttributeDesc;

    fn program(dev: &mut SoftDevice) -> SoftProgram {
        dev.create_program(&ProgramDesc {
            vertex: "vs",
            fragment: "fs",
            flags: &[],
            uniforms: &[],
            textures: &[],
            uniform_blocks: &[],
        })
        .unwrap()
    }

    fn read_all(dev: &mut SoftDevice) -> Vec<u8> {
        let (w, h) = dev.default_size();
        let mut fence = dev
            .read_pixels(&ReadOp {
                source: None,
                attachment: 0,
                rect: Rect::from_size(w, h),
                format: PixelFormat::Rgba,
                ty: PixelType::Uint8,
            })
            .unwrap();
        loop {
            match fence.poll() {
                FenceStatus::Pending => continue,
                FenceStatus::Ready(data) => return data,
                FenceStatus::Failed(e) => panic!("readback failed: {e}"),
            }
        }
    }

    fn small() -> SoftDevice {
        SoftDevice::new(SoftDeviceOptions {
            width: 4,
            height: 4,
            ..Default::default()
        })
    }

    #[test]
    fn clear_back_fills_default_framebuffer() {
        let mut dev = small();
        dev.clear(
            None,
            ClearOp::Color {
                index: None,
                value: ClearValue::Float([1.0, 0.0, 1.0, 1.0]),
            },
        )
        .unwrap();
        let px = read_all(&mut dev);
        assert_eq!(px.len(), 4 * 4 * 4);
        assert!(px.chunks(4).all(|p| p == [255, 0, 255, 255]));
    }

    #[test]
    fn fence_signals_after_latency() {
        let mut dev = SoftDevice::new(SoftDeviceOptions {
            width: 1,
            height: 1,
            fence_latency: 2,
            ..Default::default()
        });
        let mut fence = dev
            .read_pixels(&ReadOp {
                source: None,
                attachment: 0,
                rect: Rect::from_size(1, 1),
                format: PixelFormat::Rgba,
                ty: PixelType::Uint8,
            })
            .unwrap();
        assert_eq!(fence.poll(), FenceStatus::Pending);
        assert_eq!(fence.poll(), FenceStatus::Pending);
        assert_eq!(fence.poll(), FenceStatus::Ready(vec![0, 0, 0, 0]));
    }

    #[test]
    fn timer_spans_resolve_like_readbacks() {
        let mut dev = SoftDevice::new(SoftDeviceOptions {
            width: 1,
            height: 1,
            fence_latency: 1,
            ..Default::default()
        });
        assert!(dev.end_timer().is_err());
        dev.begin_timer().unwrap();
        assert!(dev.begin_timer().is_err());
        let mut fence = dev.end_timer().unwrap();
        assert_eq!(fence.poll(), FenceStatus::Pending);
        let FenceStatus::Ready(bytes) = fence.poll() else {
            panic!("timer fence did not signal");
        };
        assert_eq!(bytes.len(), 8);
        dev.begin_timer().unwrap();
    }

    #[test]
    fn cancelled_fence_never_resolves() {
        let mut dev = small();
        let mut fence = dev
            .read_pixels(&ReadOp {
                source: None,
                attachment: 0,
                rect: Rect::from_size(1, 1),
                format: PixelFormat::Rgba,
                ty: PixelType::Uint8,
            })
            .unwrap();
        fence.cancel();
        assert!(matches!(fence.poll(), FenceStatus::Failed(_)));
    }

    #[test]
    fn strip_draw_uses_attribute_default_colour() {
        let mut dev = small();
        let prog = program(&mut dev);
        let positions: Vec<u8> = [-1.0f32, -1.0, 3.0, -1.0, -1.0, 3.0]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();
        let buf = dev
            .create_buffer(&BufferDesc {
                size: positions.len() as u64,
                contents: Some(&positions),
                usage: BufferUsage::Static,
            })
            .unwrap();
        let va = dev
            .create_vertex_array(&VertexArrayDesc {
                attributes: vec![VertexAttributeDesc {
                    location: 0,
                    slot: 0,
                    components: 2,
                    ty: AttributeType::Float32,
                    normalized: false,
                    stride: 8,
                    offset: 0,
                    divisor: 0,
                }],
                slots: 1,
                indexed: false,
            })
            .unwrap();
        dev.set_state(&StateChange::AttributeDefault {
            index: 1,
            value: [0.0, 1.0, 0.0, 1.0],
        });

        let uniforms = Default::default();
        dev.draw(&DrawCall {
            program: &prog,
            uniforms: &uniforms,
            vertex_array: Some(&va),
            vertex_buffers: vec![&buf],
            index_buffer: None,
            textures: vec![],
            uniform_buffers: vec![],
            target: None,
            topology: Topology::TriangleStrip,
            range: DrawRange::Arrays {
                first: 0,
                count: 3,
                instances: 1,
            },
        })
        .unwrap();

        let px = read_all(&mut dev);
        assert!(px.chunks(4).all(|p| p == [0, 255, 0, 255]));
        assert_eq!(dev.check_status(), None);
    }

    #[test]
    fn out_of_range_fetch_flags_invalid_operation() {
        let mut dev = small();
        let prog = program(&mut dev);
        let buf = dev
            .create_buffer(&BufferDesc {
                size: 4,
                contents: None,
                usage: BufferUsage::Static,
            })
            .unwrap();
        let va = dev
            .create_vertex_array(&VertexArrayDesc {
                attributes: vec![VertexAttributeDesc {
                    location: 0,
                    slot: 0,
                    components: 4,
                    ty: AttributeType::Float32,
                    normalized: false,
                    stride: 16,
                    offset: 0,
                    divisor: 0,
                }],
                slots: 1,
                indexed: false,
            })
            .unwrap();
        let uniforms = Default::default();
        dev.draw(&DrawCall {
            program: &prog,
            uniforms: &uniforms,
            vertex_array: Some(&va),
            vertex_buffers: vec![&buf],
            index_buffer: None,
            textures: vec![],
            uniform_buffers: vec![],
            target: None,
            topology: Topology::Triangles,
            range: DrawRange::Arrays {
                first: 0,
                count: 3,
                instances: 1,
            },
        })
        .unwrap();
        assert_eq!(dev.check_status(), Some(StatusError::InvalidOperation));
        assert_eq!(dev.check_status(), None);
    }

    #[test]
    fn integer_clear_into_float_target_is_flagged() {
        let mut dev = small();
        dev.clear(
            None,
            ClearOp::Color {
                index: Some(0),
                value: ClearValue::Int([1, 2, 3, 4]),
            },
        )
        .unwrap();
        assert_eq!(dev.check_status(), Some(StatusError::InvalidOperation));
    }

    #[test]
    fn blit_scales_between_targets() {
        let mut dev = small();
        let tex = dev
            .create_texture(&TextureDesc {
                width: 2,
                height: 2,
                format: TextureFormat::Rgba8,
                data: Some(&[
                    255, 0, 0, 255, 0, 255, 0, 255, //
                    0, 0, 255, 255, 255, 255, 255, 255,
                ]),
            })
            .unwrap();
        let fb = dev
            .create_frame_target(&FrameTargetDesc {
                color: vec![AttachmentRef::Texture(&tex)],
                depth_stencil: None,
            })
            .unwrap();
        dev.blit(&BlitOp {
            src: Some(&fb),
            dst: None,
            src_rect: Rect::new(0, 0, 2, 2),
            dst_rect: Rect::new(0, 0, 4, 4),
            mask: Default::default(),
            filter: Filter::Nearest,
        })
        .unwrap();
        let px = read_all(&mut dev);
        // Bottom-left quadrant comes from texel (0, 0).
        assert_eq!(&px[0..4], &[255, 0, 0, 255]);
        // Top-right pixel comes from texel (1, 1).
        assert_eq!(&px[(3 * 4 + 3) * 4..], &[255, 255, 255, 255]);
    }

    #[test]
    fn blit_edges_past_i32_are_refused() {
        let mut dev = small();
        let blit = |dev: &mut SoftDevice, src_rect, dst_rect| {
            dev.blit(&BlitOp {
                src: None,
                dst: None,
                src_rect,
                dst_rect,
                mask: Default::default(),
                filter: Filter::Nearest,
            })
        };
        let err = blit(&mut dev, Rect::new(0, 0, 4, 4), Rect::new(0, i32::MAX, 4, 4));
        assert!(matches!(err, Err(DeviceError::Rejected(_))));
        let err = blit(&mut dev, Rect::new(i32::MAX - 1, 0, 4, 4), Rect::new(0, 0, 4, 4));
        assert!(matches!(err, Err(DeviceError::Rejected(_))));
        blit(&mut dev, Rect::new(0, 0, 4, 4), Rect::new(2, 2, 4, 4)).unwrap();
    }

    #[test]
    fn buffer_copy_and_bounds() {
        let mut dev = small();
        let a = dev
            .create_buffer(&BufferDesc {
                size: 4,
                contents: Some(&[1, 2, 3, 4]),
                usage: BufferUsage::Static,
            })
            .unwrap();
        let b = dev
            .create_buffer(&BufferDesc {
                size: 4,
                contents: None,
                usage: BufferUsage::Static,
            })
            .unwrap();
        dev.copy_buffer(&a, &b, 1, 0, 3).unwrap();
        assert_eq!(dev.buffers[b], vec![2, 3, 4, 0]);
        assert!(dev.copy_buffer(&a, &b, 2, 0, 3).is_err());
        assert!(dev.write_buffer(&b, 3, &[9, 9]).is_err());
    }

    #[test]
    fn empty_program_source_is_rejected() {
        let mut dev = small();
        let err = dev
            .create_program(&ProgramDesc {
                vertex: "  ",
                fragment: "fs",
                flags: &[],
                uniforms: &[],
                textures: &[],
                uniform_blocks: &[],
            })
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
