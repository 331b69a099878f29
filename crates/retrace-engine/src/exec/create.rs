//! Create, write and delete for every resource category.
//!
//! A create call validates everything and builds the device object before
//! it touches the table, so a failure leaves the table as it was.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::context::{
    BufferEntry, Context, FrameTargetEntry, ProgramEntry, RenderTargetEntry, ResourceTable,
    SamplerEntry, TextureEntry, VertexArrayEntry,
};
use crate::device::types::TextureFormat;
use crate::device::{
    AttachmentRef, BufferDesc, Device, DeviceError, FrameTargetDesc, Limits, ProgramDesc,
    TextureDesc, TextureRegion, VertexArrayDesc, VertexAttributeDesc,
};
use crate::error::{Error, Result};
use crate::handle::{
    BlobId, BufferId, FrameTargetId, ProgramId, RenderTargetId, ResourceKind, SamplerId,
    TextureId, VertexArrayId,
};

use super::params::{
    Attachment, BlobParams, BufferParams, FrameTargetParams, ProgramParams, RenderTargetParams,
    SamplerParams, TextureParams, VertexArrayParams, WriteBufferParams, WriteTextureParams,
};

fn creation(kind: ResourceKind, params: String) -> impl FnOnce(DeviceError) -> Error {
    move |e| Error::Creation {
        kind,
        params,
        reason: e.to_string(),
    }
}

fn check_len(what: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(Error::invalid(format!(
            "{what} data is {got} bytes, expected {expected}"
        )));
    }
    Ok(())
}

/// Resolves one attachment to its device object, extent and format.
fn attachment<D: Device>(
    table: &ResourceTable<D>,
    a: Attachment,
) -> Result<(AttachmentRef<'_, D>, u32, u32, TextureFormat)> {
    match a {
        Attachment::Texture(t) => {
            let e = table.textures.require(t)?;
            Ok((AttachmentRef::Texture(&e.texture), e.width, e.height, e.format))
        }
        Attachment::RenderTarget(r) => {
            let e = table.render_targets.require(r)?;
            Ok((
                AttachmentRef::RenderTarget(&e.target),
                e.desc.width,
                e.desc.height,
                e.desc.format,
            ))
        }
    }
}

impl<D: Device> Context<D> {
    /// Frame target that still has `a` attached, if any.
    fn attached_to(&self, a: Attachment) -> Option<u32> {
        self.table
            .frame_targets
            .iter()
            .find(|(_, e)| e.attachments.contains(&a))
            .map(|(id, _)| id)
    }

    fn check_detached(&self, a: Attachment) -> Result<()> {
        match self.attached_to(a) {
            Some(ft) => Err(Error::invalid(format!(
                "{a:?} is still attached to {}",
                FrameTargetId(ft)
            ))),
            None => Ok(()),
        }
    }

    pub(super) fn insert_program(&mut self, id: ProgramId, p: ProgramParams) -> Result<()> {
        self.table.programs.check_free(id)?;
        Limits::check(
            "maxCombinedTextureImageUnits",
            p.textures.len() as u64,
            u64::from(self.limits.max_texture_units),
        )?;
        Limits::check(
            "maxUniformBufferBindings",
            p.uniform_blocks.len() as u64,
            u64::from(self.limits.max_uniform_buffer_bindings),
        )?;

        let desc = ProgramDesc {
            vertex: &p.vertex,
            fragment: &p.fragment,
            flags: &p.flags,
            uniforms: &p.uniforms,
            textures: &p.textures,
            uniform_blocks: &p.uniform_blocks,
        };
        let program = self
            .programs
            .get_or_create(&mut self.device, &desc)
            .map_err(creation(
                ResourceKind::Program,
                format!("flags {:?}, {} uniforms", p.flags, p.uniforms.len()),
            ))?;

        log::debug!("created {id}");
        self.table.programs.insert(
            id,
            ProgramEntry {
                program,
                uniforms: p.uniforms,
                textures: p.textures,
                uniform_blocks: p.uniform_blocks,
                values: BTreeMap::new(),
            },
        );
        Ok(())
    }

    pub(super) fn remove_program(&mut self, id: ProgramId) -> Result<()> {
        let entry = self.table.programs.remove(id)?;
        if self.state.program == Some(id) {
            self.state.program = None;
        }
        drop(entry);
        let evicted = self.programs.evict_unused(&mut self.device);
        log::debug!("deleted {id} ({evicted} linked programs released)");
        Ok(())
    }

    pub(super) fn insert_buffer(&mut self, id: BufferId, p: BufferParams) -> Result<()> {
        self.table.buffers.check_free(id)?;
        let (buffer, size) = {
            let data = match &p.data {
                Some(src) => Some(src.resolve(&self.table)?),
                None => None,
            };
            let len = data.as_ref().map(|d| d.len() as u64);
            let size = match (p.size, len) {
                (Some(size), _) => size,
                (None, Some(len)) => len,
                (None, None) => return Err(Error::invalid("buffer needs `data` or `size`")),
            };
            if let Some(len) = len.filter(|&len| len > size) {
                return Err(Error::invalid(format!(
                    "{len} bytes of data exceed buffer size {size}"
                )));
            }
            Limits::check("maxBufferSize", size, self.limits.max_buffer_size)?;

            let buffer = self
                .device
                .create_buffer(&BufferDesc {
                    size,
                    contents: data.as_ref().map(|d| d.bytes()),
                    usage: p.usage,
                })
                .map_err(creation(
                    ResourceKind::Buffer,
                    format!("{size} bytes, {:?}", p.usage),
                ))?;
            (buffer, size)
        };

        log::debug!("created {id} ({size} bytes)");
        self.table.buffers.insert(id, BufferEntry { buffer, size });
        Ok(())
    }

    pub(super) fn update_buffer(&mut self, id: BufferId, p: WriteBufferParams) -> Result<()> {
        let entry = self.table.buffers.require(id)?;
        let data = p.data.resolve(&self.table)?;
        let end = p.offset.checked_add(data.len() as u64);
        if end.is_none_or(|end| end > entry.size) {
            return Err(Error::invalid(format!(
                "write of {} bytes at {} overruns {id} ({} bytes)",
                data.len(),
                p.offset,
                entry.size
            )));
        }
        self.device.write_buffer(&entry.buffer, p.offset, data.bytes())?;
        Ok(())
    }

    pub(super) fn remove_buffer(&mut self, id: BufferId) -> Result<()> {
        self.table.buffers.require(id)?;
        let user = self
            .table
            .vertex_arrays
            .iter()
            .find(|(_, e)| e.buffers.contains(&id) || e.indices == Some(id));
        if let Some((va, _)) = user {
            return Err(Error::invalid(format!(
                "{id} is still used by {}",
                VertexArrayId(va)
            )));
        }
        let entry = self.table.buffers.remove(id)?;
        for slot in &mut self.state.uniform_buffers {
            if slot.is_some_and(|b| b.buffer == id) {
                *slot = None;
            }
        }
        self.device.destroy_buffer(entry.buffer);
        log::debug!("deleted {id}");
        Ok(())
    }

    pub(super) fn insert_vertex_array(
        &mut self,
        id: VertexArrayId,
        p: VertexArrayParams,
    ) -> Result<()> {
        self.table.vertex_arrays.check_free(id)?;
        let mut buffers: Vec<BufferId> = Vec::new();
        let mut attributes: Vec<VertexAttributeDesc> = Vec::with_capacity(p.attributes.len());
        for a in &p.attributes {
            Limits::check(
                "maxVertexAttribs",
                u64::from(a.location) + 1,
                u64::from(self.limits.max_vertex_attributes),
            )?;
            if !(1..=4).contains(&a.size) {
                return Err(Error::invalid(format!(
                    "attribute {} has {} components",
                    a.location, a.size
                )));
            }
            if attributes.iter().any(|d| d.location == a.location) {
                return Err(Error::invalid(format!(
                    "attribute location {} given twice",
                    a.location
                )));
            }
            self.table.buffers.require(a.buffer)?;

            let slot = match buffers.iter().position(|b| *b == a.buffer) {
                Some(slot) => slot,
                None => {
                    buffers.push(a.buffer);
                    buffers.len() - 1
                }
            };
            let stride = match a.stride {
                0 => u32::from(a.size) * a.ty.size() as u32,
                s => s,
            };
            attributes.push(VertexAttributeDesc {
                location: a.location,
                slot,
                components: a.size,
                ty: a.ty,
                normalized: a.normalized,
                stride,
                offset: a.offset,
                divisor: a.divisor,
            });
        }
        if let Some(indices) = p.indices {
            self.table.buffers.require(indices)?;
        }

        let desc = VertexArrayDesc {
            attributes,
            slots: buffers.len(),
            indexed: p.indices.is_some(),
        };
        let vertex_array = self.device.create_vertex_array(&desc).map_err(creation(
            ResourceKind::VertexArray,
            format!("{} attributes over {} buffers", desc.attributes.len(), desc.slots),
        ))?;

        log::debug!("created {id}");
        self.table.vertex_arrays.insert(
            id,
            VertexArrayEntry {
                vertex_array,
                buffers,
                indices: p.indices,
            },
        );
        Ok(())
    }

    pub(super) fn remove_vertex_array(&mut self, id: VertexArrayId) -> Result<()> {
        let entry = self.table.vertex_arrays.remove(id)?;
        if self.state.vertex_array == Some(id) {
            self.state.vertex_array = None;
        }
        self.device.destroy_vertex_array(entry.vertex_array);
        log::debug!("deleted {id}");
        Ok(())
    }

    pub(super) fn insert_sampler(&mut self, id: SamplerId, desc: SamplerParams) -> Result<()> {
        self.table.samplers.check_free(id)?;
        let sampler = self
            .device
            .create_sampler(&desc)
            .map_err(creation(ResourceKind::Sampler, format!("{desc:?}")))?;
        log::debug!("created {id}");
        self.table.samplers.insert(id, SamplerEntry { sampler, desc });
        Ok(())
    }

    pub(super) fn remove_sampler(&mut self, id: SamplerId) -> Result<()> {
        let entry = self.table.samplers.remove(id)?;
        for binding in self.state.textures.iter_mut().flatten() {
            if binding.sampler == Some(id) {
                binding.sampler = None;
            }
        }
        self.device.destroy_sampler(entry.sampler);
        log::debug!("deleted {id}");
        Ok(())
    }

    pub(super) fn insert_texture(&mut self, id: TextureId, p: TextureParams) -> Result<()> {
        self.table.textures.check_free(id)?;
        self.limits.check_texture_size(p.width, p.height)?;
        if p.width == 0 || p.height == 0 {
            return Err(Error::invalid(format!(
                "texture size {}x{} is empty",
                p.width, p.height
            )));
        }
        let params = format!("{}x{} {:?}", p.width, p.height, p.format);
        let texture = {
            let data = match &p.data {
                Some(src) => Some(src.resolve(&self.table)?),
                None => None,
            };
            if let Some(d) = &data {
                let expected = p.width as usize * p.height as usize * p.format.texel_size();
                check_len("texture", d.len(), expected)?;
            }
            self.device
                .create_texture(&TextureDesc {
                    width: p.width,
                    height: p.height,
                    format: p.format,
                    data: data.as_ref().map(|d| d.bytes()),
                })
                .map_err(creation(ResourceKind::Texture, params.clone()))?
        };

        log::debug!("created {id} ({params})");
        self.table.textures.insert(
            id,
            TextureEntry {
                texture,
                width: p.width,
                height: p.height,
                format: p.format,
            },
        );
        Ok(())
    }

    pub(super) fn update_texture(&mut self, id: TextureId, p: WriteTextureParams) -> Result<()> {
        let entry = self.table.textures.require(id)?;
        let fits = u64::from(p.x) + u64::from(p.width) <= u64::from(entry.width)
            && u64::from(p.y) + u64::from(p.height) <= u64::from(entry.height);
        if !fits {
            return Err(Error::invalid(format!(
                "region {}x{} at ({}, {}) outside {id} ({}x{})",
                p.width, p.height, p.x, p.y, entry.width, entry.height
            )));
        }
        let data = p.data.resolve(&self.table)?;
        let expected = p.width as usize * p.height as usize * entry.format.texel_size();
        check_len("texture region", data.len(), expected)?;
        self.device.write_texture(
            &entry.texture,
            TextureRegion {
                x: p.x,
                y: p.y,
                width: p.width,
                height: p.height,
            },
            data.bytes(),
        )?;
        Ok(())
    }

    pub(super) fn remove_texture(&mut self, id: TextureId) -> Result<()> {
        self.table.textures.require(id)?;
        self.check_detached(Attachment::Texture(id))?;
        let entry = self.table.textures.remove(id)?;
        for slot in &mut self.state.textures {
            if slot.is_some_and(|b| b.texture == id) {
                *slot = None;
            }
        }
        self.device.destroy_texture(entry.texture);
        log::debug!("deleted {id}");
        Ok(())
    }

    pub(super) fn insert_render_target(
        &mut self,
        id: RenderTargetId,
        desc: RenderTargetParams,
    ) -> Result<()> {
        self.table.render_targets.check_free(id)?;
        self.limits.check_renderbuffer_size(desc.width, desc.height)?;
        if desc.width == 0 || desc.height == 0 || desc.samples == 0 {
            return Err(Error::invalid(format!(
                "render target {}x{} with {} samples",
                desc.width, desc.height, desc.samples
            )));
        }
        Limits::check(
            "maxSamples",
            u64::from(desc.samples),
            u64::from(self.limits.max_samples),
        )?;
        let target = self.device.create_render_target(&desc).map_err(creation(
            ResourceKind::RenderTarget,
            format!("{}x{} {:?} x{}", desc.width, desc.height, desc.format, desc.samples),
        ))?;
        log::debug!("created {id}");
        self.table
            .render_targets
            .insert(id, RenderTargetEntry { target, desc });
        Ok(())
    }

    pub(super) fn remove_render_target(&mut self, id: RenderTargetId) -> Result<()> {
        self.table.render_targets.require(id)?;
        self.check_detached(Attachment::RenderTarget(id))?;
        let entry = self.table.render_targets.remove(id)?;
        self.device.destroy_render_target(entry.target);
        log::debug!("deleted {id}");
        Ok(())
    }

    pub(super) fn insert_frame_target(
        &mut self,
        id: FrameTargetId,
        p: FrameTargetParams,
    ) -> Result<()> {
        self.table.frame_targets.check_free(id)?;
        Limits::check(
            "maxColorAttachments",
            p.color.len() as u64,
            u64::from(self.limits.max_color_attachments),
        )?;
        if p.color.is_empty() && p.depth_stencil.is_none() {
            return Err(Error::invalid("frame target has no attachments"));
        }

        let mut extent = (u32::MAX, u32::MAX);
        let mut color = Vec::with_capacity(p.color.len());
        let mut colors = Vec::with_capacity(p.color.len());
        for a in &p.color {
            let (r, w, h, format) = attachment(&self.table, *a)?;
            if !format.is_color() {
                return Err(Error::invalid(format!(
                    "{a:?} ({format:?}) cannot be a colour attachment"
                )));
            }
            extent = (extent.0.min(w), extent.1.min(h));
            color.push(r);
            colors.push(format);
        }
        let depth_stencil = match p.depth_stencil {
            Some(a) => {
                let (r, w, h, format) = attachment(&self.table, a)?;
                if !format.has_depth() && !format.has_stencil() {
                    return Err(Error::invalid(format!(
                        "{a:?} ({format:?}) cannot be a depth-stencil attachment"
                    )));
                }
                extent = (extent.0.min(w), extent.1.min(h));
                Some((r, format))
            }
            None => None,
        };
        let ds_format = depth_stencil.as_ref().map(|(_, f)| *f);

        let desc = FrameTargetDesc {
            color,
            depth_stencil: depth_stencil.map(|(r, _)| r),
        };
        let target = self.device.create_frame_target(&desc).map_err(creation(
            ResourceKind::FrameTarget,
            format!("{:?} + {:?}", p.color, p.depth_stencil),
        ))?;

        let mut attachments = p.color;
        attachments.extend(p.depth_stencil);
        log::debug!("created {id} ({}x{})", extent.0, extent.1);
        self.table.frame_targets.insert(
            id,
            FrameTargetEntry {
                target,
                attachments,
                width: extent.0,
                height: extent.1,
                colors,
                depth_stencil: ds_format,
            },
        );
        Ok(())
    }

    pub(super) fn remove_frame_target(&mut self, id: FrameTargetId) -> Result<()> {
        let entry = self.table.frame_targets.remove(id)?;
        if self.state.frame_target == Some(id) {
            self.state.frame_target = None;
        }
        self.device.destroy_frame_target(entry.target);
        log::debug!("deleted {id}");
        Ok(())
    }

    pub(super) fn insert_blob(&mut self, id: BlobId, p: BlobParams) -> Result<()> {
        self.table.blobs.check_free(id)?;
        let bytes = Bytes::from(p.data.resolve(&self.table)?.into_bytes().into_owned());
        log::debug!("created {id} ({} bytes)", bytes.len());
        self.table.blobs.insert(id, bytes);
        Ok(())
    }

    pub(super) fn remove_blob(&mut self, id: BlobId) -> Result<()> {
        self.table.blobs.remove(id)?;
        log::debug!("deleted {id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::BinarySource;
    use crate::device::types::RenderTargetDesc;
    use crate::device::{SoftDevice, SoftDeviceOptions};
    use crate::exec::{AttributeParams, ExecutorExt};
    use crate::state::{StateUpdate, UniformBufferBinding};
    use proptest::prelude::*;

    fn context() -> Context<SoftDevice> {
        Context::new(SoftDevice::new(SoftDeviceOptions {
            width: 4,
            height: 4,
            ..Default::default()
        }))
    }

    fn texture(width: u32, height: u32) -> TextureParams {
        TextureParams {
            width,
            height,
            format: TextureFormat::Rgba8,
            data: None,
        }
    }

    #[test]
    fn live_handle_is_rejected() {
        let mut ctx = context();
        ctx.create_texture(TextureId(0), texture(2, 2)).unwrap();
        let err = ctx.create_texture(TextureId(0), texture(2, 2)).unwrap_err();
        assert!(matches!(err, Error::HandleInUse { handle: 0, .. }));
        assert_eq!(ctx.reserve::<TextureId>().unwrap(), TextureId(1));
    }

    #[test]
    fn handle_beyond_the_table_bound_is_refused() {
        let mut ctx = context();
        let err = ctx
            .create_buffer(
                BufferId(4_000_000_000),
                BufferParams::with_data(BinarySource::floats(&[1.0])),
            )
            .unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { limit: "maxHandles", .. }), "{err}");
        assert!(ctx.table().is_empty());
        assert_eq!(ctx.device().object_count(), 0);
    }

    #[test]
    fn failed_create_leaves_the_table_alone() {
        let mut ctx = context();
        let err = ctx
            .create_program(
                ProgramId(0),
                ProgramParams {
                    vertex: String::new(),
                    fragment: "f".into(),
                    flags: Vec::new(),
                    uniforms: Vec::new(),
                    textures: Vec::new(),
                    uniform_blocks: Vec::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Creation { kind: ResourceKind::Program, .. }), "{err}");
        assert!(ctx.table().is_empty());
        assert!(ctx.program_cache().is_empty());
    }

    #[test]
    fn buffer_size_comes_from_data() {
        let mut ctx = context();
        ctx.create_buffer(
            BufferId(0),
            BufferParams::with_data(BinarySource::floats(&[1.0, 2.0, 3.0])),
        )
        .unwrap();
        assert_eq!(ctx.table().buffers().require(BufferId(0)).unwrap().size, 12);

        let err = ctx
            .create_buffer(
                BufferId(1),
                BufferParams {
                    data: Some(BinarySource::raw(vec![0; 8])),
                    size: Some(4),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn write_past_the_end_is_rejected() {
        let mut ctx = context();
        let buf = ctx
            .create_buffer(
                BufferId(0),
                BufferParams {
                    size: Some(8),
                    ..Default::default()
                },
            )
            .unwrap();
        let write = |offset| WriteBufferParams {
            offset,
            data: BinarySource::floats(&[1.0]),
        };
        ctx.write_buffer(buf, write(4)).unwrap();
        for offset in [5, u64::MAX - 2, u64::MAX] {
            assert!(matches!(
                ctx.write_buffer(buf, write(offset)),
                Err(Error::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn texture_data_must_match_its_size() {
        let mut ctx = context();
        let err = ctx
            .create_texture(
                TextureId(0),
                TextureParams {
                    data: Some(BinarySource::raw(vec![0; 15])),
                    ..texture(2, 2)
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
    }

    #[test]
    fn texture_region_must_fit() {
        let mut ctx = context();
        let tex = ctx.create_texture(TextureId(0), texture(4, 4)).unwrap();
        let region = |x, width| WriteTextureParams {
            x,
            y: 1,
            width,
            height: 2,
            data: BinarySource::raw(vec![0xff; width as usize * 2 * 4]),
        };
        ctx.write_texture(tex, region(1, 3)).unwrap();
        assert!(matches!(
            ctx.write_texture(tex, region(2, 3)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn attached_texture_cannot_be_deleted() {
        let mut ctx = context();
        let tex = ctx.create_texture(TextureId(0), texture(4, 2)).unwrap();
        let depth = ctx
            .create_render_target(
                RenderTargetId(0),
                RenderTargetDesc {
                    width: 2,
                    height: 2,
                    format: TextureFormat::Depth24Stencil8,
                    samples: 1,
                },
            )
            .unwrap();
        let ft = ctx
            .create_frame_target(
                FrameTargetId(0),
                FrameTargetParams {
                    color: vec![Attachment::Texture(tex)],
                    depth_stencil: Some(Attachment::RenderTarget(depth)),
                },
            )
            .unwrap();
        let entry = ctx.table().frame_targets().require(ft).unwrap();
        assert_eq!((entry.width, entry.height), (2, 2));

        assert!(matches!(
            ctx.delete_texture(tex),
            Err(Error::InvalidArgument(_))
        ));
        ctx.delete_frame_target(ft).unwrap();
        ctx.delete_texture(tex).unwrap();
        ctx.delete_render_target(depth).unwrap();
        assert!(ctx.table().is_empty());
    }

    #[test]
    fn depth_texture_is_not_a_colour_attachment() {
        let mut ctx = context();
        let tex = ctx
            .create_texture(
                TextureId(0),
                TextureParams {
                    format: TextureFormat::Depth32f,
                    ..texture(2, 2)
                },
            )
            .unwrap();
        let err = ctx
            .create_frame_target(
                FrameTargetId(0),
                FrameTargetParams {
                    color: vec![Attachment::Texture(tex)],
                    depth_stencil: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn deleting_a_bound_buffer_unbinds_it() {
        let mut ctx = context();
        let buf = ctx
            .create_buffer(
                BufferId(0),
                BufferParams {
                    size: Some(64),
                    ..Default::default()
                },
            )
            .unwrap();
        ctx.state(StateUpdate {
            uniform_buffers: Some(vec![Some(UniformBufferBinding {
                buffer: buf,
                offset: 0,
                size: None,
            })]),
            ..Default::default()
        })
        .unwrap();
        assert!(ctx.descriptor().uniform_buffers[0].is_some());

        ctx.delete_buffer(buf).unwrap();
        assert!(ctx.descriptor().uniform_buffers[0].is_none());
        assert!(matches!(
            ctx.delete_buffer(buf),
            Err(Error::InvalidHandle { kind: ResourceKind::Buffer, handle: 0 })
        ));
    }

    #[test]
    fn buffer_behind_a_vertex_array_cannot_be_deleted() {
        let mut ctx = context();
        let buf = ctx
            .create_buffer(
                BufferId(0),
                BufferParams::with_data(BinarySource::floats(&[0.0; 6])),
            )
            .unwrap();
        let va = ctx
            .create_vertex_array(
                VertexArrayId(0),
                VertexArrayParams {
                    attributes: vec![AttributeParams::floats(0, buf, 2)],
                    indices: None,
                },
            )
            .unwrap();

        let err = ctx.delete_buffer(buf).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
        assert_eq!(ctx.table().live_count(ResourceKind::Buffer), 1);
        assert!(matches!(
            ctx.create_buffer(buf, BufferParams::default()),
            Err(Error::HandleInUse { .. })
        ));

        ctx.delete_vertex_array(va).unwrap();
        ctx.delete_buffer(buf).unwrap();
    }

    #[test]
    fn vertex_array_rejects_bad_layouts() {
        let mut ctx = context();
        let buf = ctx
            .create_buffer(
                BufferId(0),
                BufferParams {
                    size: Some(64),
                    ..Default::default()
                },
            )
            .unwrap();
        let twice = VertexArrayParams {
            attributes: vec![
                AttributeParams::floats(0, buf, 2),
                AttributeParams::floats(0, buf, 2),
            ],
            indices: None,
        };
        assert!(ctx.create_vertex_array(VertexArrayId(0), twice).is_err());

        let missing = VertexArrayParams {
            attributes: vec![AttributeParams::floats(0, BufferId(5), 2)],
            indices: None,
        };
        assert!(matches!(
            ctx.create_vertex_array(VertexArrayId(0), missing),
            Err(Error::InvalidHandle { handle: 5, .. })
        ));
        assert_eq!(ctx.table().live_count(ResourceKind::VertexArray), 0);
    }

    proptest! {
        #[test]
        fn writes_land_inside_the_buffer_or_fail(offset in any::<u64>(), len in 0usize..32) {
            let mut ctx = context();
            let buf = ctx
                .create_buffer(
                    BufferId(0),
                    BufferParams {
                        size: Some(16),
                        ..Default::default()
                    },
                )
                .unwrap();
            let fits = offset.checked_add(len as u64).is_some_and(|end| end <= 16);
            let result = ctx.write_buffer(
                buf,
                WriteBufferParams {
                    offset,
                    data: BinarySource::raw(vec![7; len]),
                },
            );
            match result {
                Ok(()) => prop_assert!(fits),
                Err(e) => prop_assert!(!fits && matches!(e, Error::InvalidArgument(_)), "{e}"),
            }
        }
    }
}
