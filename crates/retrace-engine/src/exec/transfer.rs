//! Blits, buffer copies and readbacks.

use crate::context::{Context, ResourceTable};
use crate::device::types::Rect;
use crate::device::{BlitOp, Device, ReadOp};
use crate::error::{Error, Result};
use crate::handle::FrameTargetId;
use crate::poll::{AsyncResult, PixelBuffer};

use super::params::{BlitParams, CopyParams, ReadPixelsParams};

fn check_rect(what: &str, rect: Rect) -> Result<()> {
    if rect.width < 0 || rect.height < 0 {
        return Err(Error::invalid(format!("{what} has negative size: {rect:?}")));
    }
    if rect.checked_end().is_none() {
        return Err(Error::invalid(format!("{what} extends past i32: {rect:?}")));
    }
    Ok(())
}

fn frame_target<D: Device>(
    table: &ResourceTable<D>,
    target: Option<FrameTargetId>,
) -> Result<Option<&D::FrameTarget>> {
    match target {
        Some(id) => Ok(Some(&table.frame_targets.require(id)?.target)),
        None => Ok(None),
    }
}

impl<D: Device> Context<D> {
    /// Full extent of a frame target, or of the default framebuffer.
    fn extent(&self, target: Option<FrameTargetId>) -> Result<Rect> {
        Ok(match target {
            Some(id) => {
                let e = self.table.frame_targets.require(id)?;
                Rect::from_size(e.width, e.height)
            }
            None => Rect::from_size(self.default_size.0, self.default_size.1),
        })
    }

    pub(super) fn blit_region(&mut self, p: &BlitParams) -> Result<()> {
        let src_rect = match p.src_rect {
            Some(r) => r,
            None => self.extent(p.src)?,
        };
        let dst_rect = match p.dst_rect {
            Some(r) => r,
            None => self.extent(p.dst)?,
        };
        check_rect("srcRect", src_rect)?;
        check_rect("dstRect", dst_rect)?;
        if !(p.mask.color || p.mask.depth || p.mask.stencil) {
            return Ok(());
        }

        let op = BlitOp {
            src: frame_target(&self.table, p.src)?,
            dst: frame_target(&self.table, p.dst)?,
            src_rect,
            dst_rect,
            mask: p.mask,
            filter: p.filter,
        };
        log::trace!("blit {src_rect:?} -> {dst_rect:?}");
        self.device.blit(&op)?;
        Ok(())
    }

    pub(super) fn copy_range(&mut self, p: &CopyParams) -> Result<()> {
        let src = self.table.buffers.require(p.src)?;
        let dst = self.table.buffers.require(p.dst)?;
        if p.src_offset > src.size {
            return Err(Error::invalid(format!(
                "srcOffset {} is past the end of buffer {} ({} bytes)",
                p.src_offset, p.src.0, src.size
            )));
        }
        let size = p.size.unwrap_or(src.size - p.src_offset);
        let src_end = p.src_offset.checked_add(size);
        let dst_end = p.dst_offset.checked_add(size);
        if src_end.is_none_or(|end| end > src.size) || dst_end.is_none_or(|end| end > dst.size) {
            return Err(Error::invalid(format!(
                "copy of {size} bytes from {}+{} to {}+{} is out of range",
                p.src.0, p.src_offset, p.dst.0, p.dst_offset
            )));
        }
        let overlaps = p.src_offset < p.dst_offset + size && p.dst_offset < p.src_offset + size;
        if p.src == p.dst && overlaps {
            return Err(Error::invalid("copy source and destination ranges overlap"));
        }
        if size == 0 {
            return Ok(());
        }
        self.device
            .copy_buffer(&src.buffer, &dst.buffer, p.src_offset, p.dst_offset, size)?;
        Ok(())
    }

    /// Issues a readback and returns at once. The result is registered with
    /// the context so that dispose can cancel it.
    pub(super) fn start_readback(
        &mut self,
        p: &ReadPixelsParams,
    ) -> Result<AsyncResult<PixelBuffer>> {
        let full = self.extent(p.source)?;
        let rect = p.rect.unwrap_or(full);
        check_rect("rect", rect)?;
        let inside = rect.x >= 0
            && rect.y >= 0
            && rect
                .checked_end()
                .is_some_and(|(x1, y1)| x1 <= full.width && y1 <= full.height);
        if !inside {
            return Err(Error::invalid(format!(
                "read rect {rect:?} is outside the source ({}x{})",
                full.width, full.height
            )));
        }
        if p.attachment >= self.limits.max_color_attachments {
            return Err(Error::LimitExceeded {
                limit: "maxColorAttachments",
                requested: u64::from(p.attachment) + 1,
                max: u64::from(self.limits.max_color_attachments),
            });
        }

        let op = ReadOp {
            source: frame_target(&self.table, p.source)?,
            attachment: p.attachment,
            rect,
            format: p.format,
            ty: p.ty,
        };
        let fence = self.device.read_pixels(&op)?;

        let (width, height) = (rect.width as u32, rect.height as u32);
        let (format, ty) = (p.format, p.ty);
        let result = AsyncResult::new(fence, move |data| PixelBuffer {
            width,
            height,
            format,
            ty,
            data,
        });
        self.pending.register(&result);
        log::trace!("readback {rect:?} {format:?}/{ty:?} issued");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::BinarySource;
    use crate::device::{SoftDevice, SoftDeviceOptions};
    use crate::exec::{BufferParams, ExecutorExt, WriteBufferParams};
    use crate::handle::BufferId;
    use proptest::prelude::*;

    fn context() -> Context<SoftDevice> {
        Context::new(SoftDevice::new(SoftDeviceOptions {
            width: 8,
            height: 4,
            ..Default::default()
        }))
    }

    fn buffer(ctx: &mut Context<SoftDevice>, id: u32, size: u64) -> BufferId {
        ctx.create_buffer(
            BufferId(id),
            BufferParams {
                size: Some(size),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn copy_defaults_to_rest_of_source() {
        let mut ctx = context();
        let a = buffer(&mut ctx, 0, 8);
        let b = buffer(&mut ctx, 1, 8);
        ctx.write_buffer(
            a,
            WriteBufferParams {
                offset: 0,
                data: BinarySource::Raw((0u8..8).collect::<Vec<_>>().into()),
            },
        )
        .unwrap();
        ctx.copy(CopyParams {
            src: a,
            dst: b,
            src_offset: 4,
            dst_offset: 0,
            size: None,
        })
        .unwrap();

        let err = ctx
            .copy(CopyParams {
                src: a,
                dst: b,
                src_offset: 0,
                dst_offset: 4,
                size: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
    }

    #[test]
    fn overlapping_self_copy_is_rejected() {
        let mut ctx = context();
        let a = buffer(&mut ctx, 0, 16);
        let copy = |src_offset, dst_offset| CopyParams {
            src: a,
            dst: a,
            src_offset,
            dst_offset,
            size: Some(8),
        };
        assert!(ctx.copy(copy(0, 4)).is_err());
        ctx.copy(copy(0, 8)).unwrap();
    }

    #[test]
    fn readback_defaults_to_full_target() {
        let mut ctx = context();
        let read = ctx.read_pixels(ReadPixelsParams::default()).unwrap();
        assert_eq!(ctx.pending_count(), 1);
        while !read.poll() {}
        let pixels = read.take().unwrap().unwrap();
        assert_eq!((pixels.width, pixels.height), (8, 4));
        assert_eq!(pixels.data.len(), 8 * 4 * 4);
        assert_eq!(ctx.pending_count(), 0);
    }

    #[test]
    fn readback_outside_source_is_rejected() {
        let mut ctx = context();
        let err = ctx
            .read_pixels(ReadPixelsParams {
                rect: Some(Rect::new(6, 0, 4, 4)),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
    }

    #[test]
    fn rect_edges_past_i32_are_rejected() {
        let mut ctx = context();
        let err = ctx
            .read_pixels(ReadPixelsParams {
                rect: Some(Rect::new(1, 0, i32::MAX, 1)),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
        assert_eq!(ctx.pending_count(), 0);

        let err = ctx
            .blit(BlitParams {
                dst_rect: Some(Rect::new(0, i32::MAX, 4, 4)),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
    }

    #[test]
    fn wide_scissor_clear_stays_inside_the_target() {
        use crate::state::StateUpdate;

        let mut ctx = context();
        ctx.clear(crate::exec::ClearParams::back([0.0, 0.0, 0.0, 1.0]))
            .unwrap();
        ctx.state(StateUpdate {
            scissor_test: Some(true),
            scissor: Some(Rect::new(-8, 1, i32::MAX, 1)),
            ..Default::default()
        })
        .unwrap();
        ctx.clear(crate::exec::ClearParams::back([1.0, 1.0, 1.0, 1.0]))
            .unwrap();
        let read = ctx.read_pixels(ReadPixelsParams::default()).unwrap();
        while !read.poll() {}
        let pixels = read.take().unwrap().unwrap();
        assert_eq!(pixels.pixel(7, 1), &[255, 255, 255, 255]);
        assert_eq!(pixels.pixel(7, 2), &[0, 0, 0, 255]);
    }

    #[test]
    fn empty_blit_mask_is_a_no_op() {
        let mut ctx = context();
        let mut p = BlitParams::default();
        p.mask.color = false;
        ctx.blit(p).unwrap();
    }

    proptest! {
        #[test]
        fn read_rects_are_checked_before_the_device(
            x in any::<i32>(),
            y in any::<i32>(),
            width in any::<i32>(),
            height in any::<i32>(),
        ) {
            let mut ctx = context();
            let rect = Rect::new(x, y, width, height);
            let inside = x >= 0
                && y >= 0
                && width >= 0
                && height >= 0
                && i64::from(x) + i64::from(width) <= 8
                && i64::from(y) + i64::from(height) <= 4;
            let result = ctx.read_pixels(ReadPixelsParams {
                rect: Some(rect),
                ..Default::default()
            });
            match result {
                Ok(read) => {
                    prop_assert!(inside);
                    read.dispose();
                }
                Err(e) => prop_assert!(!inside && matches!(e, Error::InvalidArgument(_)), "{e}"),
            }
        }

        #[test]
        fn blit_rects_never_reach_past_i32(
            x in any::<i32>(),
            y in any::<i32>(),
            width in 0..=i32::MAX,
            height in 0..=i32::MAX,
        ) {
            let rect = Rect::new(x, y, width, height);
            if rect.checked_end().is_some() {
                return Ok(());
            }
            let mut ctx = context();
            let result = ctx.blit(BlitParams {
                dst_rect: Some(rect),
                ..Default::default()
            });
            prop_assert!(matches!(result, Err(Error::InvalidArgument(_))));
        }
    }
}
