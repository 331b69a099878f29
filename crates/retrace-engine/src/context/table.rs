//! The resource table: one handle-indexed slot array per category.

use std::collections::BTreeMap;
use std::rc::Rc;

use bytes::Bytes;

use crate::binary::BlobLookup;
use crate::device::Device;
use crate::device::types::{RenderTargetDesc, SamplerDesc, TextureFormat, UniformDecl, UniformValue};
use crate::error::{Error, Result};
use crate::exec::Attachment;
use crate::handle::{BlobId, BufferId, Handle, HandleAllocator, MAX_HANDLES, ResourceKind};

/// Allocator plus the objects its handles name.
///
/// A slot is written only after the object behind it exists, so a failed
/// create leaves the array untouched.
pub struct Slots<T> {
    alloc: HandleAllocator,
    items: Vec<Option<T>>,
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self {
            alloc: HandleAllocator::new(),
            items: Vec::new(),
        }
    }
}

impl<T> Slots<T> {
    pub fn get<H: Handle>(&self, handle: H) -> Option<&T> {
        self.items.get(handle.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut<H: Handle>(&mut self, handle: H) -> Option<&mut T> {
        self.items.get_mut(handle.index()).and_then(Option::as_mut)
    }

    /// Like [`Slots::get`], but a missing object is an [`Error::InvalidHandle`].
    pub fn require<H: Handle>(&self, handle: H) -> Result<&T> {
        self.get(handle).ok_or(Error::InvalidHandle {
            kind: H::KIND,
            handle: handle.raw(),
        })
    }

    pub(crate) fn require_mut<H: Handle>(&mut self, handle: H) -> Result<&mut T> {
        self.get_mut(handle).ok_or(Error::InvalidHandle {
            kind: H::KIND,
            handle: handle.raw(),
        })
    }

    /// Fails with [`Error::HandleInUse`] when `handle` names a live object,
    /// and with [`Error::LimitExceeded`] when it is not below [`MAX_HANDLES`].
    pub(crate) fn check_free<H: Handle>(&self, handle: H) -> Result<()> {
        if handle.raw() >= MAX_HANDLES {
            return Err(Error::LimitExceeded {
                limit: "maxHandles",
                requested: u64::from(handle.raw()) + 1,
                max: u64::from(MAX_HANDLES),
            });
        }
        if self.alloc.is_occupied(handle.raw()) {
            return Err(Error::HandleInUse {
                kind: H::KIND,
                handle: handle.raw(),
            });
        }
        Ok(())
    }

    pub(crate) fn insert<H: Handle>(&mut self, handle: H, item: T) {
        let claimed = self.alloc.claim(handle.raw());
        debug_assert!(claimed, "insert into live slot {handle:?}");
        let i = handle.index();
        if self.items.len() <= i {
            self.items.resize_with(i + 1, || None);
        }
        self.items[i] = Some(item);
    }

    /// Empties the slot. A double free is logged and reported as
    /// [`Error::InvalidHandle`].
    pub(crate) fn remove<H: Handle>(&mut self, handle: H) -> Result<T> {
        let item = self.items.get_mut(handle.index()).and_then(Option::take);
        match item {
            Some(item) => {
                self.alloc.free(handle.raw());
                while matches!(self.items.last(), Some(None)) {
                    self.items.pop();
                }
                Ok(item)
            }
            None => {
                log::error!("delete of dead {} handle {}", H::KIND, handle.raw());
                Err(Error::InvalidHandle {
                    kind: H::KIND,
                    handle: handle.raw(),
                })
            }
        }
    }

    /// Lowest handle a create call could use right now.
    pub fn next_free(&self) -> u32 {
        self.alloc.peek()
    }

    pub fn live_count(&self) -> usize {
        self.alloc.live_count()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Length of the backing array, trailing empty slots excluded.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.as_ref().map(|item| (i as u32, item)))
    }

    /// Removes every object, lowest handle first.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        self.alloc.clear();
        std::mem::take(&mut self.items).into_iter().flatten().collect()
    }
}

pub struct ProgramEntry<D: Device> {
    pub(crate) program: Rc<D::Program>,
    pub uniforms: Vec<UniformDecl>,
    pub textures: Vec<String>,
    pub uniform_blocks: Vec<String>,
    /// Uniform values last set while this program was bound.
    pub values: BTreeMap<String, UniformValue>,
}

impl<D: Device> ProgramEntry<D> {
    pub fn uniform(&self, name: &str) -> Option<&UniformDecl> {
        self.uniforms.iter().find(|u| u.name == name)
    }
}

pub struct BufferEntry<D: Device> {
    pub(crate) buffer: D::Buffer,
    pub size: u64,
}

pub struct VertexArrayEntry<D: Device> {
    pub(crate) vertex_array: D::VertexArray,
    /// Buffer behind each attribute slot.
    pub buffers: Vec<BufferId>,
    pub indices: Option<BufferId>,
}

pub struct SamplerEntry<D: Device> {
    pub(crate) sampler: D::Sampler,
    pub desc: SamplerDesc,
}

pub struct TextureEntry<D: Device> {
    pub(crate) texture: D::Texture,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

pub struct RenderTargetEntry<D: Device> {
    pub(crate) target: D::RenderTarget,
    pub desc: RenderTargetDesc,
}

pub struct FrameTargetEntry<D: Device> {
    pub(crate) target: D::FrameTarget,
    /// Colour attachments, then the depth-stencil attachment if any.
    pub attachments: Vec<Attachment>,
    /// Smallest extent over the attachments.
    pub width: u32,
    pub height: u32,
    pub colors: Vec<TextureFormat>,
    pub depth_stencil: Option<TextureFormat>,
}

/// Every live object, by category.
///
/// Read-only outside the executor.
pub struct ResourceTable<D: Device> {
    pub(crate) programs: Slots<ProgramEntry<D>>,
    pub(crate) buffers: Slots<BufferEntry<D>>,
    pub(crate) vertex_arrays: Slots<VertexArrayEntry<D>>,
    pub(crate) samplers: Slots<SamplerEntry<D>>,
    pub(crate) textures: Slots<TextureEntry<D>>,
    pub(crate) render_targets: Slots<RenderTargetEntry<D>>,
    pub(crate) frame_targets: Slots<FrameTargetEntry<D>>,
    pub(crate) blobs: Slots<Bytes>,
}

impl<D: Device> Default for ResourceTable<D> {
    fn default() -> Self {
        Self {
            programs: Slots::default(),
            buffers: Slots::default(),
            vertex_arrays: Slots::default(),
            samplers: Slots::default(),
            textures: Slots::default(),
            render_targets: Slots::default(),
            frame_targets: Slots::default(),
            blobs: Slots::default(),
        }
    }
}

impl<D: Device> ResourceTable<D> {
    pub fn programs(&self) -> &Slots<ProgramEntry<D>> {
        &self.programs
    }

    pub fn buffers(&self) -> &Slots<BufferEntry<D>> {
        &self.buffers
    }

    pub fn vertex_arrays(&self) -> &Slots<VertexArrayEntry<D>> {
        &self.vertex_arrays
    }

    pub fn samplers(&self) -> &Slots<SamplerEntry<D>> {
        &self.samplers
    }

    pub fn textures(&self) -> &Slots<TextureEntry<D>> {
        &self.textures
    }

    pub fn render_targets(&self) -> &Slots<RenderTargetEntry<D>> {
        &self.render_targets
    }

    pub fn frame_targets(&self) -> &Slots<FrameTargetEntry<D>> {
        &self.frame_targets
    }

    pub fn blobs(&self) -> &Slots<Bytes> {
        &self.blobs
    }

    /// Live object count for one category.
    pub fn live_count(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Program => self.programs.live_count(),
            ResourceKind::Buffer => self.buffers.live_count(),
            ResourceKind::VertexArray => self.vertex_arrays.live_count(),
            ResourceKind::Sampler => self.samplers.live_count(),
            ResourceKind::Texture => self.textures.live_count(),
            ResourceKind::RenderTarget => self.render_targets.live_count(),
            ResourceKind::FrameTarget => self.frame_targets.live_count(),
            ResourceKind::Blob => self.blobs.live_count(),
        }
    }

    /// Lowest free handle of one category.
    pub fn next_free(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Program => self.programs.next_free(),
            ResourceKind::Buffer => self.buffers.next_free(),
            ResourceKind::VertexArray => self.vertex_arrays.next_free(),
            ResourceKind::Sampler => self.samplers.next_free(),
            ResourceKind::Texture => self.textures.next_free(),
            ResourceKind::RenderTarget => self.render_targets.next_free(),
            ResourceKind::FrameTarget => self.frame_targets.next_free(),
            ResourceKind::Blob => self.blobs.next_free(),
        }
    }

    /// Whether every category array is empty.
    pub fn is_empty(&self) -> bool {
        ResourceKind::ALL.iter().all(|k| self.live_count(*k) == 0)
    }
}

impl<D: Device> BlobLookup for ResourceTable<D> {
    fn blob(&self, id: BlobId) -> Option<&[u8]> {
        self.blobs.get(id).map(|b| b.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TextureId;

    #[test]
    fn slots_reject_live_handles_and_double_frees() {
        let mut slots: Slots<&str> = Slots::default();
        slots.insert(TextureId(2), "two");
        assert_eq!(slots.len(), 3);
        assert!(matches!(
            slots.check_free(TextureId(2)),
            Err(Error::HandleInUse { handle: 2, .. })
        ));
        assert!(slots.check_free(TextureId(0)).is_ok());
        assert_eq!(slots.next_free(), 0);

        assert_eq!(slots.remove(TextureId(2)).unwrap(), "two");
        assert!(slots.is_empty());
        assert!(matches!(
            slots.remove(TextureId(2)),
            Err(Error::InvalidHandle {
                kind: ResourceKind::Texture,
                handle: 2
            })
        ));
    }

    #[test]
    fn huge_handles_are_refused_before_allocating() {
        let slots: Slots<u8> = Slots::default();
        assert!(matches!(
            slots.check_free(TextureId(4_000_000_000)),
            Err(Error::LimitExceeded {
                limit: "maxHandles",
                requested: 4_000_000_001,
                ..
            })
        ));
        assert!(slots.check_free(TextureId(MAX_HANDLES - 1)).is_ok());
        assert_eq!(slots.len(), 0);
    }

    #[test]
    fn iter_skips_empty_slots() {
        let mut slots: Slots<u8> = Slots::default();
        slots.insert(TextureId(0), 10);
        slots.insert(TextureId(3), 13);
        let live: Vec<_> = slots.iter().collect();
        assert_eq!(live, vec![(0, &10), (3, &13)]);
        assert_eq!(slots.drain(), vec![10, 13]);
        assert_eq!(slots.live_count(), 0);
    }
}
