//! The device context: resource table, program cache, state shadow and
//! the results still in flight, all owned by one [`Context`].
//!
//! The executor (see [`crate::exec`]) is the only code that mutates any of
//! it; everything here is read-only from the outside.

mod program_cache;
mod table;

pub use program_cache::{ProgramCache, ProgramKey};
pub use table::{
    BufferEntry, FrameTargetEntry, ProgramEntry, RenderTargetEntry, ResourceTable, SamplerEntry,
    Slots, TextureEntry, VertexArrayEntry,
};

use crate::device::{Device, Limits};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::poll::PendingRegistry;
use crate::state::{StateDescriptor, StateUpdate, apply_update};

pub struct Context<D: Device> {
    pub(crate) device: D,
    pub(crate) limits: Limits,
    pub(crate) default_size: (u32, u32),
    pub(crate) table: ResourceTable<D>,
    pub(crate) programs: ProgramCache<D>,
    pub(crate) state: StateDescriptor,
    pub(crate) pending: PendingRegistry,
    /// A `beginTimer` is waiting for its `endTimer`.
    pub(crate) timing: bool,
    disposed: bool,
}

impl<D: Device> Context<D> {
    /// Takes the limits snapshot and starts from the default state.
    pub fn new(device: D) -> Self {
        let limits = device.limits();
        let default_size = device.default_size();
        let state = StateDescriptor::new(&limits, default_size.0, default_size.1);
        log::debug!(
            "context on {} ({}x{})",
            device.describe(),
            default_size.0,
            default_size.1
        );
        Self {
            device,
            limits,
            default_size,
            table: ResourceTable::default(),
            programs: ProgramCache::default(),
            state,
            pending: PendingRegistry::default(),
            timing: false,
            disposed: false,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn default_size(&self) -> (u32, u32) {
        self.default_size
    }

    pub fn table(&self) -> &ResourceTable<D> {
        &self.table
    }

    /// The state the context believes the device is in.
    pub fn descriptor(&self) -> &StateDescriptor {
        &self.state
    }

    pub fn program_cache(&self) -> &ProgramCache<D> {
        &self.programs
    }

    /// Async results issued by this context that have not settled.
    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    /// The lowest free handle of category `H`, for callers that do not
    /// track their own indices. The handle is claimed by the create call
    /// that uses it, not by this call.
    pub fn reserve<H: Handle>(&self) -> Result<H> {
        self.ensure_live()?;
        Ok(H::from_raw(self.table.next_free(H::KIND)))
    }

    /// Releases everything.
    ///
    /// Resets the device to the default state so nothing stays bound, then
    /// deletes every live object dependents first, then disposes every
    /// result still pending. Later calls fail with [`Error::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let (w, h) = self.default_size;
        let reset = StateUpdate::reset(&self.limits, w, h);
        if let Err(e) = apply_update(
            &mut self.device,
            &mut self.table,
            &self.limits,
            &mut self.state,
            &reset,
        ) {
            log::error!("state reset during dispose failed: {e}");
        }

        let device = &mut self.device;
        let t = &mut self.table;
        let mut deleted = 0;
        for e in t.frame_targets.drain() {
            device.destroy_frame_target(e.target);
            deleted += 1;
        }
        for e in t.vertex_arrays.drain() {
            device.destroy_vertex_array(e.vertex_array);
            deleted += 1;
        }
        deleted += t.programs.drain().len();
        self.programs.evict_unused(device);
        for e in t.samplers.drain() {
            device.destroy_sampler(e.sampler);
            deleted += 1;
        }
        for e in t.textures.drain() {
            device.destroy_texture(e.texture);
            deleted += 1;
        }
        for e in t.render_targets.drain() {
            device.destroy_render_target(e.target);
            deleted += 1;
        }
        for e in t.buffers.drain() {
            device.destroy_buffer(e.buffer);
            deleted += 1;
        }
        deleted += t.blobs.drain().len();

        let cancelled = self.pending.cancel_all();
        self.disposed = true;
        log::debug!("context disposed: {deleted} objects deleted, {cancelled} results cancelled");
    }
}
