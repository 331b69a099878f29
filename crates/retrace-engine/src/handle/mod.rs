//! Resource handles.
//!
//! A handle is a small integer naming a live resource within one category.
//! Categories are independent index spaces; handles are reused as soon as
//! the resource they named is deleted.

mod alloc;
mod kind;

pub use alloc::{HandleAllocator, MAX_HANDLES};
pub use kind::{
    BlobId, BufferId, FrameTargetId, Handle, ProgramId, RenderTargetId, ResourceKind, SamplerId,
    TextureId, VertexArrayId,
};
