use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource category. Each category has its own handle space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Program,
    Buffer,
    VertexArray,
    Sampler,
    Texture,
    RenderTarget,
    FrameTarget,
    Blob,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Program,
        ResourceKind::Buffer,
        ResourceKind::VertexArray,
        ResourceKind::Sampler,
        ResourceKind::Texture,
        ResourceKind::RenderTarget,
        ResourceKind::FrameTarget,
        ResourceKind::Blob,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Program => "program",
            ResourceKind::Buffer => "buffer",
            ResourceKind::VertexArray => "vertex-array",
            ResourceKind::Sampler => "sampler",
            ResourceKind::Texture => "texture",
            ResourceKind::RenderTarget => "render-target",
            ResourceKind::FrameTarget => "frame-target",
            ResourceKind::Blob => "blob",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Common behaviour of the typed handle newtypes.
pub trait Handle: Copy + Eq + fmt::Debug {
    const KIND: ResourceKind;

    fn from_raw(raw: u32) -> Self;
    fn raw(self) -> u32;

    #[inline]
    fn index(self) -> usize {
        self.raw() as usize
    }
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident => $kind:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl Handle for $name {
            const KIND: ResourceKind = ResourceKind::$kind;

            #[inline]
            fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", ResourceKind::$kind, self.0)
            }
        }
    };
}

define_handle!(
    /// Linked shader program.
    ProgramId => Program
);
define_handle!(
    /// Vertex, index or uniform data buffer.
    BufferId => Buffer
);
define_handle!(
    /// Vertex attribute layout plus optional index buffer.
    VertexArrayId => VertexArray
);
define_handle!(SamplerId => Sampler);
define_handle!(TextureId => Texture);
define_handle!(
    /// Render-only surface (renderbuffer).
    RenderTargetId => RenderTarget
);
define_handle!(
    /// Set of attachments drawn into together (framebuffer).
    FrameTargetId => FrameTarget
);
define_handle!(
    /// CPU-side binary payload referenced by `BinarySource::Blob`.
    BlobId => Blob
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_category_and_index() {
        assert_eq!(BufferId(3).to_string(), "buffer#3");
        assert_eq!(FrameTargetId(0).to_string(), "frame-target#0");
    }

    #[test]
    fn handles_serialize_as_plain_integers() {
        assert_eq!(serde_json::to_string(&TextureId(7)).unwrap(), "7");
        let id: ProgramId = serde_json::from_str("12").unwrap();
        assert_eq!(id, ProgramId(12));
    }

    #[test]
    fn kinds_are_distinct() {
        assert_eq!(<BlobId as Handle>::KIND, ResourceKind::Blob);
        assert_eq!(<SamplerId as Handle>::KIND, ResourceKind::Sampler);
        assert_eq!(ResourceKind::ALL.len(), 8);
    }
}
