//! Parameter records, one per operation. These are the JSON arguments a
//! command log carries, so every field name is camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::binary::BinarySource;
use crate::device::types::{
    AttributeType, BlitMask, BufferUsage, Filter, IndexType, PixelFormat, PixelType, Rect,
    RenderTargetDesc, SamplerDesc, TextureFormat, Topology, UniformDecl,
};
use crate::handle::{BufferId, FrameTargetId, RenderTargetId, TextureId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramParams {
    pub vertex: String,
    pub fragment: String,
    /// Flavor flags, injected into both stages as boolean constants.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uniforms: Vec<UniformDecl>,
    /// Sampler names in texture-unit order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub textures: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uniform_blocks: Vec<String>,
}

/// `size` defaults to the payload length; at least one must be given.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BinarySource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub usage: BufferUsage,
}

impl BufferParams {
    pub fn with_data(data: BinarySource) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteBufferParams {
    #[serde(default)]
    pub offset: u64,
    pub data: BinarySource,
}

fn four() -> u8 {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeParams {
    pub location: u32,
    pub buffer: BufferId,
    /// Components per vertex, 1 to 4.
    #[serde(default = "four")]
    pub size: u8,
    #[serde(default, rename = "type")]
    pub ty: AttributeType,
    #[serde(default)]
    pub normalized: bool,
    /// Bytes between vertices; 0 means tightly packed.
    #[serde(default)]
    pub stride: u32,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub divisor: u32,
}

impl AttributeParams {
    /// Tightly packed float attribute at offset 0.
    pub fn floats(location: u32, buffer: BufferId, size: u8) -> Self {
        Self {
            location,
            buffer,
            size,
            ty: AttributeType::Float32,
            normalized: false,
            stride: 0,
            offset: 0,
            divisor: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VertexArrayParams {
    #[serde(default)]
    pub attributes: Vec<AttributeParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<BufferId>,
}

pub type SamplerParams = SamplerDesc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureParams {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub format: TextureFormat,
    /// Tightly packed rows, bottom row first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BinarySource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTextureParams {
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub data: BinarySource,
}

pub type RenderTargetParams = RenderTargetDesc;

/// `{"texture": 1}` or `{"renderTarget": 0}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Attachment {
    Texture(TextureId),
    RenderTarget(RenderTargetId),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTargetParams {
    #[serde(default)]
    pub color: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_stencil: Option<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobParams {
    pub data: BinarySource,
}

/// Typed pattern for an explicit colour attachment clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearPattern {
    Float(Vec<f32>),
    Int(Vec<i32>),
    Uint(Vec<u32>),
}

/// Clear request.
///
/// `buffer` selects the planes: absent or `"back"` clears the colour draw
/// buffers (plus depth and stencil when those fields are given),
/// `"color"` clears attachment `index` with `value`, and `"depth"`,
/// `"stencil"` and `"depth_stencil"` clear those planes. Any other tag is
/// rejected.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ClearPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stencil: Option<i32>,
}

impl ClearParams {
    /// Clears the colour draw buffers to `color`.
    pub fn back(color: [f32; 4]) -> Self {
        Self {
            color: Some(color.to_vec()),
            ..Default::default()
        }
    }

    pub fn depth(depth: f32) -> Self {
        Self {
            buffer: Some("depth".into()),
            depth: Some(depth),
            ..Default::default()
        }
    }

    /// Clears colour attachment `index` with a typed pattern.
    pub fn color(index: u32, value: ClearPattern) -> Self {
        Self {
            buffer: Some("color".into()),
            index: Some(index),
            value: Some(value),
            ..Default::default()
        }
    }
}

/// Draw request. The form is picked by which fields are present:
/// `indexType` makes it indexed, `instanceCount` instanced, and
/// `drawCount` (with `firsts` and `counts`) a multi-draw.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<Topology>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_type: Option<IndexType>,
    /// Byte offset into the index buffer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firsts: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<Vec<u32>>,
}

impl DrawParams {
    pub fn arrays(topology: Topology, first: u32, count: u32) -> Self {
        Self {
            topology: Some(topology),
            first: Some(first),
            count: Some(count),
            ..Default::default()
        }
    }

    pub fn elements(topology: Topology, index_type: IndexType, count: u32) -> Self {
        Self {
            topology: Some(topology),
            index_type: Some(index_type),
            count: Some(count),
            ..Default::default()
        }
    }
}

fn nearest() -> Filter {
    Filter::Nearest
}

/// `null` (or absent) source and destination name the default framebuffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlitParams {
    #[serde(default)]
    pub src: Option<FrameTargetId>,
    #[serde(default)]
    pub dst: Option<FrameTargetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_rect: Option<Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_rect: Option<Rect>,
    #[serde(default)]
    pub mask: BlitMask,
    #[serde(default = "nearest")]
    pub filter: Filter,
}

impl Default for BlitParams {
    fn default() -> Self {
        Self {
            src: None,
            dst: None,
            src_rect: None,
            dst_rect: None,
            mask: BlitMask::default(),
            filter: nearest(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyParams {
    pub src: BufferId,
    pub dst: BufferId,
    #[serde(default)]
    pub src_offset: u64,
    #[serde(default)]
    pub dst_offset: u64,
    /// Defaults to the rest of the source buffer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Readback request. The rectangle defaults to the whole source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPixelsParams {
    #[serde(default)]
    pub source: Option<FrameTargetId>,
    #[serde(default)]
    pub attachment: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub format: PixelFormat,
    #[serde(default, rename = "type")]
    pub ty: PixelType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_defaults_fill_in() {
        let a: AttributeParams = serde_json::from_str(r#"{"location": 0, "buffer": 2}"#).unwrap();
        assert_eq!(a.size, 4);
        assert_eq!(a.ty, AttributeType::Float32);
        assert_eq!(a.stride, 0);
    }

    #[test]
    fn attachment_wire_form() {
        let text = r#"{"color": [{"texture": 1}], "depthStencil": {"renderTarget": 0}}"#;
        let p: FrameTargetParams = serde_json::from_str(text).unwrap();
        assert_eq!(p.color, vec![Attachment::Texture(TextureId(1))]);
        assert_eq!(p.depth_stencil, Some(Attachment::RenderTarget(RenderTargetId(0))));
    }

    #[test]
    fn blit_filter_defaults_to_nearest() {
        let b: BlitParams = serde_json::from_str("{}").unwrap();
        assert_eq!(b.filter, Filter::Nearest);
        assert_eq!(b, BlitParams::default());
    }

    #[test]
    fn clear_pattern_is_typed() {
        let text = r#"{"buffer": "color", "index": 1, "value": {"uint": [1, 2, 3, 4]}}"#;
        let c: ClearParams = serde_json::from_str(text).unwrap();
        assert_eq!(c, ClearParams::color(1, ClearPattern::Uint(vec![1, 2, 3, 4])));
        assert_eq!(serde_json::to_string(&ClearParams::default()).unwrap(), "{}");
    }

    #[test]
    fn read_pixels_type_field() {
        let r: ReadPixelsParams =
            serde_json::from_str(r#"{"format": "rgba_integer", "type": "uint32"}"#).unwrap();
        assert_eq!(r.format, PixelFormat::RgbaInteger);
        assert_eq!(r.ty, PixelType::Uint32);
    }
}
