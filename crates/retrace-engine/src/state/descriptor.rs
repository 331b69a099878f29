use serde::{Deserialize, Serialize};

use crate::device::Limits;
use crate::device::types::{
    BlendFactor, BlendOp, CompareFunc, DrawBuffer, Face, FrontFace, Rect, StencilOp,
};
use crate::handle::{BufferId, FrameTargetId, ProgramId, SamplerId, TextureId, VertexArrayId};

use super::defaults;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlendFunc {
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlendEquation {
    pub rgb: BlendOp,
    pub alpha: BlendOp,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StencilFunc {
    pub func: CompareFunc,
    #[serde(rename = "ref")]
    pub reference: i32,
    pub mask: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StencilOps {
    pub fail: StencilOp,
    pub zfail: StencilOp,
    pub zpass: StencilOp,
}

/// Enable/disable toggles.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    ScissorTest,
    Blend,
    CullFace,
    DepthTest,
    StencilTest,
    PolygonOffsetFill,
    RasterizerDiscard,
    Dither,
}

/// One device-facing state change. Bindings never appear here; the executor
/// resolves them per draw.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Enable(Capability, bool),
    Viewport(Rect),
    Scissor(Rect),
    BlendFunc(BlendFunc),
    BlendEquation(BlendEquation),
    BlendColor([f32; 4]),
    CullFace(Face),
    FrontFace(FrontFace),
    DepthFunc(CompareFunc),
    DepthMask(bool),
    DepthRange([f32; 2]),
    StencilFunc(StencilFunc),
    StencilOp(StencilOps),
    StencilMask(u32),
    ColorMask([bool; 4]),
    PolygonOffset([f32; 2]),
    LineWidth(f32),
    AttributeDefault { index: u32, value: [f32; 4] },
    DrawBuffers(Vec<DrawBuffer>),
}

/// Fixed-function state a device tracks itself.
///
/// Both backends keep one of these and feed every [`StateChange`] through
/// [`RasterState::apply`], so the context shadow and the device never drift.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterState {
    pub viewport: Rect,
    pub scissor_test: bool,
    pub scissor: Rect,
    pub blend: bool,
    pub blend_func: BlendFunc,
    pub blend_equation: BlendEquation,
    pub blend_color: [f32; 4],
    pub cull: bool,
    pub cull_face: Face,
    pub front_face: FrontFace,
    pub depth_test: bool,
    pub depth_func: CompareFunc,
    pub depth_mask: bool,
    pub depth_range: [f32; 2],
    pub stencil_test: bool,
    pub stencil_func: StencilFunc,
    pub stencil_op: StencilOps,
    pub stencil_mask: u32,
    pub color_mask: [bool; 4],
    pub polygon_offset_fill: bool,
    pub polygon_offset: [f32; 2],
    pub line_width: f32,
    pub rasterizer_discard: bool,
    pub dither: bool,
    pub attribute_defaults: Vec<[f32; 4]>,
    pub draw_buffers: Vec<DrawBuffer>,
}

impl RasterState {
    /// Default state for a framebuffer of `width` x `height`.
    pub fn new(limits: &Limits, width: u32, height: u32) -> Self {
        Self {
            viewport: Rect::from_size(width, height),
            scissor_test: false,
            scissor: Rect::from_size(width, height),
            blend: false,
            blend_func: defaults::BLEND_FUNC,
            blend_equation: defaults::BLEND_EQUATION,
            blend_color: defaults::BLEND_COLOR,
            cull: false,
            cull_face: Face::Back,
            front_face: FrontFace::Ccw,
            depth_test: false,
            depth_func: defaults::DEPTH_FUNC,
            depth_mask: true,
            depth_range: [0.0, 1.0],
            stencil_test: false,
            stencil_func: defaults::STENCIL_FUNC,
            stencil_op: defaults::STENCIL_OPS,
            stencil_mask: u32::MAX,
            color_mask: [true; 4],
            polygon_offset_fill: false,
            polygon_offset: [0.0, 0.0],
            line_width: 1.0,
            rasterizer_discard: false,
            dither: true,
            attribute_defaults: vec![defaults::ATTRIBUTE; limits.max_vertex_attributes as usize],
            draw_buffers: vec![DrawBuffer::Back],
        }
    }

    pub fn apply(&mut self, change: &StateChange) {
        match change {
            StateChange::Enable(cap, on) => *self.toggle_mut(*cap) = *on,
            StateChange::Viewport(r) => self.viewport = *r,
            StateChange::Scissor(r) => self.scissor = *r,
            StateChange::BlendFunc(f) => self.blend_func = *f,
            StateChange::BlendEquation(e) => self.blend_equation = *e,
            StateChange::BlendColor(c) => self.blend_color = *c,
            StateChange::CullFace(f) => self.cull_face = *f,
            StateChange::FrontFace(f) => self.front_face = *f,
            StateChange::DepthFunc(f) => self.depth_func = *f,
            StateChange::DepthMask(m) => self.depth_mask = *m,
            StateChange::DepthRange(r) => self.depth_range = *r,
            StateChange::StencilFunc(f) => self.stencil_func = *f,
            StateChange::StencilOp(o) => self.stencil_op = *o,
            StateChange::StencilMask(m) => self.stencil_mask = *m,
            StateChange::ColorMask(m) => self.color_mask = *m,
            StateChange::PolygonOffset(o) => self.polygon_offset = *o,
            StateChange::LineWidth(w) => self.line_width = *w,
            StateChange::AttributeDefault { index, value } => {
                if let Some(slot) = self.attribute_defaults.get_mut(*index as usize) {
                    *slot = *value;
                }
            }
            StateChange::DrawBuffers(list) => self.draw_buffers = list.clone(),
        }
    }

    pub fn toggle(&self, cap: Capability) -> bool {
        match cap {
            Capability::ScissorTest => self.scissor_test,
            Capability::Blend => self.blend,
            Capability::CullFace => self.cull,
            Capability::DepthTest => self.depth_test,
            Capability::StencilTest => self.stencil_test,
            Capability::PolygonOffsetFill => self.polygon_offset_fill,
            Capability::RasterizerDiscard => self.rasterizer_discard,
            Capability::Dither => self.dither,
        }
    }

    fn toggle_mut(&mut self, cap: Capability) -> &mut bool {
        match cap {
            Capability::ScissorTest => &mut self.scissor_test,
            Capability::Blend => &mut self.blend,
            Capability::CullFace => &mut self.cull,
            Capability::DepthTest => &mut self.depth_test,
            Capability::StencilTest => &mut self.stencil_test,
            Capability::PolygonOffsetFill => &mut self.polygon_offset_fill,
            Capability::RasterizerDiscard => &mut self.rasterizer_discard,
            Capability::Dither => &mut self.dither,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureBinding {
    pub texture: TextureId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler: Option<SamplerId>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniformBufferBinding {
    pub buffer: BufferId,
    #[serde(default)]
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// The full state the context believes the device is in.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDescriptor {
    pub program: Option<ProgramId>,
    pub vertex_array: Option<VertexArrayId>,
    pub frame_target: Option<FrameTargetId>,
    pub uniform_buffers: Vec<Option<UniformBufferBinding>>,
    pub textures: Vec<Option<TextureBinding>>,
    pub raster: RasterState,
}

impl StateDescriptor {
    pub fn new(limits: &Limits, width: u32, height: u32) -> Self {
        Self {
            program: None,
            vertex_array: None,
            frame_target: None,
            uniform_buffers: vec![None; limits.max_uniform_buffer_bindings as usize],
            textures: vec![None; limits.max_texture_units as usize],
            raster: RasterState::new(limits, width, height),
        }
    }

    /// Whether any binding still references a live resource.
    pub fn has_bindings(&self) -> bool {
        self.program.is_some()
            || self.vertex_array.is_some()
            || self.frame_target.is_some()
            || self.uniform_buffers.iter().any(Option::is_some)
            || self.textures.iter().any(Option::is_some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_apply_updates_only_the_named_facet() {
        let limits = Limits::default();
        let mut raster = RasterState::new(&limits, 8, 8);
        let before = raster.clone();

        raster.apply(&StateChange::Enable(Capability::DepthTest, true));
        assert!(raster.depth_test);
        assert_eq!(raster.blend, before.blend);

        raster.apply(&StateChange::AttributeDefault {
            index: 1,
            value: [0.5, 0.5, 0.5, 1.0],
        });
        assert_eq!(raster.attribute_defaults[1], [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(raster.attribute_defaults[0], defaults::ATTRIBUTE);
    }

    #[test]
    fn attribute_default_out_of_range_is_ignored() {
        let limits = Limits::default();
        let mut raster = RasterState::new(&limits, 1, 1);
        raster.apply(&StateChange::AttributeDefault {
            index: 999,
            value: [1.0; 4],
        });
        assert_eq!(raster.attribute_defaults.len(), 16);
    }

    #[test]
    fn fresh_descriptor_has_no_bindings() {
        let d = StateDescriptor::new(&Limits::default(), 4, 4);
        assert!(!d.has_bindings());
        assert_eq!(d.textures.len(), 16);
        assert_eq!(d.raster.viewport, Rect::new(0, 0, 4, 4));
    }

    #[test]
    fn stencil_func_wire_uses_ref() {
        let f: StencilFunc =
            serde_json::from_str(r#"{"func":"equal","ref":1,"mask":255}"#).unwrap();
        assert_eq!(f.reference, 1);
    }
}
