use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::device::Limits;
use crate::device::types::{
    BlendFactor, BlendOp, CompareFunc, DrawBuffer, Face, FrontFace, Rect, StencilOp, UniformValue,
};
use crate::handle::{FrameTargetId, ProgramId, VertexArrayId};

use super::defaults;
use super::descriptor::{
    BlendEquation, BlendFunc, RasterState, StencilFunc, StencilOps, TextureBinding,
    UniformBufferBinding,
};

/// Deserializes a present field (including `null`) as `Some(..)`.
///
/// Paired with `#[serde(default)]` this separates "absent" (`None`) from
/// "explicitly unbound" (`Some(None)`).
fn nullable<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlendFuncUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<BlendFactor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<BlendFactor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_alpha: Option<BlendFactor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_alpha: Option<BlendFactor>,
}

impl BlendFuncUpdate {
    /// Alpha factors follow the colour factors unless given.
    pub fn resolve(&self) -> BlendFunc {
        let src = self.src.unwrap_or(defaults::BLEND_SRC);
        let dst = self.dst.unwrap_or(defaults::BLEND_DST);
        BlendFunc {
            src,
            dst,
            src_alpha: self.src_alpha.unwrap_or(src),
            dst_alpha: self.dst_alpha.unwrap_or(dst),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlendEquationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb: Option<BlendOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<BlendOp>,
}

impl BlendEquationUpdate {
    pub fn resolve(&self) -> BlendEquation {
        let rgb = self.rgb.unwrap_or(defaults::BLEND_EQUATION.rgb);
        BlendEquation {
            rgb,
            alpha: self.alpha.unwrap_or(rgb),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StencilFuncUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<CompareFunc>,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<u32>,
}

impl StencilFuncUpdate {
    pub fn resolve(&self) -> StencilFunc {
        let d = defaults::STENCIL_FUNC;
        StencilFunc {
            func: self.func.unwrap_or(d.func),
            reference: self.reference.unwrap_or(d.reference),
            mask: self.mask.unwrap_or(d.mask),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StencilOpUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<StencilOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zfail: Option<StencilOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zpass: Option<StencilOp>,
}

impl StencilOpUpdate {
    pub fn resolve(&self) -> StencilOps {
        let d = defaults::STENCIL_OPS;
        StencilOps {
            fail: self.fail.unwrap_or(d.fail),
            zfail: self.zfail.unwrap_or(d.zfail),
            zpass: self.zpass.unwrap_or(d.zpass),
        }
    }
}

/// A sparse partial of the state descriptor.
///
/// Absent fields leave the facet untouched. For the three object bindings,
/// `null` unbinds. In the binding lists a `null` element unbinds that slot;
/// in `attributeDefaults` a `null` element resets the slot to `(0, 0, 0, 1)`.
///
/// Facets are applied in declaration order, `uniforms` last.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub program: Option<Option<ProgramId>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub vertex_array: Option<Option<VertexArrayId>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub frame_target: Option<Option<FrameTargetId>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scissor_test: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scissor: Option<Rect>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend_func: Option<BlendFuncUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend_equation: Option<BlendEquationUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend_color: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cull_enable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cull_face: Option<Face>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front_face: Option<FrontFace>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_test: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_func: Option<CompareFunc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_mask: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_range: Option<[f32; 2]>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stencil_test: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stencil_func: Option<StencilFuncUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stencil_op: Option<StencilOpUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stencil_mask: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_mask: Option<[bool; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon_offset_fill: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon_offset: Option<[f32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rasterizer_discard: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dither: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniform_buffers: Option<Vec<Option<UniformBufferBinding>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textures: Option<Vec<Option<TextureBinding>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_defaults: Option<Vec<Option<Vec<f32>>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw_buffers: Option<Vec<DrawBuffer>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniforms: Option<BTreeMap<String, UniformValue>>,
}

impl StateUpdate {
    /// The full default state: every binding cleared, every facet at its
    /// default, sized to `limits`.
    pub fn reset(limits: &Limits, width: u32, height: u32) -> Self {
        let r = RasterState::new(limits, width, height);
        Self {
            program: Some(None),
            vertex_array: Some(None),
            frame_target: Some(None),
            viewport: Some(r.viewport),
            scissor_test: Some(r.scissor_test),
            scissor: Some(r.scissor),
            blend: Some(r.blend),
            blend_func: Some(BlendFuncUpdate {
                src: Some(r.blend_func.src),
                dst: Some(r.blend_func.dst),
                src_alpha: Some(r.blend_func.src_alpha),
                dst_alpha: Some(r.blend_func.dst_alpha),
            }),
            blend_equation: Some(BlendEquationUpdate {
                rgb: Some(r.blend_equation.rgb),
                alpha: Some(r.blend_equation.alpha),
            }),
            blend_color: Some(r.blend_color.to_vec()),
            cull_enable: Some(r.cull),
            cull_face: Some(r.cull_face),
            front_face: Some(r.front_face),
            depth_test: Some(r.depth_test),
            depth_func: Some(r.depth_func),
            depth_mask: Some(r.depth_mask),
            depth_range: Some(r.depth_range),
            stencil_test: Some(r.stencil_test),
            stencil_func: Some(StencilFuncUpdate {
                func: Some(r.stencil_func.func),
                reference: Some(r.stencil_func.reference),
                mask: Some(r.stencil_func.mask),
            }),
            stencil_op: Some(StencilOpUpdate {
                fail: Some(r.stencil_op.fail),
                zfail: Some(r.stencil_op.zfail),
                zpass: Some(r.stencil_op.zpass),
            }),
            stencil_mask: Some(r.stencil_mask),
            color_mask: Some(r.color_mask),
            polygon_offset_fill: Some(r.polygon_offset_fill),
            polygon_offset: Some(r.polygon_offset),
            line_width: Some(r.line_width),
            rasterizer_discard: Some(r.rasterizer_discard),
            dither: Some(r.dither),
            uniform_buffers: Some(vec![None; limits.max_uniform_buffer_bindings as usize]),
            textures: Some(vec![None; limits.max_texture_units as usize]),
            attribute_defaults: Some(vec![None; limits.max_vertex_attributes as usize]),
            draw_buffers: Some(r.draw_buffers),
            uniforms: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::BlendFactor;

    #[test]
    fn null_binding_differs_from_absent() {
        let u: StateUpdate = serde_json::from_str(r#"{"program": null}"#).unwrap();
        assert_eq!(u.program, Some(None));
        assert_eq!(u.vertex_array, None);

        let u: StateUpdate = serde_json::from_str(r#"{"program": 2}"#).unwrap();
        assert_eq!(u.program, Some(Some(ProgramId(2))));
    }

    #[test]
    fn serialization_keeps_explicit_null() {
        let u = StateUpdate {
            frame_target: Some(None),
            depth_test: Some(true),
            ..Default::default()
        };
        let text = serde_json::to_string(&u).unwrap();
        assert_eq!(text, r#"{"frameTarget":null,"depthTest":true}"#);
        let back: StateUpdate = serde_json::from_str(&text).unwrap();
        assert_eq!(back, u);
    }

    #[test]
    fn blend_alpha_factors_follow_colour_factors() {
        let f = BlendFuncUpdate {
            src: Some(BlendFactor::SrcAlpha),
            dst: Some(BlendFactor::OneMinusSrcAlpha),
            ..Default::default()
        }
        .resolve();
        assert_eq!(f.src_alpha, BlendFactor::SrcAlpha);
        assert_eq!(f.dst_alpha, BlendFactor::OneMinusSrcAlpha);

        let partial = BlendFuncUpdate {
            dst: Some(BlendFactor::One),
            ..Default::default()
        }
        .resolve();
        assert_eq!(partial.src, BlendFactor::One);
    }

    #[test]
    fn stencil_partials_use_defaults() {
        let f = StencilFuncUpdate {
            reference: Some(3),
            ..Default::default()
        }
        .resolve();
        assert_eq!(f.func, CompareFunc::Always);
        assert_eq!(f.mask, u32::MAX);
        assert_eq!(f.reference, 3);
    }

    #[test]
    fn reset_covers_every_binding() {
        let limits = Limits::default();
        let reset = StateUpdate::reset(&limits, 16, 16);
        assert_eq!(reset.program, Some(None));
        assert_eq!(reset.textures.as_ref().map(Vec::len), Some(16));
        assert!(!reset.is_empty());
        assert!(StateUpdate::default().is_empty());
    }
}
