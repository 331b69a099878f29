//! Defaults table.
//!
//! Consulted when a composite facet is present but some of its parts are
//! omitted, and when building the full reset used by dispose.

use crate::device::types::{BlendFactor, BlendOp, CompareFunc, StencilOp};

use super::descriptor::{BlendEquation, BlendFunc, StencilFunc, StencilOps};

pub const BLEND_SRC: BlendFactor = BlendFactor::One;
pub const BLEND_DST: BlendFactor = BlendFactor::Zero;

pub const BLEND_FUNC: BlendFunc = BlendFunc {
    src: BLEND_SRC,
    dst: BLEND_DST,
    src_alpha: BLEND_SRC,
    dst_alpha: BLEND_DST,
};

pub const BLEND_EQUATION: BlendEquation = BlendEquation {
    rgb: BlendOp::Add,
    alpha: BlendOp::Add,
};

pub const BLEND_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

/// Clear colour parts omitted by a `clear` call.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

pub const CLEAR_DEPTH: f32 = 1.0;

pub const DEPTH_FUNC: CompareFunc = CompareFunc::Less;

pub const STENCIL_FUNC: StencilFunc = StencilFunc {
    func: CompareFunc::Always,
    reference: 0,
    mask: u32::MAX,
};

pub const STENCIL_OPS: StencilOps = StencilOps {
    fail: StencilOp::Keep,
    zfail: StencilOp::Keep,
    zpass: StencilOp::Keep,
};

/// Generic vertex attribute value when no array is enabled.
pub const ATTRIBUTE: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Fills the omitted tail of a partial 4-vector from `base`.
///
/// Extra components are ignored.
pub fn fill4(parts: &[f32], base: [f32; 4]) -> [f32; 4] {
    let mut out = base;
    for (slot, v) in out.iter_mut().zip(parts) {
        *slot = *v;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill4_keeps_base_tail() {
        assert_eq!(fill4(&[1.0, 0.5], CLEAR_COLOR), [1.0, 0.5, 0.0, 1.0]);
        assert_eq!(fill4(&[], ATTRIBUTE), ATTRIBUTE);
        assert_eq!(fill4(&[1.0; 6], BLEND_COLOR), [1.0; 4]);
    }
}
