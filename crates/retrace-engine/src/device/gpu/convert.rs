//! Mappings from device-neutral enums to wgpu.

use crate::device::DeviceError;
use crate::device::types::{
    AttributeType, BlendFactor, BlendOp, CompareFunc, Face, Filter, FrontFace, StencilOp,
    TextureFormat, Topology, Wrap,
};

pub fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8 => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8 => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::R32f => wgpu::TextureFormat::R32Float,
        TextureFormat::Rg32f => wgpu::TextureFormat::Rg32Float,
        TextureFormat::Rgba32f => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::R32ui => wgpu::TextureFormat::R32Uint,
        TextureFormat::Rgba32ui => wgpu::TextureFormat::Rgba32Uint,
        TextureFormat::R32i => wgpu::TextureFormat::R32Sint,
        TextureFormat::Rgba32i => wgpu::TextureFormat::Rgba32Sint,
        TextureFormat::Depth32f => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Depth24Stencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

pub fn compare(func: CompareFunc) -> wgpu::CompareFunction {
    match func {
        CompareFunc::Never => wgpu::CompareFunction::Never,
        CompareFunc::Less => wgpu::CompareFunction::Less,
        CompareFunc::Equal => wgpu::CompareFunction::Equal,
        CompareFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunc::Greater => wgpu::CompareFunction::Greater,
        CompareFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunc::Always => wgpu::CompareFunction::Always,
    }
}

pub fn blend_factor(factor: BlendFactor) -> Result<wgpu::BlendFactor, DeviceError> {
    Ok(match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        BlendFactor::ConstantColor => wgpu::BlendFactor::Constant,
        BlendFactor::OneMinusConstantColor => wgpu::BlendFactor::OneMinusConstant,
        BlendFactor::SrcAlphaSaturate => wgpu::BlendFactor::SrcAlphaSaturated,
        BlendFactor::ConstantAlpha | BlendFactor::OneMinusConstantAlpha => {
            return Err(DeviceError::Unsupported(format!(
                "blend factor {factor:?} has no wgpu equivalent"
            )));
        }
    })
}

pub fn blend_op(op: BlendOp) -> wgpu::BlendOperation {
    match op {
        BlendOp::Add => wgpu::BlendOperation::Add,
        BlendOp::Subtract => wgpu::BlendOperation::Subtract,
        BlendOp::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        BlendOp::Min => wgpu::BlendOperation::Min,
        BlendOp::Max => wgpu::BlendOperation::Max,
    }
}

/// Min and max ignore their factors; wgpu insists they be `One`.
pub fn blend_component(
    src: BlendFactor,
    dst: BlendFactor,
    op: BlendOp,
) -> Result<wgpu::BlendComponent, DeviceError> {
    let operation = blend_op(op);
    if matches!(op, BlendOp::Min | BlendOp::Max) {
        return Ok(wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation,
        });
    }
    Ok(wgpu::BlendComponent {
        src_factor: blend_factor(src)?,
        dst_factor: blend_factor(dst)?,
        operation,
    })
}

pub fn stencil_op(op: StencilOp) -> wgpu::StencilOperation {
    match op {
        StencilOp::Keep => wgpu::StencilOperation::Keep,
        StencilOp::Zero => wgpu::StencilOperation::Zero,
        StencilOp::Replace => wgpu::StencilOperation::Replace,
        StencilOp::Incr => wgpu::StencilOperation::IncrementClamp,
        StencilOp::IncrWrap => wgpu::StencilOperation::IncrementWrap,
        StencilOp::Decr => wgpu::StencilOperation::DecrementClamp,
        StencilOp::DecrWrap => wgpu::StencilOperation::DecrementWrap,
        StencilOp::Invert => wgpu::StencilOperation::Invert,
    }
}

/// `None` means both faces are culled: nothing is drawn.
pub fn cull_mode(cull: bool, face: Face) -> Option<Option<wgpu::Face>> {
    match (cull, face) {
        (false, _) => Some(None),
        (true, Face::Front) => Some(Some(wgpu::Face::Front)),
        (true, Face::Back) => Some(Some(wgpu::Face::Back)),
        (true, Face::FrontAndBack) => None,
    }
}

pub fn front_face(face: FrontFace) -> wgpu::FrontFace {
    match face {
        FrontFace::Ccw => wgpu::FrontFace::Ccw,
        FrontFace::Cw => wgpu::FrontFace::Cw,
    }
}

pub fn filter(filter: Filter) -> wgpu::FilterMode {
    match filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    }
}

pub fn address_mode(wrap: Wrap) -> wgpu::AddressMode {
    match wrap {
        Wrap::Repeat => wgpu::AddressMode::Repeat,
        Wrap::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        Wrap::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

/// Native topology, or `None` for loops and fans, which are expanded into
/// indexed lists before drawing.
pub fn topology(topology: Topology) -> Option<wgpu::PrimitiveTopology> {
    match topology {
        Topology::Points => Some(wgpu::PrimitiveTopology::PointList),
        Topology::Lines => Some(wgpu::PrimitiveTopology::LineList),
        Topology::LineStrip => Some(wgpu::PrimitiveTopology::LineStrip),
        Topology::Triangles => Some(wgpu::PrimitiveTopology::TriangleList),
        Topology::TriangleStrip => Some(wgpu::PrimitiveTopology::TriangleStrip),
        Topology::LineLoop | Topology::TriangleFan => None,
    }
}

pub fn vertex_format(
    ty: AttributeType,
    components: u8,
    normalized: bool,
) -> Result<wgpu::VertexFormat, DeviceError> {
    use wgpu::VertexFormat as F;
    let format = match (ty, normalized, components) {
        (AttributeType::Float32, _, 1) => F::Float32,
        (AttributeType::Float32, _, 2) => F::Float32x2,
        (AttributeType::Float32, _, 3) => F::Float32x3,
        (AttributeType::Float32, _, 4) => F::Float32x4,
        (AttributeType::Uint32, _, 1) => F::Uint32,
        (AttributeType::Uint32, _, 2) => F::Uint32x2,
        (AttributeType::Uint32, _, 3) => F::Uint32x3,
        (AttributeType::Uint32, _, 4) => F::Uint32x4,
        (AttributeType::Int32, _, 1) => F::Sint32,
        (AttributeType::Int32, _, 2) => F::Sint32x2,
        (AttributeType::Int32, _, 3) => F::Sint32x3,
        (AttributeType::Int32, _, 4) => F::Sint32x4,
        (AttributeType::Uint8, false, 1) => F::Uint8,
        (AttributeType::Uint8, false, 2) => F::Uint8x2,
        (AttributeType::Uint8, false, 4) => F::Uint8x4,
        (AttributeType::Uint8, true, 1) => F::Unorm8,
        (AttributeType::Uint8, true, 2) => F::Unorm8x2,
        (AttributeType::Uint8, true, 4) => F::Unorm8x4,
        (AttributeType::Int8, false, 1) => F::Sint8,
        (AttributeType::Int8, false, 2) => F::Sint8x2,
        (AttributeType::Int8, false, 4) => F::Sint8x4,
        (AttributeType::Int8, true, 1) => F::Snorm8,
        (AttributeType::Int8, true, 2) => F::Snorm8x2,
        (AttributeType::Int8, true, 4) => F::Snorm8x4,
        (AttributeType::Uint16, false, 1) => F::Uint16,
        (AttributeType::Uint16, false, 2) => F::Uint16x2,
        (AttributeType::Uint16, false, 4) => F::Uint16x4,
        (AttributeType::Uint16, true, 1) => F::Unorm16,
        (AttributeType::Uint16, true, 2) => F::Unorm16x2,
        (AttributeType::Uint16, true, 4) => F::Unorm16x4,
        (AttributeType::Int16, false, 1) => F::Sint16,
        (AttributeType::Int16, false, 2) => F::Sint16x2,
        (AttributeType::Int16, false, 4) => F::Sint16x4,
        (AttributeType::Int16, true, 1) => F::Snorm16,
        (AttributeType::Int16, true, 2) => F::Snorm16x2,
        (AttributeType::Int16, true, 4) => F::Snorm16x4,
        _ => {
            return Err(DeviceError::Unsupported(format!(
                "{components}-component {ty:?} attributes"
            )));
        }
    };
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fans_and_loops_have_no_native_topology() {
        assert_eq!(topology(Topology::TriangleFan), None);
        assert_eq!(topology(Topology::LineLoop), None);
        assert_eq!(
            topology(Topology::TriangleStrip),
            Some(wgpu::PrimitiveTopology::TriangleStrip)
        );
    }

    #[test]
    fn three_component_bytes_are_unsupported() {
        assert!(vertex_format(AttributeType::Uint8, 3, true).is_err());
        assert_eq!(
            vertex_format(AttributeType::Float32, 3, false).unwrap(),
            wgpu::VertexFormat::Float32x3
        );
    }

    #[test]
    fn min_max_force_unit_factors() {
        let c = blend_component(BlendFactor::SrcAlpha, BlendFactor::Zero, BlendOp::Max).unwrap();
        assert_eq!(c.src_factor, wgpu::BlendFactor::One);
        assert_eq!(c.dst_factor, wgpu::BlendFactor::One);
    }

    #[test]
    fn culling_both_faces_draws_nothing() {
        assert_eq!(cull_mode(true, Face::FrontAndBack), None);
        assert_eq!(cull_mode(false, Face::FrontAndBack), Some(None));
    }
}
