//! Render pipeline keys.
//!
//! GL folds blend, depth, stencil and vertex layout into mutable context
//! state; wgpu bakes them into immutable pipelines. Each draw derives a
//! [`PipelineKey`] from the current raster state and looks it up in the
//! device's cache, so a replay that toggles the same few states reuses a
//! handful of pipelines.

use crate::device::DeviceError;
use crate::device::types::{FormatClass, TextureFormat};
use crate::state::RasterState;

use super::convert;
use super::program::{FRAGMENT_ENTRY, GpuProgram, VERTEX_ENTRY};

/// One attribute fed from its own vertex buffer binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexSlot {
    pub location: u32,
    pub stride: u64,
    pub instanced: bool,
    pub format: wgpu::VertexFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub program: u64,
    pub vertex: Vec<VertexSlot>,
    pub topology: wgpu::PrimitiveTopology,
    pub strip_index: Option<wgpu::IndexFormat>,
    pub cull: Option<wgpu::Face>,
    pub front_face: wgpu::FrontFace,
    pub targets: Vec<Option<wgpu::ColorTargetState>>,
    pub depth_stencil: Option<wgpu::DepthStencilState>,
}

pub fn color_targets(
    raster: &RasterState,
    formats: &[TextureFormat],
) -> Result<Vec<Option<wgpu::ColorTargetState>>, DeviceError> {
    let mut write_mask = wgpu::ColorWrites::empty();
    for (on, bit) in raster.color_mask.iter().zip([
        wgpu::ColorWrites::RED,
        wgpu::ColorWrites::GREEN,
        wgpu::ColorWrites::BLUE,
        wgpu::ColorWrites::ALPHA,
    ]) {
        if *on {
            write_mask |= bit;
        }
    }

    let blend = if raster.blend {
        let f = raster.blend_func;
        let e = raster.blend_equation;
        Some(wgpu::BlendState {
            color: convert::blend_component(f.src, f.dst, e.rgb)?,
            alpha: convert::blend_component(f.src_alpha, f.dst_alpha, e.alpha)?,
        })
    } else {
        None
    };

    Ok(formats
        .iter()
        .map(|format| {
            Some(wgpu::ColorTargetState {
                format: convert::texture_format(*format),
                // Only normalized targets blend; the rest write through.
                blend: blend.filter(|_| format.class() == FormatClass::Unorm),
                write_mask,
            })
        })
        .collect())
}

pub fn depth_stencil(
    raster: &RasterState,
    format: Option<TextureFormat>,
    triangles: bool,
) -> Option<wgpu::DepthStencilState> {
    let format = format?;

    let stencil = if format.has_stencil() && raster.stencil_test {
        let face = wgpu::StencilFaceState {
            compare: convert::compare(raster.stencil_func.func),
            fail_op: convert::stencil_op(raster.stencil_op.fail),
            depth_fail_op: convert::stencil_op(raster.stencil_op.zfail),
            pass_op: convert::stencil_op(raster.stencil_op.zpass),
        };
        wgpu::StencilState {
            front: face,
            back: face,
            read_mask: raster.stencil_func.mask,
            write_mask: raster.stencil_mask,
        }
    } else {
        wgpu::StencilState::default()
    };

    let bias = if triangles && raster.polygon_offset_fill {
        wgpu::DepthBiasState {
            constant: raster.polygon_offset[1] as i32,
            slope_scale: raster.polygon_offset[0],
            clamp: 0.0,
        }
    } else {
        wgpu::DepthBiasState::default()
    };

    let depth_test = raster.depth_test && format.has_depth();
    Some(wgpu::DepthStencilState {
        format: convert::texture_format(format),
        depth_write_enabled: depth_test && raster.depth_mask,
        depth_compare: if depth_test {
            convert::compare(raster.depth_func)
        } else {
            wgpu::CompareFunction::Always
        },
        stencil,
        bias,
    })
}

pub fn build(
    device: &wgpu::Device,
    program: &GpuProgram,
    key: &PipelineKey,
) -> wgpu::RenderPipeline {
    let attributes: Vec<[wgpu::VertexAttribute; 1]> = key
        .vertex
        .iter()
        .map(|slot| {
            [wgpu::VertexAttribute {
                format: slot.format,
                offset: 0,
                shader_location: slot.location,
            }]
        })
        .collect();
    let buffers: Vec<wgpu::VertexBufferLayout<'_>> = key
        .vertex
        .iter()
        .zip(&attributes)
        .map(|(slot, attrs)| wgpu::VertexBufferLayout {
            array_stride: slot.stride,
            step_mode: if slot.instanced {
                wgpu::VertexStepMode::Instance
            } else {
                wgpu::VertexStepMode::Vertex
            },
            attributes: attrs,
        })
        .collect();

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("retrace draw pipeline"),
        layout: Some(&program.layout),
        vertex: wgpu::VertexState {
            module: &program.vertex,
            entry_point: Some(VERTEX_ENTRY),
            compilation_options: Default::default(),
            buffers: &buffers,
        },
        fragment: Some(wgpu::FragmentState {
            module: &program.fragment,
            entry_point: Some(FRAGMENT_ENTRY),
            compilation_options: Default::default(),
            targets: &key.targets,
        }),
        primitive: wgpu::PrimitiveState {
            topology: key.topology,
            strip_index_format: key.strip_index,
            front_face: key.front_face,
            cull_mode: key.cull,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: key.depth_stencil.clone(),
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Limits;
    use crate::device::types::CompareFunc;

    fn raster() -> RasterState {
        RasterState::new(&Limits::default(), 4, 4)
    }

    #[test]
    fn depth_writes_need_the_test_enabled() {
        let mut r = raster();
        let ds = depth_stencil(&r, Some(TextureFormat::Depth24Stencil8), true).unwrap();
        assert!(!ds.depth_write_enabled);
        assert_eq!(ds.depth_compare, wgpu::CompareFunction::Always);

        r.depth_test = true;
        r.depth_func = CompareFunc::LessEqual;
        let ds = depth_stencil(&r, Some(TextureFormat::Depth24Stencil8), true).unwrap();
        assert!(ds.depth_write_enabled);
        assert_eq!(ds.depth_compare, wgpu::CompareFunction::LessEqual);
    }

    #[test]
    fn no_depth_attachment_means_no_state() {
        assert!(depth_stencil(&raster(), None, true).is_none());
    }

    #[test]
    fn blend_skips_integer_targets() {
        let mut r = raster();
        r.blend = true;
        let targets = color_targets(&r, &[TextureFormat::Rgba8, TextureFormat::R32ui]).unwrap();
        assert!(targets[0].as_ref().unwrap().blend.is_some());
        assert!(targets[1].as_ref().unwrap().blend.is_none());
    }

    #[test]
    fn color_mask_maps_to_write_mask() {
        let mut r = raster();
        r.color_mask = [true, false, true, false];
        let targets = color_targets(&r, &[TextureFormat::Rgba8]).unwrap();
        assert_eq!(
            targets[0].as_ref().unwrap().write_mask,
            wgpu::ColorWrites::RED | wgpu::ColorWrites::BLUE
        );
    }
}
