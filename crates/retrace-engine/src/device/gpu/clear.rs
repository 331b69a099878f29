//! Scissored and masked clears.
//!
//! A wgpu load-op clear always covers the whole attachment. GL clears honour
//! the scissor box, the colour mask and the stencil write mask, so those
//! cases draw a full-screen triangle with a solid colour and a fixed depth
//! instead.

use std::collections::HashMap;
use std::num::NonZeroU64;

use wgpu::util::DeviceExt;

const CLEAR_WGSL: &str = r#"
struct Clear {
    color: vec4<f32>,
    depth: vec4<f32>,
};

@group(0) @binding(0) var<uniform> clear: Clear;

@vertex
fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    let x = f32((i << 1u) & 2u) * 2.0 - 1.0;
    let y = f32(i & 2u) * 2.0 - 1.0;
    return vec4<f32>(x, y, clear.depth.x, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return clear.color;
}
"#;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuadKey {
    color: Option<(wgpu::TextureFormat, wgpu::ColorWrites)>,
    depth_stencil: Option<(wgpu::TextureFormat, bool, u32)>,
}

/// One quad clear. `scissor` is already in wgpu (top-left) coordinates.
pub struct QuadClear<'a> {
    pub color: Option<(&'a wgpu::TextureView, wgpu::TextureFormat, wgpu::ColorWrites, [f32; 4])>,
    pub depth_stencil: Option<(&'a wgpu::TextureView, wgpu::TextureFormat)>,
    pub depth: Option<f32>,
    /// Value and write mask.
    pub stencil: Option<(u32, u32)>,
    pub scissor: [u32; 4],
}

pub struct ClearQuad {
    module: wgpu::ShaderModule,
    group: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
    pipelines: HashMap<QuadKey, wgpu::RenderPipeline>,
}

impl ClearQuad {
    pub fn new(device: &wgpu::Device) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("retrace clear shader"),
            source: wgpu::ShaderSource::Wgsl(CLEAR_WGSL.into()),
        });
        let group = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("retrace clear group"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(32),
                },
                count: None,
            }],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("retrace clear layout"),
            bind_group_layouts: &[&group],
            immediate_size: 0,
        });
        Self {
            module,
            group,
            layout,
            pipelines: HashMap::new(),
        }
    }

    fn pipeline(&mut self, device: &wgpu::Device, key: &QuadKey) -> &wgpu::RenderPipeline {
        let (module, layout) = (&self.module, &self.layout);
        self.pipelines.entry(key.clone()).or_insert_with(|| {
            let targets: Vec<Option<wgpu::ColorTargetState>> = key
                .color
                .iter()
                .map(|(format, write_mask)| {
                    Some(wgpu::ColorTargetState {
                        format: *format,
                        blend: None,
                        write_mask: *write_mask,
                    })
                })
                .collect();
            let depth_stencil = key.depth_stencil.map(|(format, depth_write, stencil_mask)| {
                let face = wgpu::StencilFaceState {
                    compare: wgpu::CompareFunction::Always,
                    fail_op: wgpu::StencilOperation::Keep,
                    depth_fail_op: wgpu::StencilOperation::Keep,
                    pass_op: wgpu::StencilOperation::Replace,
                };
                wgpu::DepthStencilState {
                    format,
                    depth_write_enabled: depth_write,
                    depth_compare: wgpu::CompareFunction::Always,
                    stencil: wgpu::StencilState {
                        front: face,
                        back: face,
                        read_mask: u32::MAX,
                        write_mask: stencil_mask,
                    },
                    bias: wgpu::DepthBiasState::default(),
                }
            });

            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("retrace clear pipeline"),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: (!targets.is_empty()).then(|| wgpu::FragmentState {
                    module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        })
    }

    pub fn run(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, req: &QuadClear<'_>) {
        let key = QuadKey {
            color: req.color.map(|(_, format, mask, _)| (format, mask)),
            depth_stencil: req.depth_stencil.map(|(_, format)| {
                (format, req.depth.is_some(), req.stencil.map_or(0, |(_, mask)| mask))
            }),
        };

        let color = req.color.map_or([0.0; 4], |(_, _, _, c)| c);
        let uniform: [f32; 8] = [
            color[0],
            color[1],
            color[2],
            color[3],
            req.depth.unwrap_or(0.0),
            0.0,
            0.0,
            0.0,
        ];
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("retrace clear uniforms"),
            contents: bytemuck::cast_slice(&uniform),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("retrace clear bind group"),
            layout: &self.group,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });

        let load = wgpu::Operations {
            load: wgpu::LoadOp::Load,
            store: wgpu::StoreOp::Store,
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = req
            .color
            .iter()
            .map(|(view, ..)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: load,
                    depth_slice: None,
                })
            })
            .collect();
        let depth_stencil_attachment =
            req.depth_stencil
                .map(|(view, format)| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: format.has_depth_aspect().then_some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: format.has_stencil_aspect().then_some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                });

        let pipeline = self.pipeline(device, &key);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("retrace clear encoder"),
        });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("retrace clear pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, &bind_group, &[]);
            let [x, y, w, h] = req.scissor;
            rpass.set_scissor_rect(x, y, w, h);
            if let Some((value, _)) = req.stencil {
                rpass.set_stencil_reference(value);
            }
            rpass.draw(0..3, 0..1);
        }
        queue.submit(std::iter::once(encoder.finish()));
    }
}
