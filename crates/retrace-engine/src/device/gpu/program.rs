use std::borrow::Cow;
use std::collections::BTreeMap;
use std::num::NonZeroU64;

use crate::device::types::{UniformDecl, UniformKind, UniformValue};
use crate::device::{DeviceError, ProgramDesc};

/// Entry points every program module must export.
pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Placement of the declared loose uniforms inside the default uniform block
/// (group 0, binding 0).
///
/// Sampler uniforms are texture units, not block members, and are skipped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UniformLayout {
    members: Vec<(String, UniformKind, usize)>,
    size: usize,
}

impl UniformLayout {
    pub fn new(decls: &[UniformDecl]) -> Self {
        let mut members = Vec::new();
        let mut offset = 0usize;
        for decl in decls {
            if decl.kind == UniformKind::Sampler2d {
                continue;
            }
            let (size, align) = decl.kind.block_layout();
            offset = offset.next_multiple_of(align);
            members.push((decl.name.clone(), decl.kind, offset));
            offset += size;
        }
        Self {
            members,
            size: offset.next_multiple_of(16),
        }
    }

    /// Block size in bytes; 0 when there are no loose uniforms.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Packs current values. Unset or mismatched members stay zero.
    pub fn pack(&self, values: &BTreeMap<String, UniformValue>) -> Vec<u8> {
        let mut out = vec![0u8; self.size];
        for (name, kind, offset) in &self.members {
            let Some(value) = values.get(name) else {
                continue;
            };
            if !value.fits(*kind) {
                continue;
            }
            let words = value.to_words();
            let bytes: &[u8] = bytemuck::cast_slice(&words);
            out[*offset..*offset + bytes.len()].copy_from_slice(bytes);
        }
        out
    }
}

/// Prepends one `const NAME: bool = true;` per flag.
pub fn with_flags(source: &str, flags: &[String]) -> Result<String, DeviceError> {
    let mut out = String::with_capacity(source.len() + flags.len() * 32);
    for flag in flags {
        let valid = flag
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && flag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(DeviceError::Rejected(format!("invalid program flag {flag:?}")));
        }
        out.push_str("const ");
        out.push_str(flag);
        out.push_str(": bool = true;\n");
    }
    out.push_str(source);
    Ok(out)
}

pub struct GpuProgram {
    pub(super) id: u64,
    pub(super) vertex: wgpu::ShaderModule,
    pub(super) fragment: wgpu::ShaderModule,
    pub(super) uniforms: UniformLayout,
    pub(super) blocks: usize,
    pub(super) textures: usize,
    pub(super) uniform_group: wgpu::BindGroupLayout,
    pub(super) texture_group: wgpu::BindGroupLayout,
    pub(super) layout: wgpu::PipelineLayout,
}

impl GpuProgram {
    pub(super) fn new(
        device: &wgpu::Device,
        id: u64,
        desc: &ProgramDesc<'_>,
    ) -> Result<Self, DeviceError> {
        if desc.vertex.trim().is_empty() || desc.fragment.trim().is_empty() {
            return Err(DeviceError::Rejected("empty shader source".into()));
        }
        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("retrace vertex module"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(with_flags(desc.vertex, desc.flags)?)),
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("retrace fragment module"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(with_flags(desc.fragment, desc.flags)?)),
        });

        let uniforms = UniformLayout::new(desc.uniforms);
        let visibility = wgpu::ShaderStages::VERTEX_FRAGMENT;

        let mut entries = Vec::new();
        if uniforms.size() > 0 {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(uniforms.size() as u64),
                },
                count: None,
            });
        }
        for i in 0..desc.uniform_blocks.len() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 1 + i as u32,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        let uniform_group = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("retrace uniform group"),
            entries: &entries,
        });

        let mut entries = Vec::new();
        for i in 0..desc.textures.len() as u32 {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2 * i,
                visibility,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2 * i + 1,
                visibility,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }
        let texture_group = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("retrace texture group"),
            entries: &entries,
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("retrace program layout"),
            bind_group_layouts: &[&uniform_group, &texture_group],
            immediate_size: 0,
        });

        Ok(Self {
            id,
            vertex,
            fragment,
            uniforms,
            blocks: desc.uniform_blocks.len(),
            textures: desc.textures.len(),
            uniform_group,
            texture_group,
            layout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, kind: UniformKind) -> UniformDecl {
        UniformDecl {
            name: name.into(),
            kind,
        }
    }

    #[test]
    fn layout_follows_block_alignment() {
        let layout = UniformLayout::new(&[
            decl("t", UniformKind::Float),
            decl("tex", UniformKind::Sampler2d),
            decl("color", UniformKind::Vec4),
            decl("offset", UniformKind::Vec2),
        ]);
        // float @0, vec4 @16, vec2 @32, rounded to 48.
        assert_eq!(layout.size(), 48);
        let mut values = BTreeMap::new();
        values.insert("color".to_string(), UniformValue::Float(vec![1.0, 0.0, 0.0, 1.0]));
        let packed = layout.pack(&values);
        assert_eq!(&packed[16..20], &1.0f32.to_le_bytes());
        assert_eq!(&packed[28..32], &1.0f32.to_le_bytes());
        assert!(packed[..16].iter().all(|b| *b == 0));
    }

    #[test]
    fn samplers_alone_need_no_block() {
        let layout = UniformLayout::new(&[decl("tex", UniformKind::Sampler2d)]);
        assert_eq!(layout.size(), 0);
    }

    #[test]
    fn mismatched_values_are_left_zero() {
        let layout = UniformLayout::new(&[decl("n", UniformKind::Int)]);
        let mut values = BTreeMap::new();
        values.insert("n".to_string(), UniformValue::Float(vec![2.0]));
        assert_eq!(layout.pack(&values), vec![0u8; 16]);
    }

    #[test]
    fn flags_become_constants() {
        let src = with_flags("fn main() {}", &["USE_FOG".into(), "_x1".into()]).unwrap();
        assert!(src.starts_with("const USE_FOG: bool = true;\nconst _x1: bool = true;\n"));
        assert!(with_flags("", &["1bad".into()]).is_err());
        assert!(with_flags("", &["has space".into()]).is_err());
    }
}
