use crate::context::Context;
use crate::device::{BufferRange, Device, DrawCall, DrawRange, TextureUnit};
use crate::error::{Error, Result};

use super::params::DrawParams;

/// Vertices `first..first + count` must be addressable with `u32`.
fn check_span(first: u32, count: u32) -> Result<()> {
    match first.checked_add(count) {
        Some(_) => Ok(()),
        None => Err(Error::invalid(format!(
            "draw of {count} vertices from {first} runs past the last vertex index"
        ))),
    }
}

/// Picks the draw form from the fields that are present.
fn range(p: &DrawParams, multi_draw: bool) -> Result<DrawRange> {
    if let Some(draw_count) = p.draw_count {
        if p.instance_count.is_some() || p.index_type.is_some() {
            return Err(Error::invalid(
                "drawCount cannot be combined with instanceCount or indexType",
            ));
        }
        if !multi_draw {
            return Err(Error::Unsupported("multi_draw".into()));
        }
        let (Some(firsts), Some(counts)) = (&p.firsts, &p.counts) else {
            return Err(Error::invalid("multi-draw needs firsts and counts"));
        };
        let n = draw_count as usize;
        if firsts.len() < n || counts.len() < n {
            return Err(Error::invalid(format!(
                "drawCount {n} exceeds firsts ({}) or counts ({})",
                firsts.len(),
                counts.len()
            )));
        }
        for (&first, &count) in firsts.iter().zip(counts).take(n) {
            check_span(first, count)?;
        }
        return Ok(DrawRange::MultiArrays {
            firsts: firsts[..n].to_vec(),
            counts: counts[..n].to_vec(),
        });
    }

    let count = p.count.ok_or_else(|| Error::invalid("draw needs a count"))?;
    let instances = p.instance_count.unwrap_or(1);
    Ok(match p.index_type {
        Some(index_type) => {
            let offset = p.offset.unwrap_or(0);
            let bytes = u64::from(count) * index_type.size() as u64;
            if offset.checked_add(bytes).is_none() {
                return Err(Error::invalid(format!(
                    "{count} indices at byte offset {offset} run past the end of any buffer"
                )));
            }
            DrawRange::Elements {
                index_type,
                offset,
                count,
                instances,
            }
        }
        None => {
            let first = p.first.unwrap_or(0);
            check_span(first, count)?;
            DrawRange::Arrays {
                first,
                count,
                instances,
            }
        }
    })
}

impl<D: Device> Context<D> {
    /// Resolves the bound state into a device draw call and issues it.
    pub(super) fn draw_primitives(&mut self, p: &DrawParams) -> Result<()> {
        let range = range(p, self.limits.extensions.multi_draw)?;
        let table = &self.table;
        let state = &self.state;

        let program_id = state
            .program
            .ok_or_else(|| Error::invalid("draw with no program bound"))?;
        let program = table.programs.require(program_id)?;

        let mut vertex_array = None;
        let mut vertex_buffers = Vec::new();
        let mut index_buffer = None;
        if let Some(id) = state.vertex_array {
            let entry = table.vertex_arrays.require(id)?;
            for &b in &entry.buffers {
                vertex_buffers.push(&table.buffers.require(b)?.buffer);
            }
            if let Some(b) = entry.indices {
                index_buffer = Some(&table.buffers.require(b)?.buffer);
            }
            vertex_array = Some(&entry.vertex_array);
        }
        if matches!(range, DrawRange::Elements { .. }) && index_buffer.is_none() {
            return Err(Error::invalid(
                "indexed draw needs a vertex array with an index buffer",
            ));
        }

        let mut textures = Vec::with_capacity(state.textures.len());
        for slot in &state.textures {
            textures.push(match slot {
                Some(binding) => Some(TextureUnit {
                    texture: &table.textures.require(binding.texture)?.texture,
                    sampler: match binding.sampler {
                        Some(s) => Some(&table.samplers.require(s)?.sampler),
                        None => None,
                    },
                }),
                None => None,
            });
        }

        let mut uniform_buffers = Vec::with_capacity(state.uniform_buffers.len());
        for slot in &state.uniform_buffers {
            uniform_buffers.push(match slot {
                Some(binding) => Some(BufferRange {
                    buffer: &table.buffers.require(binding.buffer)?.buffer,
                    offset: binding.offset,
                    size: binding.size,
                }),
                None => None,
            });
        }

        let target = match state.frame_target {
            Some(id) => Some(&table.frame_targets.require(id)?.target),
            None => None,
        };

        let call = DrawCall {
            program: &*program.program,
            uniforms: &program.values,
            vertex_array,
            vertex_buffers,
            index_buffer,
            textures,
            uniform_buffers,
            target,
            topology: p.topology.unwrap_or_default(),
            range,
        };
        log::trace!("draw {:?} {:?}", call.topology, call.range);
        self.device.draw(&call)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::{IndexType, Topology};
    use proptest::prelude::*;

    #[test]
    fn plain_arrays_default_first_and_instances() {
        let p = DrawParams {
            count: Some(3),
            ..Default::default()
        };
        assert_eq!(
            range(&p, false).unwrap(),
            DrawRange::Arrays {
                first: 0,
                count: 3,
                instances: 1
            }
        );
    }

    #[test]
    fn indexed_instanced() {
        let p = DrawParams {
            instance_count: Some(4),
            offset: Some(6),
            ..DrawParams::elements(Topology::Triangles, IndexType::Uint16, 6)
        };
        assert_eq!(
            range(&p, false).unwrap(),
            DrawRange::Elements {
                index_type: IndexType::Uint16,
                offset: 6,
                count: 6,
                instances: 4
            }
        );
    }

    #[test]
    fn multi_draw_truncates_to_draw_count() {
        let p = DrawParams {
            draw_count: Some(2),
            firsts: Some(vec![0, 3, 6]),
            counts: Some(vec![3, 3, 3]),
            ..Default::default()
        };
        assert_eq!(
            range(&p, true).unwrap(),
            DrawRange::MultiArrays {
                firsts: vec![0, 3],
                counts: vec![3, 3]
            }
        );
        assert!(matches!(range(&p, false), Err(Error::Unsupported(e)) if e == "multi_draw"));
    }

    #[test]
    fn multi_draw_rejects_mixed_forms() {
        let p = DrawParams {
            draw_count: Some(1),
            instance_count: Some(2),
            firsts: Some(vec![0]),
            counts: Some(vec![3]),
            ..Default::default()
        };
        assert!(matches!(range(&p, true), Err(Error::InvalidArgument(_))));

        let short = DrawParams {
            draw_count: Some(3),
            firsts: Some(vec![0]),
            counts: Some(vec![3]),
            ..Default::default()
        };
        assert!(matches!(range(&short, true), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn ranges_past_the_index_space_are_rejected() {
        let arrays = DrawParams::arrays(Topology::Triangles, u32::MAX, 3);
        assert!(matches!(range(&arrays, false), Err(Error::InvalidArgument(_))));

        let elements = DrawParams {
            offset: Some(u64::MAX - 2),
            ..DrawParams::elements(Topology::Triangles, IndexType::Uint16, 3)
        };
        assert!(matches!(range(&elements, false), Err(Error::InvalidArgument(_))));

        let multi = DrawParams {
            draw_count: Some(2),
            firsts: Some(vec![0, u32::MAX - 1]),
            counts: Some(vec![3, 3]),
            ..Default::default()
        };
        assert!(matches!(range(&multi, true), Err(Error::InvalidArgument(_))));

        let edge = DrawParams::arrays(Topology::Triangles, u32::MAX - 3, 3);
        assert!(range(&edge, false).is_ok());
    }

    #[test]
    fn count_is_required() {
        assert!(matches!(
            range(&DrawParams::default(), true),
            Err(Error::InvalidArgument(_))
        ));
    }

    proptest! {
        #[test]
        fn array_spans_stay_in_u32(first in any::<u32>(), count in any::<u32>()) {
            let p = DrawParams::arrays(Topology::Triangles, first, count);
            let fits = first.checked_add(count).is_some();
            match range(&p, false) {
                Ok(_) => prop_assert!(fits),
                Err(e) => prop_assert!(!fits && matches!(e, Error::InvalidArgument(_)), "{e}"),
            }
        }

        #[test]
        fn index_spans_stay_in_u64(offset in any::<u64>(), count in any::<u32>()) {
            let p = DrawParams {
                offset: Some(offset),
                ..DrawParams::elements(Topology::Triangles, IndexType::Uint32, count)
            };
            let fits = offset.checked_add(u64::from(count) * 4).is_some();
            prop_assert_eq!(range(&p, false).is_ok(), fits);
        }
    }
}
