//! Applies a [`StateUpdate`] to the descriptor and the device.
//!
//! The whole update is validated before anything is committed, so a
//! rejected update leaves both the descriptor and the device untouched.
//! Facets are then committed in `StateUpdate` declaration order and only
//! those whose value differs from the descriptor reach the device.

use crate::context::ResourceTable;
use crate::device::types::{DrawBuffer, Rect};
use crate::device::{Device, Limits};
use crate::error::{Error, Result};
use crate::handle::ProgramId;

use super::defaults;
use super::descriptor::{Capability, RasterState, StateChange, StateDescriptor};
use super::update::StateUpdate;

pub(crate) fn apply_update<D: Device>(
    device: &mut D,
    table: &mut ResourceTable<D>,
    limits: &Limits,
    state: &mut StateDescriptor,
    update: &StateUpdate,
) -> Result<()> {
    let program = validate(table, limits, state, update)?;

    if let Some(p) = update.program {
        state.program = p;
    }
    if let Some(va) = update.vertex_array {
        state.vertex_array = va;
    }
    if let Some(ft) = update.frame_target {
        state.frame_target = ft;
    }

    for change in raster_changes(&state.raster, limits, update) {
        log::trace!("state: {change:?}");
        state.raster.apply(&change);
        device.set_state(&change);
    }

    if let Some(list) = &update.uniform_buffers {
        for (slot, binding) in state.uniform_buffers.iter_mut().zip(list) {
            *slot = *binding;
        }
    }
    if let Some(list) = &update.textures {
        for (slot, binding) in state.textures.iter_mut().zip(list) {
            *slot = *binding;
        }
    }

    // attributeDefaults, then drawBuffers.
    for change in late_changes(&state.raster, update) {
        log::trace!("state: {change:?}");
        state.raster.apply(&change);
        device.set_state(&change);
    }

    if let (Some(values), Some(program)) = (&update.uniforms, program) {
        let entry = table.programs.require_mut(program)?;
        for (name, value) in values {
            if entry.uniform(name).is_none() {
                continue;
            }
            entry.values.insert(name.clone(), value.clone());
        }
    }
    Ok(())
}

/// Checks every facet against the table and the limits.
///
/// Returns the program the `uniforms` facet resolves against.
fn validate<D: Device>(
    table: &ResourceTable<D>,
    limits: &Limits,
    state: &StateDescriptor,
    update: &StateUpdate,
) -> Result<Option<ProgramId>> {
    if let Some(Some(p)) = update.program {
        table.programs.require(p)?;
    }
    if let Some(Some(va)) = update.vertex_array {
        table.vertex_arrays.require(va)?;
    }
    if let Some(Some(ft)) = update.frame_target {
        table.frame_targets.require(ft)?;
    }

    if let Some(r) = update.viewport {
        check_extent("viewport", r)?;
        let [max_w, max_h] = limits.max_viewport_dims;
        Limits::check("maxViewportDims", r.width as u64, u64::from(max_w))?;
        Limits::check("maxViewportDims", r.height as u64, u64::from(max_h))?;
    }
    if let Some(r) = update.scissor {
        check_extent("scissor", r)?;
    }
    if let Some(c) = &update.blend_color {
        check_parts("blendColor", c.len())?;
    }
    if let Some([near, far]) = update.depth_range {
        if !near.is_finite() || !far.is_finite() {
            return Err(Error::invalid("depthRange must be finite"));
        }
    }
    if let Some(w) = update.line_width {
        if w.is_nan() || w <= 0.0 {
            return Err(Error::invalid(format!("lineWidth {w} must be positive")));
        }
    }

    if let Some(list) = &update.uniform_buffers {
        Limits::check(
            "maxUniformBufferBindings",
            list.len() as u64,
            u64::from(limits.max_uniform_buffer_bindings),
        )?;
        for binding in list.iter().flatten() {
            let buffer = table.buffers.require(binding.buffer)?;
            let end = binding.offset.checked_add(binding.size.unwrap_or(0));
            if binding.offset >= buffer.size || end.is_none_or(|end| end > buffer.size) {
                return Err(Error::invalid(format!(
                    "uniform range {}+{} outside {} ({} bytes)",
                    binding.offset,
                    binding.size.unwrap_or(0),
                    binding.buffer,
                    buffer.size
                )));
            }
        }
    }
    if let Some(list) = &update.textures {
        Limits::check(
            "maxCombinedTextureImageUnits",
            list.len() as u64,
            u64::from(limits.max_texture_units),
        )?;
        for binding in list.iter().flatten() {
            table.textures.require(binding.texture)?;
            if let Some(s) = binding.sampler {
                table.samplers.require(s)?;
            }
        }
    }
    if let Some(list) = &update.attribute_defaults {
        Limits::check(
            "maxVertexAttribs",
            list.len() as u64,
            u64::from(limits.max_vertex_attributes),
        )?;
        for value in list.iter().flatten() {
            check_parts("attributeDefaults", value.len())?;
        }
    }
    if let Some(list) = &update.draw_buffers {
        Limits::check(
            "maxDrawBuffers",
            list.len() as u64,
            u64::from(limits.max_draw_buffers),
        )?;
        for buffer in list {
            if let DrawBuffer::Color(i) = buffer {
                Limits::check(
                    "maxColorAttachments",
                    u64::from(*i) + 1,
                    u64::from(limits.max_color_attachments),
                )?;
            }
        }
    }

    let program = update.program.unwrap_or(state.program);
    if let Some(values) = &update.uniforms {
        let Some(id) = program else {
            return Err(Error::invalid("uniforms set with no program bound"));
        };
        let entry = table.programs.require(id)?;
        for (name, value) in values {
            match entry.uniform(name) {
                None => log::warn!("{id} has no uniform named {name:?}; ignored"),
                Some(decl) if !value.fits(decl.kind) => {
                    return Err(Error::invalid(format!(
                        "uniform {name:?} is {:?}, got {} components",
                        decl.kind,
                        value.len()
                    )));
                }
                Some(_) => {}
            }
        }
    }
    Ok(program)
}

fn check_extent(facet: &str, r: Rect) -> Result<()> {
    if r.width < 0 || r.height < 0 {
        return Err(Error::invalid(format!(
            "{facet} size {}x{} is negative",
            r.width, r.height
        )));
    }
    if r.checked_end().is_none() {
        return Err(Error::invalid(format!("{facet} {r:?} extends past i32")));
    }
    Ok(())
}

fn check_parts(facet: &str, len: usize) -> Result<()> {
    if len > 4 {
        return Err(Error::invalid(format!("{facet} has {len} components")));
    }
    Ok(())
}

fn push<T: PartialEq>(
    out: &mut Vec<StateChange>,
    current: T,
    next: Option<T>,
    wrap: impl FnOnce(T) -> StateChange,
) {
    if let Some(next) = next {
        if next != current {
            out.push(wrap(next));
        }
    }
}

/// Fixed-function facets from `viewport` through `dither`.
fn raster_changes(r: &RasterState, limits: &Limits, u: &StateUpdate) -> Vec<StateChange> {
    let mut out = Vec::new();
    let toggle = |cap| move |on| StateChange::Enable(cap, on);

    push(&mut out, r.viewport, u.viewport, StateChange::Viewport);
    push(&mut out, r.scissor_test, u.scissor_test, toggle(Capability::ScissorTest));
    push(&mut out, r.scissor, u.scissor, StateChange::Scissor);

    push(&mut out, r.blend, u.blend, toggle(Capability::Blend));
    push(
        &mut out,
        r.blend_func,
        u.blend_func.map(|f| f.resolve()),
        StateChange::BlendFunc,
    );
    push(
        &mut out,
        r.blend_equation,
        u.blend_equation.map(|e| e.resolve()),
        StateChange::BlendEquation,
    );
    push(
        &mut out,
        r.blend_color,
        u.blend_color
            .as_deref()
            .map(|c| defaults::fill4(c, defaults::BLEND_COLOR)),
        StateChange::BlendColor,
    );

    push(&mut out, r.cull, u.cull_enable, toggle(Capability::CullFace));
    push(&mut out, r.cull_face, u.cull_face, StateChange::CullFace);
    push(&mut out, r.front_face, u.front_face, StateChange::FrontFace);

    push(&mut out, r.depth_test, u.depth_test, toggle(Capability::DepthTest));
    push(&mut out, r.depth_func, u.depth_func, StateChange::DepthFunc);
    push(&mut out, r.depth_mask, u.depth_mask, StateChange::DepthMask);
    push(
        &mut out,
        r.depth_range,
        u.depth_range.map(|[n, f]| [n.clamp(0.0, 1.0), f.clamp(0.0, 1.0)]),
        StateChange::DepthRange,
    );

    push(&mut out, r.stencil_test, u.stencil_test, toggle(Capability::StencilTest));
    push(
        &mut out,
        r.stencil_func,
        u.stencil_func.map(|f| f.resolve()),
        StateChange::StencilFunc,
    );
    push(
        &mut out,
        r.stencil_op,
        u.stencil_op.map(|o| o.resolve()),
        StateChange::StencilOp,
    );
    push(&mut out, r.stencil_mask, u.stencil_mask, StateChange::StencilMask);

    push(&mut out, r.color_mask, u.color_mask, StateChange::ColorMask);
    push(
        &mut out,
        r.polygon_offset_fill,
        u.polygon_offset_fill,
        toggle(Capability::PolygonOffsetFill),
    );
    push(&mut out, r.polygon_offset, u.polygon_offset, StateChange::PolygonOffset);
    push(
        &mut out,
        r.line_width,
        u.line_width.map(|w| limits.clamp_line_width(w)),
        StateChange::LineWidth,
    );
    push(
        &mut out,
        r.rasterizer_discard,
        u.rasterizer_discard,
        toggle(Capability::RasterizerDiscard),
    );
    push(&mut out, r.dither, u.dither, toggle(Capability::Dither));
    out
}

/// `attributeDefaults` and `drawBuffers`.
fn late_changes(r: &RasterState, u: &StateUpdate) -> Vec<StateChange> {
    let mut out = Vec::new();
    if let Some(list) = &u.attribute_defaults {
        for (index, value) in list.iter().enumerate() {
            let value = value
                .as_deref()
                .map_or(defaults::ATTRIBUTE, |v| defaults::fill4(v, defaults::ATTRIBUTE));
            if r.attribute_defaults.get(index) != Some(&value) {
                out.push(StateChange::AttributeDefault {
                    index: index as u32,
                    value,
                });
            }
        }
    }
    if let Some(list) = &u.draw_buffers {
        if *list != r.draw_buffers {
            out.push(StateChange::DrawBuffers(list.clone()));
        }
    }
    out
}
