use crate::context::Context;
use crate::device::types::ClearValue;
use crate::device::{ClearOp, Device, Limits};
use crate::error::{Error, Result};
use crate::state::defaults;

use super::params::{ClearParams, ClearPattern};

/// The planes a `clear` call names.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Planes {
    Back,
    Color,
    Depth,
    Stencil,
    DepthStencil,
}

impl Planes {
    fn parse(tag: Option<&str>) -> Result<Self> {
        match tag {
            None | Some("back") => Ok(Planes::Back),
            Some("color") => Ok(Planes::Color),
            Some("depth") => Ok(Planes::Depth),
            Some("stencil") => Ok(Planes::Stencil),
            Some("depth_stencil") => Ok(Planes::DepthStencil),
            Some(other) => Err(Error::UnknownClearTarget(other.to_string())),
        }
    }
}

fn fill<T: Copy>(parts: &[T], base: [T; 4]) -> [T; 4] {
    let mut out = base;
    for (slot, v) in out.iter_mut().zip(parts) {
        *slot = *v;
    }
    out
}

fn pattern(p: &ClearParams) -> ClearValue {
    match (&p.value, &p.color) {
        (Some(ClearPattern::Float(v)), _) => ClearValue::Float(fill(v, [0.0; 4])),
        (Some(ClearPattern::Int(v)), _) => ClearValue::Int(fill(v, [0; 4])),
        (Some(ClearPattern::Uint(v)), _) => ClearValue::Uint(fill(v, [0; 4])),
        (None, Some(c)) => ClearValue::Float(defaults::fill4(c, defaults::CLEAR_COLOR)),
        (None, None) => ClearValue::Float(defaults::CLEAR_COLOR),
    }
}

/// Translates a clear request into device clear operations.
fn ops(p: &ClearParams, limits: &Limits) -> Result<Vec<ClearOp>> {
    let planes = Planes::parse(p.buffer.as_deref())?;
    let depth = p.depth.unwrap_or(defaults::CLEAR_DEPTH);
    let stencil = p.stencil.unwrap_or(0);
    let ops = match planes {
        Planes::Back => {
            let color = p.color.as_deref().unwrap_or(&[]);
            let mut ops = vec![ClearOp::Color {
                index: None,
                value: ClearValue::Float(defaults::fill4(color, defaults::CLEAR_COLOR)),
            }];
            match (p.depth, p.stencil) {
                (Some(d), Some(s)) => ops.push(ClearOp::DepthStencil(d, s)),
                (Some(d), None) => ops.push(ClearOp::Depth(d)),
                (None, Some(s)) => ops.push(ClearOp::Stencil(s)),
                (None, None) => {}
            }
            ops
        }
        Planes::Color => {
            let index = p.index.unwrap_or(0);
            Limits::check(
                "maxDrawBuffers",
                u64::from(index) + 1,
                u64::from(limits.max_draw_buffers),
            )?;
            vec![ClearOp::Color {
                index: Some(index),
                value: pattern(p),
            }]
        }
        Planes::Depth => vec![ClearOp::Depth(depth)],
        Planes::Stencil => vec![ClearOp::Stencil(stencil)],
        Planes::DepthStencil => vec![ClearOp::DepthStencil(depth, stencil)],
    };
    Ok(ops)
}

impl<D: Device> Context<D> {
    /// Clears planes of the bound frame target (or the default framebuffer).
    pub(super) fn clear_planes(&mut self, p: &ClearParams) -> Result<()> {
        let ops = ops(p, &self.limits)?;
        let target = match self.state.frame_target {
            Some(id) => Some(&self.table.frame_targets.require(id)?.target),
            None => None,
        };
        for op in ops {
            log::trace!("clear {op:?}");
            self.device.clear(target, op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Vec<ClearOp>> {
        let p: ClearParams = serde_json::from_str(json).unwrap();
        ops(&p, &Limits::default())
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = parse(r#"{"buffer": "accum"}"#).unwrap_err();
        assert!(matches!(err, Error::UnknownClearTarget(t) if t == "accum"));
    }

    #[test]
    fn back_fills_omitted_colour_parts() {
        assert_eq!(
            parse(r#"{"color": [1, 0.5]}"#).unwrap(),
            vec![ClearOp::Color {
                index: None,
                value: ClearValue::Float([1.0, 0.5, 0.0, 1.0]),
            }]
        );
        assert_eq!(
            parse(r#"{"buffer": "back", "depth": 0.5}"#).unwrap()[1],
            ClearOp::Depth(0.5)
        );
    }

    #[test]
    fn plane_tags_use_defaults() {
        assert_eq!(
            parse(r#"{"buffer": "depth"}"#).unwrap(),
            vec![ClearOp::Depth(1.0)]
        );
        assert_eq!(
            parse(r#"{"buffer": "depth_stencil", "stencil": 3}"#).unwrap(),
            vec![ClearOp::DepthStencil(1.0, 3)]
        );
    }

    #[test]
    fn integer_clear_of_normalized_target_is_advisory() {
        use crate::device::{SoftDevice, SoftDeviceOptions};
        use crate::error::StatusError;
        use crate::exec::ExecutorExt;

        let mut ctx = Context::new(SoftDevice::new(SoftDeviceOptions::default()));
        ctx.clear(ClearParams {
            buffer: Some("color".into()),
            index: Some(0),
            value: Some(ClearPattern::Int(vec![1, 2, 3, 4])),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(ctx.check_status().unwrap(), Some(StatusError::InvalidOperation));
        assert_eq!(ctx.check_status().unwrap(), None);
    }

    #[test]
    fn typed_colour_clear_checks_index() {
        assert_eq!(
            parse(r#"{"buffer": "color", "index": 1, "value": {"int": [-1, 2]}}"#).unwrap(),
            vec![ClearOp::Color {
                index: Some(1),
                value: ClearValue::Int([-1, 2, 0, 0]),
            }]
        );
        assert!(matches!(
            parse(r#"{"buffer": "color", "index": 9}"#),
            Err(Error::LimitExceeded {
                limit: "maxDrawBuffers",
                ..
            })
        ));
    }
}
