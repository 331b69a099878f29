use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Optional device features the executor may route through.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Extensions {
    /// Multi-draw (several ranges in one draw call).
    pub multi_draw: bool,
    /// Elapsed-time queries around a span of commands.
    pub timer_query: bool,
}

/// Capability limits queried once from the device at context creation.
///
/// Every request exceeding one of these fails fast with
/// [`Error::LimitExceeded`] naming the limit, before the device sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub max_texture_size: u32,
    pub max_renderbuffer_size: u32,
    pub max_draw_buffers: u32,
    pub max_color_attachments: u32,
    pub max_uniform_buffer_bindings: u32,
    pub max_texture_units: u32,
    pub max_vertex_attributes: u32,
    pub max_samples: u32,
    pub max_viewport_dims: [u32; 2],
    pub max_buffer_size: u64,
    pub line_width_range: [f32; 2],
    pub extensions: Extensions,
}

impl Default for Limits {
    /// The guaranteed minimums of a WebGL 2 implementation.
    fn default() -> Self {
        Self {
            max_texture_size: 2048,
            max_renderbuffer_size: 2048,
            max_draw_buffers: 4,
            max_color_attachments: 4,
            max_uniform_buffer_bindings: 24,
            max_texture_units: 16,
            max_vertex_attributes: 16,
            max_samples: 4,
            max_viewport_dims: [4096, 4096],
            max_buffer_size: 1 << 28,
            line_width_range: [1.0, 1.0],
            extensions: Extensions::default(),
        }
    }
}

impl Limits {
    /// `Err(LimitExceeded)` when `requested > max`.
    pub fn check(limit: &'static str, requested: u64, max: u64) -> Result<()> {
        if requested > max {
            log::debug!("limit {limit} exceeded: {requested} > {max}");
            return Err(Error::LimitExceeded {
                limit,
                requested,
                max,
            });
        }
        Ok(())
    }

    pub fn check_texture_size(&self, width: u32, height: u32) -> Result<()> {
        let max = u64::from(self.max_texture_size);
        Self::check("maxTextureSize", u64::from(width), max)?;
        Self::check("maxTextureSize", u64::from(height), max)
    }

    pub fn check_renderbuffer_size(&self, width: u32, height: u32) -> Result<()> {
        let max = u64::from(self.max_renderbuffer_size);
        Self::check("maxRenderbufferSize", u64::from(width), max)?;
        Self::check("maxRenderbufferSize", u64::from(height), max)
    }

    /// Clamps a requested line width into the supported range.
    pub fn clamp_line_width(&self, width: f32) -> f32 {
        width.clamp(self.line_width_range[0], self.line_width_range[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_names_the_limit() {
        let err = Limits::check("maxDrawBuffers", 9, 4).unwrap_err();
        match err {
            Error::LimitExceeded {
                limit,
                requested,
                max,
            } => {
                assert_eq!(limit, "maxDrawBuffers");
                assert_eq!((requested, max), (9, 4));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(Limits::check("maxDrawBuffers", 4, 4).is_ok());
    }

    #[test]
    fn texture_size_checks_both_axes() {
        let limits = Limits::default();
        assert!(limits.check_texture_size(2048, 1).is_ok());
        assert!(limits.check_texture_size(1, 2049).is_err());
    }

    #[test]
    fn limits_round_trip_through_json() {
        let limits = Limits::default();
        let text = serde_json::to_string(&limits).unwrap();
        assert!(text.contains("\"maxTextureSize\":2048"));
        let back: Limits = serde_json::from_str(&text).unwrap();
        assert_eq!(back, limits);
    }
}
