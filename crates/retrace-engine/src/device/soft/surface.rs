use crate::device::texel::{self, Texel};
use crate::device::types::{Filter, Rect, SamplerDesc, TextureFormat};
use crate::device::{DeviceError, TextureRegion};

/// A single-level 2D image. Rows are stored bottom-up.
///
/// Colour formats keep their texels encoded in upload layout; depth formats
/// keep a float depth plane and, for `depth24_stencil8`, a stencil plane.
#[derive(Debug, Clone, Default)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    color: Vec<u8>,
    depth: Vec<f32>,
    stencil: Vec<u8>,
}

fn zeroed<T: Clone>(len: usize, fill: T) -> Result<Vec<T>, DeviceError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| DeviceError::OutOfMemory)?;
    v.resize(len, fill);
    Ok(v)
}

impl Surface {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Result<Self, DeviceError> {
        let texels = width as usize * height as usize;
        let mut s = Surface {
            width,
            height,
            format,
            ..Default::default()
        };
        if format.is_color() {
            s.color = zeroed(texels * format.texel_size(), 0)?;
        } else {
            s.depth = zeroed(texels, 1.0)?;
            if format.has_stencil() {
                s.stencil = zeroed(texels, 0)?;
            }
        }
        Ok(s)
    }

    /// Infallible variant of [`Surface::new`] for fixed-size framebuffers.
    pub fn blank(width: u32, height: u32, format: TextureFormat) -> Self {
        let texels = width as usize * height as usize;
        let mut s = Surface {
            width,
            height,
            format,
            ..Default::default()
        };
        if format.is_color() {
            s.color = vec![0; texels * format.texel_size()];
        } else {
            s.depth = vec![1.0; texels];
            if format.has_stencil() {
                s.stencil = vec![0; texels];
            }
        }
        s
    }

    #[inline]
    pub fn rect(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    #[inline]
    pub fn has_color(&self) -> bool {
        self.format.is_color()
    }

    #[inline]
    pub fn has_depth(&self) -> bool {
        !self.depth.is_empty()
    }

    #[inline]
    pub fn has_stencil(&self) -> bool {
        !self.stencil.is_empty()
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    pub fn texel(&self, x: i32, y: i32) -> Texel {
        match self.index(x, y) {
            Some(i) if self.has_color() => {
                let size = self.format.texel_size();
                texel::decode(self.format, &self.color[i * size..(i + 1) * size])
            }
            Some(i) => Texel::Float([self.depth[i], 0.0, 0.0, 1.0]),
            None => Texel::Float([0.0; 4]),
        }
    }

    pub fn set_texel(&mut self, x: i32, y: i32, value: Texel) {
        if !self.has_color() {
            return;
        }
        if let Some(i) = self.index(x, y) {
            let size = self.format.texel_size();
            texel::encode(self.format, value, &mut self.color[i * size..(i + 1) * size]);
        }
    }

    pub fn depth(&self, x: i32, y: i32) -> f32 {
        self.index(x, y)
            .and_then(|i| self.depth.get(i).copied())
            .unwrap_or(1.0)
    }

    pub fn set_depth(&mut self, x: i32, y: i32, z: f32) {
        if let Some(i) = self.index(x, y) {
            if let Some(d) = self.depth.get_mut(i) {
                *d = z.clamp(0.0, 1.0);
            }
        }
    }

    pub fn stencil(&self, x: i32, y: i32) -> u8 {
        self.index(x, y)
            .and_then(|i| self.stencil.get(i).copied())
            .unwrap_or(0)
    }

    pub fn set_stencil(&mut self, x: i32, y: i32, value: u8) {
        if let Some(i) = self.index(x, y) {
            if let Some(s) = self.stencil.get_mut(i) {
                *s = value;
            }
        }
    }

    /// Copies tightly packed bottom-up rows into `region`.
    pub fn upload(&mut self, region: TextureRegion, data: &[u8]) -> Result<(), DeviceError> {
        let past = |at: u32, len: u32, max: u32| at.checked_add(len).is_none_or(|end| end > max);
        if past(region.x, region.width, self.width) || past(region.y, region.height, self.height) {
            return Err(DeviceError::Rejected(format!(
                "region {}x{}+{}+{} outside {}x{} surface",
                region.width, region.height, region.x, region.y, self.width, self.height
            )));
        }
        let size = self.format.texel_size();
        let expected = region.width as usize * region.height as usize * size;
        if data.len() < expected {
            return Err(DeviceError::Rejected(format!(
                "upload needs {expected} bytes, got {}",
                data.len()
            )));
        }

        for row in 0..region.height {
            for col in 0..region.width {
                let src = (row as usize * region.width as usize + col as usize) * size;
                let bytes = &data[src..src + size];
                let (x, y) = ((region.x + col) as i32, (region.y + row) as i32);
                match self.format {
                    TextureFormat::Depth32f => {
                        let depth = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                        self.set_depth(x, y, depth);
                    }
                    TextureFormat::Depth24Stencil8 => {
                        let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                        let (d, s) = texel::unpack_depth24_stencil8(word);
                        self.set_depth(x, y, d);
                        self.set_stencil(x, y, s);
                    }
                    format => {
                        let t = texel::decode(format, bytes);
                        self.set_texel(x, y, t);
                    }
                }
            }
        }
        Ok(())
    }

    /// Samples at normalized coordinates with the sampler's magnification
    /// filter.
    pub fn sample(&self, uv: [f32; 2], sampler: &SamplerDesc) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0, 0.0, 0.0, 1.0];
        }
        let fetch = |x: i64, y: i64| {
            let tx = sampler.wrap_s.apply(x, self.width);
            let ty = sampler.wrap_t.apply(y, self.height);
            self.texel(tx as i32, ty as i32).to_f32()
        };

        let u = uv[0] * self.width as f32;
        let v = uv[1] * self.height as f32;
        match sampler.mag_filter {
            Filter::Nearest => fetch(u.floor() as i64, v.floor() as i64),
            Filter::Linear => {
                let fx = u - 0.5;
                let fy = v - 0.5;
                let (x0, y0) = (fx.floor(), fy.floor());
                let (ax, ay) = (fx - x0, fy - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);
                let t00 = fetch(x0, y0);
                let t10 = fetch(x0 + 1, y0);
                let t01 = fetch(x0, y0 + 1);
                let t11 = fetch(x0 + 1, y0 + 1);
                std::array::from_fn(|i| {
                    let bottom = t00[i] + (t10[i] - t00[i]) * ax;
                    let top = t01[i] + (t11[i] - t01[i]) * ax;
                    bottom + (top - bottom) * ay
                })
            }
        }
    }

    /// Fills the colour plane inside `rect`, honouring a channel mask.
    pub fn fill_color(&mut self, rect: Rect, value: Texel, mask: [bool; 4]) {
        let r = rect.intersect(self.rect());
        let value = value.convert(self.format);
        for y in r.y..r.y + r.height {
            for x in r.x..r.x + r.width {
                let old = self.texel(x, y);
                self.set_texel(x, y, value.masked(old, mask));
            }
        }
    }

    pub fn fill_depth(&mut self, rect: Rect, z: f32) {
        let r = rect.intersect(self.rect());
        for y in r.y..r.y + r.height {
            for x in r.x..r.x + r.width {
                self.set_depth(x, y, z);
            }
        }
    }

    /// Writes `value` through the stencil write mask.
    pub fn fill_stencil(&mut self, rect: Rect, value: u8, write_mask: u8) {
        let r = rect.intersect(self.rect());
        for y in r.y..r.y + r.height {
            for x in r.x..r.x + r.width {
                let old = self.stencil(x, y);
                self.set_stencil(x, y, (old & !write_mask) | (value & write_mask));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::Wrap;

    #[test]
    fn depth_surface_has_no_colour_plane() {
        let s = Surface::new(2, 2, TextureFormat::Depth24Stencil8).unwrap();
        assert!(!s.has_color());
        assert!(s.has_depth());
        assert!(s.has_stencil());
        assert_eq!(s.depth(0, 0), 1.0);
    }

    #[test]
    fn upload_places_rows_bottom_up() {
        let mut s = Surface::new(2, 2, TextureFormat::R8).unwrap();
        let region = TextureRegion {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
        };
        s.upload(region, &[10, 20, 30, 40]).unwrap();
        assert_eq!(s.texel(1, 0).to_f32()[0], 20.0 / 255.0);
        assert_eq!(s.texel(0, 1).to_f32()[0], 30.0 / 255.0);
    }

    #[test]
    fn upload_outside_bounds_is_rejected() {
        let mut s = Surface::new(2, 2, TextureFormat::R8).unwrap();
        let region = TextureRegion {
            x: 1,
            y: 1,
            width: 2,
            height: 2,
        };
        assert!(s.upload(region, &[0; 4]).is_err());

        let wrapping = TextureRegion {
            x: u32::MAX,
            y: 0,
            width: 2,
            height: 1,
        };
        assert!(s.upload(wrapping, &[0; 2]).is_err());
    }

    #[test]
    fn nearest_sampling_with_clamp() {
        let mut s = Surface::new(2, 1, TextureFormat::Rgba8).unwrap();
        s.set_texel(0, 0, Texel::Float([1.0, 0.0, 0.0, 1.0]));
        s.set_texel(1, 0, Texel::Float([0.0, 1.0, 0.0, 1.0]));
        let sampler = SamplerDesc {
            mag_filter: Filter::Nearest,
            wrap_s: Wrap::ClampToEdge,
            ..Default::default()
        };
        assert_eq!(s.sample([0.25, 0.5], &sampler), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(s.sample([1.5, 0.5], &sampler), [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn linear_sampling_blends_neighbours() {
        let mut s = Surface::new(2, 1, TextureFormat::Rgba32f).unwrap();
        s.set_texel(0, 0, Texel::Float([0.0, 0.0, 0.0, 1.0]));
        s.set_texel(1, 0, Texel::Float([1.0, 0.0, 0.0, 1.0]));
        let sampler = SamplerDesc {
            mag_filter: Filter::Linear,
            wrap_s: Wrap::ClampToEdge,
            wrap_t: Wrap::ClampToEdge,
            ..Default::default()
        };
        let mid = s.sample([0.5, 0.5], &sampler);
        assert!((mid[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn masked_colour_fill() {
        let mut s = Surface::new(1, 1, TextureFormat::Rgba8).unwrap();
        s.fill_color(s.rect(), Texel::Float([1.0; 4]), [true, false, false, true]);
        assert_eq!(s.texel(0, 0), Texel::Float([1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn stencil_fill_respects_write_mask() {
        let mut s = Surface::new(1, 1, TextureFormat::Depth24Stencil8).unwrap();
        s.fill_stencil(s.rect(), 0xff, 0x0f);
        assert_eq!(s.stencil(0, 0), 0x0f);
    }
}
