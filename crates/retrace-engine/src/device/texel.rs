//! Texel encoding shared by the backends.

use crate::device::types::{FormatClass, TextureFormat};

/// One decoded texel in the natural domain of its format.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Texel {
    Float([f32; 4]),
    Int([i32; 4]),
    Uint([u32; 4]),
}

impl Texel {
    pub fn to_f32(self) -> [f32; 4] {
        match self {
            Texel::Float(v) => v,
            Texel::Int(v) => v.map(|c| c as f32),
            Texel::Uint(v) => v.map(|c| c as f32),
        }
    }

    pub fn to_f64(self) -> [f64; 4] {
        match self {
            Texel::Float(v) => v.map(f64::from),
            Texel::Int(v) => v.map(f64::from),
            Texel::Uint(v) => v.map(f64::from),
        }
    }

    /// Converts into the variant `format` stores, with `as` semantics.
    pub fn convert(self, format: TextureFormat) -> Texel {
        match format.class() {
            FormatClass::Uint => Texel::Uint(match self {
                Texel::Float(v) => v.map(|c| c as u32),
                Texel::Int(v) => v.map(|c| c as u32),
                Texel::Uint(v) => v,
            }),
            FormatClass::Sint => Texel::Int(match self {
                Texel::Float(v) => v.map(|c| c as i32),
                Texel::Int(v) => v,
                Texel::Uint(v) => v.map(|c| c as i32),
            }),
            _ => Texel::Float(self.to_f32()),
        }
    }

    /// Keeps `old` channels where `mask` is false. Both sides must already be
    /// in the same variant.
    pub fn masked(self, old: Texel, mask: [bool; 4]) -> Texel {
        fn pick<T: Copy>(new: [T; 4], old: [T; 4], mask: [bool; 4]) -> [T; 4] {
            std::array::from_fn(|i| if mask[i] { new[i] } else { old[i] })
        }
        match (self, old) {
            (Texel::Float(n), Texel::Float(o)) => Texel::Float(pick(n, o, mask)),
            (Texel::Int(n), Texel::Int(o)) => Texel::Int(pick(n, o, mask)),
            (Texel::Uint(n), Texel::Uint(o)) => Texel::Uint(pick(n, o, mask)),
            (new, _) => new,
        }
    }
}

/// Decodes one colour texel. Missing channels read as `(0, 0, 0, 1)`.
pub fn decode(format: TextureFormat, bytes: &[u8]) -> Texel {
    let n = format.channels();
    let word = |i: usize| {
        let b = &bytes[i * 4..i * 4 + 4];
        [b[0], b[1], b[2], b[3]]
    };
    match format.class() {
        FormatClass::Unorm => {
            let mut v = [0.0, 0.0, 0.0, 1.0];
            for (i, slot) in v.iter_mut().enumerate().take(n) {
                *slot = f32::from(bytes[i]) / 255.0;
            }
            Texel::Float(v)
        }
        FormatClass::Float | FormatClass::Depth | FormatClass::DepthStencil => {
            let mut v = [0.0, 0.0, 0.0, 1.0];
            for (i, slot) in v.iter_mut().enumerate().take(n) {
                *slot = f32::from_le_bytes(word(i));
            }
            Texel::Float(v)
        }
        FormatClass::Uint => {
            let mut v = [0, 0, 0, 1];
            for (i, slot) in v.iter_mut().enumerate().take(n) {
                *slot = u32::from_le_bytes(word(i));
            }
            Texel::Uint(v)
        }
        FormatClass::Sint => {
            let mut v = [0, 0, 0, 1];
            for (i, slot) in v.iter_mut().enumerate().take(n) {
                *slot = i32::from_le_bytes(word(i));
            }
            Texel::Int(v)
        }
    }
}

/// Encodes one colour texel into `out` (exactly `format.texel_size()` bytes).
pub fn encode(format: TextureFormat, texel: Texel, out: &mut [u8]) {
    let n = format.channels();
    match (format.class(), texel.convert(format)) {
        (FormatClass::Unorm, Texel::Float(v)) => {
            for i in 0..n {
                out[i] = (v[i].clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
        (FormatClass::Uint, Texel::Uint(v)) => {
            for i in 0..n {
                out[i * 4..i * 4 + 4].copy_from_slice(&v[i].to_le_bytes());
            }
        }
        (FormatClass::Sint, Texel::Int(v)) => {
            for i in 0..n {
                out[i * 4..i * 4 + 4].copy_from_slice(&v[i].to_le_bytes());
            }
        }
        (_, t) => {
            let v = t.to_f32();
            for i in 0..n {
                out[i * 4..i * 4 + 4].copy_from_slice(&v[i].to_le_bytes());
            }
        }
    }
}

/// `depth24_stencil8` upload word: depth in the high 24 bits.
pub fn unpack_depth24_stencil8(word: u32) -> (f32, u8) {
    let depth = (word >> 8) as f32 / 16_777_215.0;
    (depth, (word & 0xff) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unorm_quantizes_on_encode() {
        let mut out = [0u8; 4];
        encode(TextureFormat::Rgba8, Texel::Float([1.0, 0.5, -1.0, 2.0]), &mut out);
        assert_eq!(out, [255, 128, 0, 255]);
        assert_eq!(
            decode(TextureFormat::Rgba8, &out),
            Texel::Float([1.0, 128.0 / 255.0, 0.0, 1.0])
        );
    }

    #[test]
    fn missing_channels_read_as_opaque_black() {
        let out = [255u8];
        assert_eq!(
            decode(TextureFormat::R8, &out),
            Texel::Float([1.0, 0.0, 0.0, 1.0])
        );
    }

    #[test]
    fn integer_formats_keep_exact_words() {
        let mut out = [0u8; 16];
        encode(
            TextureFormat::Rgba32ui,
            Texel::Uint([u32::MAX, 1, 2, 3]),
            &mut out,
        );
        assert_eq!(
            decode(TextureFormat::Rgba32ui, &out),
            Texel::Uint([u32::MAX, 1, 2, 3])
        );
    }

    #[test]
    fn masked_keeps_old_channels() {
        let new = Texel::Float([1.0; 4]);
        let old = Texel::Float([0.0; 4]);
        assert_eq!(
            new.masked(old, [true, false, true, false]),
            Texel::Float([1.0, 0.0, 1.0, 0.0])
        );
    }

    #[test]
    fn depth_stencil_word_unpacks() {
        let (d, s) = unpack_depth24_stencil8(0xffff_ff07);
        assert_eq!(d, 1.0);
        assert_eq!(s, 7);
    }
}
