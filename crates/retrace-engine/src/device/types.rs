//! Device vocabulary shared by the executor, the state applicator and the
//! backends. String-valued enums use snake_case on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── formats ──────────────────────────────────────────────────────────────

/// Storage format of textures and render targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    R8,
    Rg8,
    #[default]
    Rgba8,
    R32f,
    Rg32f,
    Rgba32f,
    R32ui,
    Rgba32ui,
    R32i,
    Rgba32i,
    Depth32f,
    Depth24Stencil8,
}

/// How a format's channels are interpreted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FormatClass {
    /// Unsigned normalized, read back as floats in `[0, 1]`.
    Unorm,
    Float,
    Uint,
    Sint,
    Depth,
    DepthStencil,
}

impl TextureFormat {
    pub fn class(self) -> FormatClass {
        match self {
            TextureFormat::R8 | TextureFormat::Rg8 | TextureFormat::Rgba8 => FormatClass::Unorm,
            TextureFormat::R32f | TextureFormat::Rg32f | TextureFormat::Rgba32f => {
                FormatClass::Float
            }
            TextureFormat::R32ui | TextureFormat::Rgba32ui => FormatClass::Uint,
            TextureFormat::R32i | TextureFormat::Rgba32i => FormatClass::Sint,
            TextureFormat::Depth32f => FormatClass::Depth,
            TextureFormat::Depth24Stencil8 => FormatClass::DepthStencil,
        }
    }

    /// Number of color channels (depth formats report one).
    pub fn channels(self) -> usize {
        match self {
            TextureFormat::R8
            | TextureFormat::R32f
            | TextureFormat::R32ui
            | TextureFormat::R32i
            | TextureFormat::Depth32f
            | TextureFormat::Depth24Stencil8 => 1,
            TextureFormat::Rg8 | TextureFormat::Rg32f => 2,
            TextureFormat::Rgba8
            | TextureFormat::Rgba32f
            | TextureFormat::Rgba32ui
            | TextureFormat::Rgba32i => 4,
        }
    }

    /// Bytes per texel in upload layout.
    pub fn texel_size(self) -> usize {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::Rg8 => 2,
            TextureFormat::Rgba8 => 4,
            TextureFormat::R32f | TextureFormat::R32ui | TextureFormat::R32i => 4,
            TextureFormat::Rg32f => 8,
            TextureFormat::Rgba32f | TextureFormat::Rgba32ui | TextureFormat::Rgba32i => 16,
            TextureFormat::Depth32f | TextureFormat::Depth24Stencil8 => 4,
        }
    }

    #[inline]
    pub fn is_color(self) -> bool {
        !matches!(self.class(), FormatClass::Depth | FormatClass::DepthStencil)
    }

    #[inline]
    pub fn has_depth(self) -> bool {
        matches!(self.class(), FormatClass::Depth | FormatClass::DepthStencil)
    }

    #[inline]
    pub fn has_stencil(self) -> bool {
        self.class() == FormatClass::DepthStencil
    }
}

/// Client-side layout requested from `readPixels`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Red,
    Rg,
    #[default]
    Rgba,
    RedInteger,
    RgInteger,
    RgbaInteger,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Red | PixelFormat::RedInteger => 1,
            PixelFormat::Rg | PixelFormat::RgInteger => 2,
            PixelFormat::Rgba | PixelFormat::RgbaInteger => 4,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            PixelFormat::RedInteger | PixelFormat::RgInteger | PixelFormat::RgbaInteger
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelType {
    #[default]
    Uint8,
    Int32,
    Uint32,
    Float32,
}

impl PixelType {
    pub fn size(self) -> usize {
        match self {
            PixelType::Uint8 => 1,
            PixelType::Int32 | PixelType::Uint32 | PixelType::Float32 => 4,
        }
    }

    /// Encodes one channel value. Normalized sources arrive in `[0, 1]`.
    pub fn push(self, value: f64, out: &mut Vec<u8>) {
        match self {
            PixelType::Uint8 => out.push((value.clamp(0.0, 1.0) * 255.0).round() as u8),
            PixelType::Int32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
            PixelType::Uint32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
            PixelType::Float32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
        }
    }
}

// ── sampling ─────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wrap {
    #[default]
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

impl Wrap {
    /// Maps an integer texel coordinate into `[0, size)`.
    pub fn apply(self, coord: i64, size: u32) -> u32 {
        let size = i64::from(size.max(1));
        let c = match self {
            Wrap::Repeat => coord.rem_euclid(size),
            Wrap::ClampToEdge => coord.clamp(0, size - 1),
            Wrap::MirroredRepeat => {
                let period = coord.rem_euclid(2 * size);
                if period < size { period } else { 2 * size - 1 - period }
            }
        };
        c as u32
    }
}

// ── geometry ─────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Points,
    Lines,
    LineStrip,
    LineLoop,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    Uint8,
    Uint16,
    Uint32,
}

impl IndexType {
    pub fn size(self) -> usize {
        match self {
            IndexType::Uint8 => 1,
            IndexType::Uint16 => 2,
            IndexType::Uint32 => 4,
        }
    }

    /// Reads index `i` from little-endian index data.
    pub fn read(self, data: &[u8], i: usize) -> Option<u32> {
        let at = i.checked_mul(self.size())?;
        let b = data.get(at..at + self.size())?;
        Some(match self {
            IndexType::Uint8 => u32::from(b[0]),
            IndexType::Uint16 => u32::from(u16::from_le_bytes([b[0], b[1]])),
            IndexType::Uint32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        })
    }
}

/// Component type of a vertex attribute in its buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    #[default]
    Float32,
}

impl AttributeType {
    pub fn size(self) -> usize {
        match self {
            AttributeType::Int8 | AttributeType::Uint8 => 1,
            AttributeType::Int16 | AttributeType::Uint16 => 2,
            AttributeType::Int32 | AttributeType::Uint32 | AttributeType::Float32 => 4,
        }
    }

    /// Reads one component, normalizing integer types when asked.
    pub fn read(self, b: &[u8], normalized: bool) -> Option<f32> {
        let b = b.get(..self.size())?;
        let half = || [b[0], b[1]];
        let word = || [b[0], b[1], b[2], b[3]];
        let (raw, max) = match self {
            AttributeType::Int8 => (f32::from(b[0] as i8), f32::from(i8::MAX)),
            AttributeType::Uint8 => (f32::from(b[0]), f32::from(u8::MAX)),
            AttributeType::Int16 => (f32::from(i16::from_le_bytes(half())), f32::from(i16::MAX)),
            AttributeType::Uint16 => (f32::from(u16::from_le_bytes(half())), f32::from(u16::MAX)),
            AttributeType::Int32 => (i32::from_le_bytes(word()) as f32, i32::MAX as f32),
            AttributeType::Uint32 => (u32::from_le_bytes(word()) as f32, u32::MAX as f32),
            AttributeType::Float32 => return Some(f32::from_le_bytes(word())),
        };
        Some(if normalized { (raw / max).max(-1.0) } else { raw })
    }
}

/// Window-space rectangle, `[x, y, width, height]` on the wire.
///
/// Origin is bottom-left, as in GL window coordinates.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    /// Right and top edges, or `None` when either does not fit in `i32`.
    pub fn checked_end(self) -> Option<(i32, i32)> {
        Some((
            self.x.checked_add(self.width)?,
            self.y.checked_add(self.height)?,
        ))
    }

    /// Intersection clamped to non-negative extent.
    pub fn intersect(self, other: Rect) -> Rect {
        let end = |at: i32, len: i32| i64::from(at) + i64::from(len);
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = end(self.x, self.width).min(end(other.x, other.width));
        let y1 = end(self.y, self.height).min(end(other.y, other.height));
        let len = |lo: i32, hi: i64| (hi - i64::from(lo)).clamp(0, i64::from(i32::MAX)) as i32;
        Rect::new(x0, y0, len(x0, x1), len(y0, y1))
    }

    pub fn is_empty(self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

impl From<[i32; 4]> for Rect {
    fn from(v: [i32; 4]) -> Self {
        Rect::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Rect> for [i32; 4] {
    fn from(r: Rect) -> Self {
        [r.x, r.y, r.width, r.height]
    }
}

// ── fixed-function state ─────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

impl CompareFunc {
    /// Evaluates `incoming <op> stored`.
    pub fn test<T: PartialOrd>(self, incoming: T, stored: T) -> bool {
        match self {
            CompareFunc::Never => false,
            CompareFunc::Less => incoming < stored,
            CompareFunc::Equal => incoming == stored,
            CompareFunc::LessEqual => incoming <= stored,
            CompareFunc::Greater => incoming > stored,
            CompareFunc::NotEqual => incoming != stored,
            CompareFunc::GreaterEqual => incoming >= stored,
            CompareFunc::Always => true,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    Incr,
    IncrWrap,
    Decr,
    DecrWrap,
    Invert,
}

impl StencilOp {
    pub fn apply(self, value: u8, reference: u8) -> u8 {
        match self {
            StencilOp::Keep => value,
            StencilOp::Zero => 0,
            StencilOp::Replace => reference,
            StencilOp::Incr => value.saturating_add(1),
            StencilOp::IncrWrap => value.wrapping_add(1),
            StencilOp::Decr => value.saturating_sub(1),
            StencilOp::DecrWrap => value.wrapping_sub(1),
            StencilOp::Invert => !value,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Face {
    Front,
    #[default]
    Back,
    FrontAndBack,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontFace {
    #[default]
    Ccw,
    Cw,
}

/// Destination of fragment output `n` of the bound program.
///
/// Wire form is a string: `"none"`, `"back"`, or `"color<N>"`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DrawBuffer {
    None,
    Back,
    Color(u32),
}

impl fmt::Display for DrawBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawBuffer::None => f.write_str("none"),
            DrawBuffer::Back => f.write_str("back"),
            DrawBuffer::Color(i) => write!(f, "color{i}"),
        }
    }
}

impl FromStr for DrawBuffer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DrawBuffer::None),
            "back" => Ok(DrawBuffer::Back),
            _ => s
                .strip_prefix("color")
                .and_then(|n| n.parse().ok())
                .map(DrawBuffer::Color)
                .ok_or_else(|| format!("unknown draw buffer {s:?}")),
        }
    }
}

impl TryFrom<String> for DrawBuffer {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DrawBuffer> for String {
    fn from(d: DrawBuffer) -> Self {
        d.to_string()
    }
}

// ── uniforms ─────────────────────────────────────────────────────────────

/// Declared type of a program uniform.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniformKind {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    Ivec2,
    Ivec3,
    Ivec4,
    Uint,
    Mat4,
    Sampler2d,
}

impl UniformKind {
    pub fn components(self) -> usize {
        match self {
            UniformKind::Float | UniformKind::Int | UniformKind::Uint | UniformKind::Sampler2d => 1,
            UniformKind::Vec2 | UniformKind::Ivec2 => 2,
            UniformKind::Vec3 | UniformKind::Ivec3 => 3,
            UniformKind::Vec4 | UniformKind::Ivec4 => 4,
            UniformKind::Mat4 => 16,
        }
    }

    /// `(size, align)` in a std140-style uniform block.
    pub fn block_layout(self) -> (usize, usize) {
        match self {
            UniformKind::Float | UniformKind::Int | UniformKind::Uint | UniformKind::Sampler2d => {
                (4, 4)
            }
            UniformKind::Vec2 | UniformKind::Ivec2 => (8, 8),
            UniformKind::Vec3 | UniformKind::Ivec3 => (12, 16),
            UniformKind::Vec4 | UniformKind::Ivec4 => (16, 16),
            UniformKind::Mat4 => (64, 16),
        }
    }

    fn accepts(self, value: &UniformValue) -> bool {
        match value {
            UniformValue::Float(_) => matches!(
                self,
                UniformKind::Float
                    | UniformKind::Vec2
                    | UniformKind::Vec3
                    | UniformKind::Vec4
                    | UniformKind::Mat4
            ),
            UniformValue::Int(_) => matches!(
                self,
                UniformKind::Int
                    | UniformKind::Ivec2
                    | UniformKind::Ivec3
                    | UniformKind::Ivec4
                    | UniformKind::Sampler2d
            ),
            UniformValue::Uint(_) => self == UniformKind::Uint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniformDecl {
    pub name: String,
    pub kind: UniformKind,
}

/// Uniform value, `{"float": [..]}`, `{"int": [..]}` or `{"uint": [..]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniformValue {
    Float(Vec<f32>),
    Int(Vec<i32>),
    Uint(Vec<u32>),
}

impl UniformValue {
    pub fn len(&self) -> usize {
        match self {
            UniformValue::Float(v) => v.len(),
            UniformValue::Int(v) => v.len(),
            UniformValue::Uint(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this value can be stored into a uniform of `kind`.
    pub fn fits(&self, kind: UniformKind) -> bool {
        kind.accepts(self) && self.len() == kind.components()
    }

    /// Components widened to `f32` (integer values converted).
    pub fn as_floats(&self) -> Vec<f32> {
        match self {
            UniformValue::Float(v) => v.clone(),
            UniformValue::Int(v) => v.iter().map(|&i| i as f32).collect(),
            UniformValue::Uint(v) => v.iter().map(|&u| u as f32).collect(),
        }
    }

    /// Raw 32-bit words as stored in a uniform block.
    pub fn to_words(&self) -> Vec<u32> {
        match self {
            UniformValue::Float(v) => v.iter().map(|f| f.to_bits()).collect(),
            UniformValue::Int(v) => v.iter().map(|&i| i as u32).collect(),
            UniformValue::Uint(v) => v.clone(),
        }
    }
}

// ── resources ────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferUsage {
    #[default]
    Static,
    Dynamic,
    Stream,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplerDesc {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTargetDesc {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub format: TextureFormat,
    #[serde(default = "one")]
    pub samples: u32,
}

fn one() -> u32 {
    1
}

/// Typed clear pattern for an explicit color attachment.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ClearValue {
    Float([f32; 4]),
    Int([i32; 4]),
    Uint([u32; 4]),
}

/// Blit region mask.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlitMask {
    pub color: bool,
    pub depth: bool,
    pub stencil: bool,
}

impl Default for BlitMask {
    fn default() -> Self {
        Self {
            color: true,
            depth: false,
            stencil: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_properties() {
        assert_eq!(TextureFormat::Rgba8.texel_size(), 4);
        assert_eq!(TextureFormat::Rgba32f.texel_size(), 16);
        assert!(TextureFormat::Depth24Stencil8.has_stencil());
        assert!(!TextureFormat::Depth32f.has_stencil());
        assert!(TextureFormat::R32ui.is_color());
        assert_eq!(
            serde_json::to_string(&TextureFormat::Depth24Stencil8).unwrap(),
            "\"depth24_stencil8\""
        );
    }

    #[test]
    fn wrap_modes() {
        assert_eq!(Wrap::Repeat.apply(-1, 4), 3);
        assert_eq!(Wrap::ClampToEdge.apply(9, 4), 3);
        assert_eq!(Wrap::MirroredRepeat.apply(4, 4), 3);
        assert_eq!(Wrap::MirroredRepeat.apply(5, 4), 2);
    }

    #[test]
    fn rect_wire_form_is_array() {
        let r: Rect = serde_json::from_str("[1, 2, 3, 4]").unwrap();
        assert_eq!(r, Rect::new(1, 2, 3, 4));
        assert_eq!(serde_json::to_string(&r).unwrap(), "[1,2,3,4]");
    }

    #[test]
    fn rect_intersection() {
        let a = Rect::new(0, 0, 10, 10);
        assert_eq!(a.intersect(Rect::new(5, 5, 10, 10)), Rect::new(5, 5, 5, 5));
        assert!(a.intersect(Rect::new(20, 20, 1, 1)).is_empty());
    }

    #[test]
    fn rect_edges_near_i32_max() {
        let wide = Rect::new(1, 0, i32::MAX, 1);
        assert_eq!(wide.checked_end(), None);
        assert_eq!(
            wide.intersect(Rect::from_size(8, 4)),
            Rect::new(1, 0, 7, 1)
        );
        assert_eq!(
            Rect::new(i32::MIN, 0, i32::MAX, 1).intersect(Rect::new(0, 0, i32::MAX, i32::MAX)),
            Rect::new(0, 0, 0, 1)
        );
        assert_eq!(Rect::new(-4, 2, 4, 3).checked_end(), Some((0, 5)));
    }

    #[test]
    fn draw_buffer_strings() {
        assert_eq!("color3".parse::<DrawBuffer>(), Ok(DrawBuffer::Color(3)));
        assert_eq!(DrawBuffer::Back.to_string(), "back");
        assert!("colorx".parse::<DrawBuffer>().is_err());
        let v: Vec<DrawBuffer> = serde_json::from_str(r#"["color0","none"]"#).unwrap();
        assert_eq!(v, vec![DrawBuffer::Color(0), DrawBuffer::None]);
    }

    #[test]
    fn uniform_value_fit() {
        assert!(UniformValue::Float(vec![1.0, 0.0, 0.0, 1.0]).fits(UniformKind::Vec4));
        assert!(!UniformValue::Float(vec![1.0, 0.0, 0.0]).fits(UniformKind::Vec4));
        assert!(UniformValue::Int(vec![0]).fits(UniformKind::Sampler2d));
        assert!(!UniformValue::Uint(vec![0]).fits(UniformKind::Int));
    }

    #[test]
    fn normalized_attribute_read() {
        assert_eq!(AttributeType::Uint8.read(&[255], true), Some(1.0));
        assert_eq!(AttributeType::Int8.read(&[0x80], true), Some(-1.0));
        assert_eq!(AttributeType::Uint16.read(&[7, 0], false), Some(7.0));
        assert_eq!(AttributeType::Int32.read(&(-3i32).to_le_bytes(), false), Some(-3.0));
        assert_eq!(AttributeType::Float32.read(&0.5f32.to_le_bytes(), true), Some(0.5));
        assert_eq!(AttributeType::Int16.read(&[1], false), None);
    }

    #[test]
    fn stencil_ops_wrap_and_saturate() {
        assert_eq!(StencilOp::Incr.apply(255, 0), 255);
        assert_eq!(StencilOp::IncrWrap.apply(255, 0), 0);
        assert_eq!(StencilOp::Replace.apply(3, 9), 9);
        assert_eq!(StencilOp::Invert.apply(0, 0), 255);
    }
}
