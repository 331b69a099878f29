use serde::{Deserialize, Serialize};

/// Element type of an inline or base64 payload.
///
/// Encoding is little-endian. Literal values are converted with `as`
/// semantics, so out-of-range integers saturate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int8,
    #[default]
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl ElementType {
    pub const ALL: [ElementType; 8] = [
        ElementType::Int8,
        ElementType::Uint8,
        ElementType::Int16,
        ElementType::Uint16,
        ElementType::Int32,
        ElementType::Uint32,
        ElementType::Float32,
        ElementType::Float64,
    ];

    /// Size of one element in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            ElementType::Int8 | ElementType::Uint8 => 1,
            ElementType::Int16 | ElementType::Uint16 => 2,
            ElementType::Int32 | ElementType::Uint32 | ElementType::Float32 => 4,
            ElementType::Float64 => 8,
        }
    }

    /// Appends `value` encoded as this element type.
    pub fn push(self, value: f64, out: &mut Vec<u8>) {
        match self {
            ElementType::Int8 => out.extend_from_slice(&(value as i8).to_le_bytes()),
            ElementType::Uint8 => out.extend_from_slice(&(value as u8).to_le_bytes()),
            ElementType::Int16 => out.extend_from_slice(&(value as i16).to_le_bytes()),
            ElementType::Uint16 => out.extend_from_slice(&(value as u16).to_le_bytes()),
            ElementType::Int32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
            ElementType::Uint32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
            ElementType::Float32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
            ElementType::Float64 => out.extend_from_slice(&value.to_le_bytes()),
        }
    }

    /// Reads one element from the start of `bytes`.
    ///
    /// Returns `None` if `bytes` is shorter than [`size`](Self::size).
    pub fn read(self, bytes: &[u8]) -> Option<f64> {
        let b = bytes.get(..self.size())?;
        Some(match self {
            ElementType::Int8 => f64::from(b[0] as i8),
            ElementType::Uint8 => f64::from(b[0]),
            ElementType::Int16 => f64::from(i16::from_le_bytes([b[0], b[1]])),
            ElementType::Uint16 => f64::from(u16::from_le_bytes([b[0], b[1]])),
            ElementType::Int32 => f64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ElementType::Uint32 => f64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ElementType::Float32 => f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ElementType::Float64 => {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
        })
    }
}
