use std::borrow::Cow;
use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::handle::BlobId;

use super::ElementType;

/// Read access to the blob table.
pub trait BlobLookup {
    fn blob(&self, id: BlobId) -> Option<&[u8]>;
}

/// Lookup with no blobs, for callers that never use blob references.
#[derive(Debug, Copy, Clone, Default)]
pub struct NoBlobs;

impl BlobLookup for NoBlobs {
    fn blob(&self, _id: BlobId) -> Option<&[u8]> {
        None
    }
}

impl BlobLookup for BTreeMap<BlobId, Bytes> {
    fn blob(&self, id: BlobId) -> Option<&[u8]> {
        self.get(&id).map(|b| b.as_ref())
    }
}

/// Where the bytes of a payload come from.
///
/// Wire forms (JSON objects, distinguished by key):
/// - `{"array": [..], "type"?: "float32"}`
/// - `{"base64": "..", "type"?: "float32"}`
/// - `{"blob": 3}`
///
/// `Raw` has no JSON form of its own and serializes as base64.
#[derive(Debug, Clone, PartialEq)]
pub enum BinarySource {
    Array {
        array: Vec<f64>,
        ty: Option<ElementType>,
    },
    Base64 {
        base64: String,
        ty: Option<ElementType>,
    },
    Blob {
        blob: BlobId,
    },
    /// Raw bytes. A sliced `Bytes` covers the offset/length view case.
    Raw(Bytes),
}

/// Resolved payload: the bytes plus the element type they were declared with.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<'a> {
    bytes: Cow<'a, [u8]>,
    ty: ElementType,
}

impl<'a> Resolved<'a> {
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Cow<'a, [u8]> {
        self.bytes
    }

    #[inline]
    pub fn element_type(&self) -> ElementType {
        self.ty
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn element_count(&self) -> usize {
        self.bytes.len() / self.ty.size()
    }

    /// Iterates the payload as numbers of its element type.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.bytes
            .chunks_exact(self.ty.size())
            .filter_map(|c| self.ty.read(c))
    }
}

impl BinarySource {
    /// Inline literal array.
    pub fn array(values: impl IntoIterator<Item = f64>, ty: ElementType) -> Self {
        BinarySource::Array {
            array: values.into_iter().collect(),
            ty: Some(ty),
        }
    }

    /// Inline `float32` array, the common vertex-data case.
    pub fn floats(values: &[f32]) -> Self {
        Self::array(values.iter().map(|&v| f64::from(v)), ElementType::Float32)
    }

    pub fn raw(bytes: impl Into<Bytes>) -> Self {
        BinarySource::Raw(bytes.into())
    }

    pub fn blob(id: BlobId) -> Self {
        BinarySource::Blob { blob: id }
    }

    /// Declared element type, if the form carries one.
    pub fn declared_type(&self) -> Option<ElementType> {
        match self {
            BinarySource::Array { ty, .. } | BinarySource::Base64 { ty, .. } => *ty,
            BinarySource::Blob { .. } | BinarySource::Raw(_) => None,
        }
    }

    #[inline]
    pub fn is_base64(&self) -> bool {
        matches!(self, BinarySource::Base64 { .. })
    }

    /// Resolves the payload to bytes.
    ///
    /// Only blob references touch `blobs`; every other form is pure.
    pub fn resolve<'a>(&'a self, blobs: &'a dyn BlobLookup) -> Result<Resolved<'a>> {
        match self {
            BinarySource::Array { array, ty } => {
                let ty = ty.unwrap_or_default();
                let mut out = Vec::with_capacity(array.len() * ty.size());
                for &v in array {
                    ty.push(v, &mut out);
                }
                Ok(Resolved {
                    bytes: Cow::Owned(out),
                    ty,
                })
            }
            BinarySource::Base64 { base64, ty } => {
                let ty = ty.unwrap_or_default();
                let decoded = STANDARD
                    .decode(base64.as_bytes())
                    .map_err(|e| {
                        Error::format(format!("invalid base64 payload ({e})"), preview(base64))
                    })?;
                if decoded.len() % ty.size() != 0 {
                    return Err(Error::format(
                        format!(
                            "base64 payload of {} bytes is not a whole number of {ty:?} elements",
                            decoded.len()
                        ),
                        preview(base64),
                    ));
                }
                Ok(Resolved {
                    bytes: Cow::Owned(decoded),
                    ty,
                })
            }
            BinarySource::Blob { blob } => {
                let bytes = blobs.blob(*blob).ok_or(Error::InvalidHandle {
                    kind: crate::handle::ResourceKind::Blob,
                    handle: blob.0,
                })?;
                Ok(Resolved {
                    bytes: Cow::Borrowed(bytes),
                    ty: ElementType::Uint8,
                })
            }
            BinarySource::Raw(bytes) => Ok(Resolved {
                bytes: Cow::Borrowed(bytes.as_ref()),
                ty: ElementType::Uint8,
            }),
        }
    }

    /// Re-encodes any form as `Base64`, keeping the declared element type.
    ///
    /// Resolving the result yields exactly the bytes `self` resolves to.
    pub fn encode_base64(&self, blobs: &dyn BlobLookup) -> Result<BinarySource> {
        let resolved = self.resolve(blobs)?;
        Ok(BinarySource::Base64 {
            base64: STANDARD.encode(resolved.bytes()),
            ty: self.declared_type(),
        })
    }

    /// Parses the JSON wire form.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Some(obj) = value.as_object() else {
            return Err(Error::format("binary source must be an object", value));
        };

        let ty = match obj.get("type") {
            None | Some(Value::Null) => None,
            Some(t) => Some(
                serde_json::from_value::<ElementType>(t.clone())
                    .map_err(|_| Error::format("unknown element type", t))?,
            ),
        };

        if let Some(array) = obj.get("array") {
            let items = array
                .as_array()
                .ok_or_else(|| Error::format("`array` must be a list of numbers", array))?;
            let array = items
                .iter()
                .map(|v| {
                    v.as_f64()
                        .ok_or_else(|| Error::format("non-numeric element in `array`", v))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(BinarySource::Array { array, ty })
        } else if let Some(b64) = obj.get("base64") {
            let base64 = b64
                .as_str()
                .ok_or_else(|| Error::format("`base64` must be a string", b64))?;
            Ok(BinarySource::Base64 {
                base64: base64.to_owned(),
                ty,
            })
        } else if let Some(blob) = obj.get("blob") {
            let id = blob
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| Error::format("`blob` must be a handle", blob))?;
            Ok(BinarySource::Blob { blob: BlobId(id) })
        } else {
            Err(Error::format("unknown binary source", value))
        }
    }
}

fn preview(s: &str) -> String {
    const MAX: usize = 32;
    if s.len() <= MAX {
        s.to_owned()
    } else {
        let cut = (0..=MAX).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0);
        format!("{}...", &s[..cut])
    }
}

impl Serialize for BinarySource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            BinarySource::Array { array, ty } => {
                if let Some(ty) = ty {
                    map.serialize_entry("type", ty)?;
                }
                map.serialize_entry("array", array)?;
            }
            BinarySource::Base64 { base64, ty } => {
                if let Some(ty) = ty {
                    map.serialize_entry("type", ty)?;
                }
                map.serialize_entry("base64", base64)?;
            }
            BinarySource::Blob { blob } => {
                map.serialize_entry("blob", blob)?;
            }
            BinarySource::Raw(bytes) => {
                map.serialize_entry("base64", &STANDARD.encode(bytes))?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for BinarySource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        BinarySource::from_json(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn blobs_with(id: u32, bytes: &[u8]) -> BTreeMap<BlobId, Bytes> {
        let mut m = BTreeMap::new();
        m.insert(BlobId(id), Bytes::copy_from_slice(bytes));
        m
    }

    #[test]
    fn array_defaults_to_single_byte_elements() {
        let src = BinarySource::Array {
            array: vec![1.0, 2.0, 255.0],
            ty: None,
        };
        let r = src.resolve(&NoBlobs).unwrap();
        assert_eq!(r.bytes(), &[1, 2, 255]);
        assert_eq!(r.element_type(), ElementType::Uint8);
    }

    #[test]
    fn float_array_resolves_little_endian() {
        let src = BinarySource::floats(&[1.0, -2.5]);
        let r = src.resolve(&NoBlobs).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&1.0f32.to_le_bytes());
        expected.extend_from_slice(&(-2.5f32).to_le_bytes());
        assert_eq!(r.bytes(), expected.as_slice());
        assert_eq!(r.element_count(), 2);
        assert_eq!(r.values().collect::<Vec<_>>(), vec![1.0, -2.5]);
    }

    #[test]
    fn blob_reference_resolves_through_lookup() {
        let blobs = blobs_with(2, &[9, 8, 7]);
        let src = BinarySource::blob(BlobId(2));
        let r = src.resolve(&blobs).unwrap();
        assert_eq!(r.bytes(), &[9, 8, 7]);
    }

    #[test]
    fn missing_blob_is_invalid_handle() {
        let err = BinarySource::blob(BlobId(4)).resolve(&NoBlobs).unwrap_err();
        assert!(matches!(err, Error::InvalidHandle { handle: 4, .. }), "{err}");
    }

    #[test]
    fn raw_slice_views_resolve_to_their_window() {
        let whole = Bytes::from_static(&[0, 1, 2, 3, 4, 5]);
        let view = BinarySource::raw(whole.slice(2..5));
        assert_eq!(view.resolve(&NoBlobs).unwrap().bytes(), &[2, 3, 4]);
    }

    #[test]
    fn unknown_tag_names_the_value() {
        let err = BinarySource::from_json(&json!({"hex": "00ff"})).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown binary source"), "{msg}");
        assert!(msg.contains("hex"), "{msg}");
    }

    #[test]
    fn misaligned_base64_is_format_error() {
        let src = BinarySource::Base64 {
            base64: STANDARD.encode([1u8, 2, 3]),
            ty: Some(ElementType::Float32),
        };
        assert!(matches!(src.resolve(&NoBlobs), Err(Error::Format { .. })));
    }

    #[test]
    fn bad_base64_is_format_error() {
        let src = BinarySource::Base64 {
            base64: "!!!not base64!!!".into(),
            ty: None,
        };
        assert!(matches!(src.resolve(&NoBlobs), Err(Error::Format { .. })));
    }

    #[test]
    fn json_forms_parse() {
        let a: BinarySource =
            serde_json::from_value(json!({"type": "float32", "array": [0, 1]})).unwrap();
        assert_eq!(a.declared_type(), Some(ElementType::Float32));
        let b: BinarySource = serde_json::from_value(json!({"base64": "AAE="})).unwrap();
        assert_eq!(b.resolve(&NoBlobs).unwrap().bytes(), &[0, 1]);
        let c: BinarySource = serde_json::from_value(json!({"blob": 1})).unwrap();
        assert_eq!(c, BinarySource::blob(BlobId(1)));
    }

    #[test]
    fn raw_serializes_as_base64() {
        let v = serde_json::to_value(BinarySource::raw(vec![0u8, 1])).unwrap();
        assert_eq!(v, json!({"base64": "AAE="}));
    }

    fn source_strategy() -> impl Strategy<Value = BinarySource> {
        let ty = proptest::sample::select(ElementType::ALL.to_vec());
        prop_oneof![
            (proptest::collection::vec(-1.0e6f64..1.0e6, 0..32), ty.clone())
                .prop_map(|(array, ty)| BinarySource::Array { array, ty: Some(ty) }),
            (proptest::collection::vec(any::<u8>(), 0..8), ty).prop_map(|(elems, ty)| {
                // Whole elements only: repeat each byte to the element size.
                let bytes: Vec<u8> = elems
                    .iter()
                    .flat_map(|&b| std::iter::repeat_n(b, ty.size()))
                    .collect();
                BinarySource::Base64 { base64: STANDARD.encode(bytes), ty: Some(ty) }
            }),
            Just(BinarySource::blob(BlobId(0))),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(BinarySource::raw),
        ]
    }

    proptest! {
        #[test]
        fn base64_round_trip_is_byte_identical(src in source_strategy()) {
            let blobs = blobs_with(0, &[1, 2, 3, 4, 5]);
            let original = src.resolve(&blobs).unwrap().bytes().to_vec();

            let encoded = src.encode_base64(&blobs).unwrap();
            prop_assert!(encoded.is_base64());

            // Through the text channel and back.
            let json = serde_json::to_string(&encoded).unwrap();
            let decoded: BinarySource = serde_json::from_str(&json).unwrap();
            let again = decoded.resolve(&NoBlobs).unwrap().bytes().to_vec();

            prop_assert_eq!(original, again);
        }
    }
}
