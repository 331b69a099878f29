//! Binary payload resolution.
//!
//! Payloads reach the executor in one of four forms (inline literal array,
//! base64 string, blob reference, raw bytes). Everything downstream works on
//! the resolved byte view; the recorder re-encodes every form as base64 so a
//! command log can travel over a text channel without loss.

mod element;
mod source;

pub use element::ElementType;
pub use source::{BinarySource, BlobLookup, NoBlobs, Resolved};
