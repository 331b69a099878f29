//! Non-blocking async results.
//!
//! A readback returns immediately with an [`AsyncResult`]. The caller drives
//! it with [`AsyncResult::poll`], typically once per frame, or awaits
//! [`AsyncResult::wait`] on an executor such as `pollster`.

mod pixels;
mod registry;
mod result;

pub use pixels::PixelBuffer;
pub use registry::PendingRegistry;
pub use result::{AsyncResult, Wait};
