//! Retrace engine crate.
//!
//! Virtualizes an immediate-mode GPU API behind integer handles and a closed
//! command set, so that a command sequence can be executed live, captured as a
//! JSON command log, and replayed against a fresh device.
//!
//! # Structure
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`handle`] | typed handles, `HandleAllocator` |
//! | [`binary`] | `BinarySource` resolution and base64 encoding |
//! | [`device`] | `Device` backend trait, `SoftDevice`, `GpuDevice` |
//! | [`context`] | `Context` (resource table, program cache, dispose) |
//! | [`exec`] | command parameter records and the `Executor` seam |
//! | [`state`] | state descriptor, partial updates, applicator |
//! | [`poll`] | `AsyncResult`, `PixelBuffer` |
//! | [`record`] | `Command`, `CommandLog`, `Recorder`, `replay` |
//!
//! # Quick start
//!
//! ```rust
//! use retrace_engine::context::Context;
//! use retrace_engine::device::{SoftDevice, SoftDeviceOptions};
//! use retrace_engine::exec::{ClearParams, ExecutorExt, ReadPixelsParams};
//!
//! let mut ctx = Context::new(SoftDevice::new(SoftDeviceOptions::default()));
//! ctx.clear(ClearParams::back([1.0, 0.0, 1.0, 1.0])).unwrap();
//! let read = ctx.read_pixels(ReadPixelsParams::default()).unwrap();
//! while !read.poll() {}
//! let pixels = read.take().unwrap().unwrap();
//! assert_eq!(pixels.pixel(0, 0), &[255, 0, 255, 255]);
//! ```

pub mod binary;
pub mod context;
pub mod device;
pub mod error;
pub mod exec;
pub mod handle;
pub mod logging;
pub mod poll;
pub mod record;
pub mod state;

pub use error::{Error, Result, StatusError};
