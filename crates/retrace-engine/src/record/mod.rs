//! Command capture and replay.
//!
//! [`Command`] is the closed operation set. A [`Recorder`] wraps any
//! executor and appends each accepted command to a [`CommandLog`];
//! [`replay`] feeds a log back into an executor in order.

mod command;
mod command_log;
mod recorder;
mod replay;

pub use command::Command;
pub use command_log::CommandLog;
pub use recorder::Recorder;
pub use replay::{ReplayOutcome, replay};
