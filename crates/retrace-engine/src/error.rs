//! Error types.
//!
//! Two families:
//! - [`Error`]: contract violations and device refusals. Raised synchronously
//!   by the call that caused them and never retried.
//! - [`StatusError`]: advisory device status, only surfaced by an explicit
//!   `check_status` call. Callers may log it and continue.

use std::fmt;

use thiserror::Error;

use crate::device::DeviceError;
use crate::handle::ResourceKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The device refused to create an object.
    #[error("failed to create {kind} ({params}): {reason}")]
    Creation {
        kind: ResourceKind,
        params: String,
        reason: String,
    },

    /// A handle with no live object behind it.
    #[error("invalid {kind} handle {handle}")]
    InvalidHandle { kind: ResourceKind, handle: u32 },

    /// A create call named a handle whose slot is still live.
    #[error("{kind} handle {handle} is already live")]
    HandleInUse { kind: ResourceKind, handle: u32 },

    /// An optional device extension is missing. Reported at first use.
    #[error("unsupported capability: {0}")]
    Unsupported(String),

    #[error("device limit {limit} exceeded: requested {requested}, maximum {max}")]
    LimitExceeded {
        limit: &'static str,
        requested: u64,
        max: u64,
    },

    /// A binary source or command log entry that matches no known form.
    #[error("{message}: {value}")]
    Format { message: String, value: String },

    #[error("unknown clear buffer type {0:?}")]
    UnknownClearTarget(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Reading or writing a command log failed.
    #[error("command log i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("context has been disposed")]
    Disposed,

    /// An async result whose fence failed. Delivered through the result, not
    /// raised by the issuing call.
    #[error("async operation failed: {0}")]
    AsyncFailed(String),

    #[error("replay failed at command {index} ({op})")]
    Replay {
        index: usize,
        op: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn format(message: impl Into<String>, value: impl fmt::Display) -> Self {
        Error::Format {
            message: message.into(),
            value: value.to_string(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Returns the innermost error, looking through replay wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Replay { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Advisory device status, classified the way GL error codes are.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Error)]
pub enum StatusError {
    #[error("invalid enum")]
    InvalidEnum,
    #[error("invalid value")]
    InvalidValue,
    #[error("invalid operation")]
    InvalidOperation,
    #[error("invalid framebuffer operation")]
    InvalidFramebufferOperation,
    #[error("out of memory")]
    OutOfMemory,
    #[error("context lost")]
    ContextLost,
}

impl StatusError {
    /// The matching GL error enum value.
    pub fn code(self) -> u32 {
        match self {
            StatusError::InvalidEnum => 0x0500,
            StatusError::InvalidValue => 0x0501,
            StatusError::InvalidOperation => 0x0502,
            StatusError::OutOfMemory => 0x0505,
            StatusError::InvalidFramebufferOperation => 0x0506,
            StatusError::ContextLost => 0x9242,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_error_names_kind_and_params() {
        let err = Error::Creation {
            kind: ResourceKind::Texture,
            params: "4096x4096 rgba8".into(),
            reason: "too large".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("texture"), "{msg}");
        assert!(msg.contains("4096x4096"), "{msg}");
    }

    #[test]
    fn root_unwraps_replay_chain() {
        let err = Error::Replay {
            index: 3,
            op: "draw",
            source: Box::new(Error::Unsupported("multi_draw".into())),
        };
        assert!(matches!(err.root(), Error::Unsupported(_)));
        assert!(err.to_string().contains("command 3"));
    }

    #[test]
    fn status_codes_match_gl() {
        assert_eq!(StatusError::InvalidOperation.code(), 0x0502);
        assert_eq!(StatusError::ContextLost.code(), 0x9242);
    }
}
