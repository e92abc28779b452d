// error.rs — Error taxonomy for the topic, service and action layers.
//
// Callers need to tell four failure kinds apart: the substrate failed
// (Transport), a payload could not be encoded/decoded (Serialization), the
// remote service handler failed (Service), or nothing usable arrived in time
// (Timeout). `ZrcError::kind()` exposes that classification.

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use zrc_codec::CodecError;
use zrc_transport::TransportError;

use crate::action::ActionStatus;

/// Errors returned by ZRC endpoints.
#[derive(Debug, Error)]
pub enum ZrcError {
    /// The substrate call itself failed (closed session, bad key, reply error).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Encoding or decoding a payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] CodecError),

    /// The remote service handler failed and answered with an error envelope.
    #[error("service '{service}' failed: {message}")]
    Service { service: String, message: String },

    /// No usable reply or result arrived before the deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// A terminal result was already published for this goal.
    #[error("goal {goal_id} already has a terminal result")]
    GoalFinalized { goal_id: String },

    /// The requested status change is not allowed from the goal's current status.
    #[error("invalid status transition from {from} to {to} for goal {goal_id}")]
    InvalidStatus {
        goal_id: String,
        from: ActionStatus,
        to: ActionStatus,
    },

    /// Failed to read a configuration file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Coarse classification of a [`ZrcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Serialization,
    Service,
    Timeout,
    Protocol,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Service => "service",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

impl ZrcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ZrcError::Transport(_) => ErrorKind::Transport,
            ZrcError::Serialization(_) => ErrorKind::Serialization,
            ZrcError::Service { .. } => ErrorKind::Service,
            ZrcError::Timeout { .. } => ErrorKind::Timeout,
            ZrcError::GoalFinalized { .. } | ZrcError::InvalidStatus { .. } => {
                ErrorKind::Protocol
            }
            ZrcError::Io { .. } | ZrcError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub(crate) fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        ZrcError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }
}

impl From<serde_json::Error> for ZrcError {
    fn from(e: serde_json::Error) -> Self {
        ZrcError::Serialization(CodecError::Conversion(e))
    }
}

/// Best-effort text of a panic payload caught with `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
