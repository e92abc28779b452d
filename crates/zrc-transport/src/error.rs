// error.rs — Error types for the messaging substrate.

use thiserror::Error;

/// Errors reported by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The session was closed; no further traffic is accepted.
    #[error("session closed")]
    SessionClosed,

    /// The key expression is malformed (empty chunk, leading slash, ...).
    #[error("invalid key expression '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// A put was rejected by the substrate.
    #[error("put to {key} failed: {reason}")]
    PutFailed { key: String, reason: String },

    /// A queryable answered with an error reply instead of a sample.
    #[error("reply from {key} failed: {reason}")]
    ReplyFailed { key: String, reason: String },

    /// The substrate could not start a delivery worker.
    #[error("failed to spawn delivery thread for {key}: {reason}")]
    SpawnFailed { key: String, reason: String },
}
