//! Error types for the cache layer.

use std::fmt::Display;

/// Errors produced by the cache layer.
///
/// Only [`crate::DistributedBackend`] implementations surface `NotConnected`,
/// `Connect`, `Backend` and `Command`. [`crate::KeyValueStore`] absorbs them
/// and falls back to the local store, so callers only ever see
/// [`CacheError::NotAnInteger`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("distributed cache is not connected")]
    NotConnected,

    #[error("failed to connect to distributed cache: {0}")]
    Connect(String),

    /// The backend could not be reached or stopped answering.
    #[error("distributed cache {op} failed: {message}")]
    Backend { op: &'static str, message: String },

    /// The backend answered with an error reply for this one command,
    /// e.g. `WRONGTYPE` or a non-integer value under `INCR`.
    #[error("distributed cache rejected {op}: {message}")]
    Command { op: &'static str, message: String },

    #[error("value stored at '{key}' is not an integer")]
    NotAnInteger { key: String },
}

impl CacheError {
    pub fn backend(op: &'static str, err: impl Display) -> Self {
        Self::Backend {
            op,
            message: err.to_string(),
        }
    }

    pub fn command(op: &'static str, err: impl Display) -> Self {
        Self::Command {
            op,
            message: err.to_string(),
        }
    }

    /// Returns `true` when the distributed backend itself is unreachable.
    ///
    /// A `Command` error means the backend answered, so it is not one.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Connect(_) | Self::Backend { .. }
        )
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
