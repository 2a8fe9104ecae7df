//! Error types for the gateway core

use thiserror::Error;

/// Inbound datagram rejected by the frame codec
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Datagram is not exactly one frame long
    #[error("datagram must be {expected} bytes, got {len}")]
    BadLength { len: usize, expected: usize },
}

/// Failure on the synchronous command path
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A required intent field is absent
    #[error("{0} required")]
    MissingField(&'static str),

    /// A field is present but cannot be coerced
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    /// Intent carries none of speed/direction/function
    #[error("no control field (speed/direction/function)")]
    NoControlField,

    /// Outbound send failed; state has already been applied
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl DispatchError {
    /// Whether the caller supplied bad input (as opposed to a send failure)
    pub fn is_input_error(&self) -> bool {
        !matches!(self, DispatchError::Transport(_))
    }
}

/// Failure reading a device catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Catalog file could not be read
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Catalog content is malformed
    #[error("catalog parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },
}
