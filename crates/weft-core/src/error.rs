use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the bus outside of the boolean hot-path contracts.
///
/// Per-message failures on the routing hot path (failed sends, dropped
/// messages) are reported through counters and booleans instead; this type
/// covers construction, decoding and resource access.
#[derive(Debug, Error)]
pub enum Error {
    /// A serialized message header or control payload could not be
    /// decoded.
    #[error("decoding failed: {0}")]
    Decode(String),

    /// A bridge stream record was not valid base64.
    #[error("framing error: {0}")]
    Framing(String),

    /// A resource locator was not understood.
    #[error("unsupported resource locator: {0}")]
    UnsupportedResource(String),

    /// A file resource path escapes the configured root directory.
    #[error("resource path outside of root: {}", .0.display())]
    ResourceOutsideRoot(PathBuf),

    /// An underlying I/O operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
