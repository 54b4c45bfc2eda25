//! error.rs - Container subsystem result codes
//!
//! Every failure in the registry / locator / auth / codec pipeline collapses
//! into one of these. Parsing and bounds errors are converted where they are
//! detected; nothing is ever downgraded to success.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContainerError {
    /// Registry storage has not been allocated by the platform yet.
    #[error("container registry not ready")]
    NotReady,

    /// Signature or component name did not match anything.
    #[error("not found")]
    NotFound,

    /// Recognised but unimplemented auth type, image type or codec.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Caller storage is too small; `required` is the size that would fit.
    #[error("buffer too small ({required} required)")]
    BufferTooSmall { required: usize },

    #[error("out of resources")]
    OutOfResources,

    /// Authentication failed. The byte range must not be used.
    #[error("security violation: {0}")]
    SecurityViolation(&'static str),

    #[error("invalid parameter")]
    InvalidParameter,

    /// A container with the same signature is already registered.
    #[error("container already registered")]
    AlreadyStarted,

    /// Malformed header, directory or auth blob; rejected before any hashing.
    #[error("volume corrupted: {0}")]
    VolumeCorrupted(&'static str),

    /// Compressed stream is corrupt. Distinct from an authentication failure.
    #[error("decompression failed: {0}")]
    DecodeFailed(&'static str),
}

impl ContainerError {
    /// Fatal-to-trust failures: the caller must never touch the bytes.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, ContainerError::SecurityViolation(_))
    }
}

pub type Result<T> = core::result::Result<T, ContainerError>;
