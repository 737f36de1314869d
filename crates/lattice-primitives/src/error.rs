//! Primitive layer errors.

use thiserror::Error;

use lattice_transport::TransportError;

/// Errors surfaced by the primitive event layer.
#[derive(Debug, Error)]
pub enum PrimitiveError {
    #[error("invalid version transition: {old_version} -> {new_version}")]
    InvalidTransition { old_version: u64, new_version: u64 },

    #[error("event encoding failed: {0}")]
    Encoding(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result alias for primitive operations.
pub type Result<T> = std::result::Result<T, PrimitiveError>;
