//! Transport error taxonomy.

use thiserror::Error;

/// Errors surfaced by the transport layer.
///
/// Every failure is reported through the asynchronous completion of the
/// operation that caused it; this layer never retries or buffers on the
/// caller's behalf.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bind failed for {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("connect timeout after {timeout_ms}ms to {addr}")]
    ConnectTimeout { addr: String, timeout_ms: u64 },

    #[error("frame too large: {length} bytes (max {max})")]
    FrameTooLarge { length: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("server closed")]
    ServerClosed,

    #[error("close failed: {reason}")]
    CloseFailed { reason: String },

    #[error("{operation} invoked outside an execution context")]
    ContextViolation { operation: String },

    #[error("execution context terminated")]
    ContextTerminated,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
