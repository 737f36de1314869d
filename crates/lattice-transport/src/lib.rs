#![warn(missing_docs)]

//! Lattice cluster transport: length-prefixed framed TCP connections,
//! serial execution contexts, and an address-bound server lifecycle.
//!
//! All state-mutating operations must run inside an [`ExecutionContext`];
//! raw I/O tasks re-enter the owning context before touching shared state,
//! so every visible transition of a server or connection is totally ordered.

pub mod client;
pub mod connection;
pub mod context;
pub mod error;
pub mod framing;
pub mod member;
pub mod metrics;
pub mod registry;
pub mod server;

pub use client::{ClientConfig, TransportClient};
pub use connection::{Connection, ConnectionId};
pub use context::ExecutionContext;
pub use error::{Result, TransportError};
pub use framing::{FrameDecoder, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use member::Member;
pub use metrics::{MetricsSnapshot, TransportMetrics};
pub use registry::ConnectionRegistry;
pub use server::{ConnectionListener, ServerConfig, TransportServer};
