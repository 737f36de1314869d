#![warn(missing_docs)]

//! Lattice replicated primitives: versioned values and the change-event
//! notification contract carried over the transport layer.
//!
//! The transport moves opaque payload bytes; this crate defines the shape of
//! asynchronous push messages for replicated primitives (a state transition
//! as a `(previous, new)` pair of versioned values), plus the server-side
//! publisher that fans a committed change out to subscribed connections and
//! the client-side proxy that decodes and delivers it.

pub mod error;
pub mod event;
pub mod proxy;
pub mod publisher;
pub mod versioned;

pub use error::{PrimitiveError, Result};
pub use event::ChangeEvent;
pub use proxy::{ValueListener, ValueProxy};
pub use publisher::{ChangeEventPublisher, PublishOutcome};
pub use versioned::VersionedValue;
