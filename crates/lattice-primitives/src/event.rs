//! Change events and their wire envelope.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{PrimitiveError, Result};
use crate::versioned::VersionedValue;

/// An immutable `(previous, new)` pair of versioned values describing one
/// committed state transition of a primitive.
///
/// Constructed at the moment a mutation commits, delivered at most once per
/// commit to each currently-subscribed connection, and discarded after
/// delivery, never retained or replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    old_value: VersionedValue,
    new_value: VersionedValue,
}

impl ChangeEvent {
    /// Creates a change event, rejecting non-increasing version pairs.
    pub fn new(old_value: VersionedValue, new_value: VersionedValue) -> Result<Self> {
        let event = Self {
            old_value,
            new_value,
        };
        event.validate()?;
        Ok(event)
    }

    /// The value before the commit.
    pub fn old_value(&self) -> &VersionedValue {
        &self.old_value
    }

    /// The value after the commit.
    pub fn new_value(&self) -> &VersionedValue {
        &self.new_value
    }

    fn validate(&self) -> Result<()> {
        if self.old_value.version >= self.new_value.version {
            return Err(PrimitiveError::InvalidTransition {
                old_version: self.old_value.version,
                new_version: self.new_value.version,
            });
        }
        Ok(())
    }

    /// Encodes this event into a frame payload.
    pub fn encode(&self) -> Result<Bytes> {
        let encoded =
            bincode::serialize(self).map_err(|e| PrimitiveError::Encoding(e.to_string()))?;
        Ok(Bytes::from(encoded))
    }

    /// Decodes an event from a frame payload, re-validating the version
    /// transition since the bytes came from the wire.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let event: ChangeEvent =
            bincode::deserialize(payload).map_err(|e| PrimitiveError::Encoding(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }
}
