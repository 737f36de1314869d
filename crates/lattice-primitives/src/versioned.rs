//! Versioned byte values.

use serde::{Deserialize, Serialize};

/// A byte payload paired with a monotonically increasing version.
///
/// For a given primitive instance, the versions observed by any subscriber
/// are totally ordered and strictly increasing per delivered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue {
    /// Opaque value bytes; interpretation belongs to the primitive.
    pub value: Vec<u8>,
    /// Commit version of this value.
    pub version: u64,
}

impl VersionedValue {
    /// Creates a versioned value.
    pub fn new(value: impl Into<Vec<u8>>, version: u64) -> Self {
        Self {
            value: value.into(),
            version,
        }
    }
}
