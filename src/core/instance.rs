//! Compute instance descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address used when no instance is configured explicitly.
pub const DEFAULT_INSTANCE_ADDRESS: &str = "R://localhost";

/// One back-end instance exposing a fixed number of concurrent slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputeInstance {
    /// Opaque connection target handed to the connector.
    pub address: String,
    /// Total concurrent slots.
    pub capacity: u32,
}

impl ComputeInstance {
    /// Describe an instance.
    pub fn new(address: impl Into<String>, capacity: u32) -> Self {
        Self {
            address: address.into(),
            capacity,
        }
    }

    /// Opaque connection target.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Total concurrent slots.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl Default for ComputeInstance {
    fn default() -> Self {
        Self::new(DEFAULT_INSTANCE_ADDRESS, 1)
    }
}

impl fmt::Display for ComputeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}
