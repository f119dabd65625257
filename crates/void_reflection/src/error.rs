//! Error types for the reflection probe system

use thiserror::Error;

/// Reflection probe system errors
///
/// Steady-state conditions (stale probes, export overflow, skipped frames) are
/// not errors; they are absorbed by the manager. These variants only surface
/// from the slot pool and from configuration parsing.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No free slot and no probe outside the guaranteed window holds one
    #[error("Reflection probe slot pool exhausted (capacity {capacity})")]
    SlotPoolExhausted {
        /// Pool capacity at the time of the request
        capacity: u32,
    },

    /// Slot index outside the pool
    #[error("Invalid reflection probe slot {slot} (capacity {capacity})")]
    InvalidSlot {
        /// Requested slot
        slot: u32,
        /// Pool capacity
        capacity: u32,
    },

    /// Slot is already free
    #[error("Reflection probe slot {0} is not owned")]
    SlotNotOwned(u32),

    /// Invalid configuration
    #[error("Invalid reflection probe configuration: {0}")]
    InvalidConfig(String),

    /// Config or state (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for reflection probe operations
pub type Result<T> = std::result::Result<T, ProbeError>;
