//! Error types for the T-Balancer system

use thiserror::Error;

/// Core error type for T-Balancer operations
///
/// Protocol-level anomalies (bad start flag, version mismatch, corrupt
/// sub-blocks) are expected noise on the physical link and are recovered
/// inside the decoder without surfacing here. Only transport failures and
/// collection misuse reach the caller.
#[derive(Error, Debug)]
pub enum TBalancerError {
    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// No controller found on any port
    #[error("Device not found")]
    DeviceNotFound,

    /// Device disconnected (USB unplugged, power cycle)
    #[error("Device disconnected: {0}")]
    DeviceDisconnected(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Removal or front/back access on an empty collection
    #[error("Collection is empty")]
    EmptyCollection,

    /// Indexed access outside `[0, len)`
    #[error("Index out of range: {index} (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// Requested ring capacity cannot hold the elements currently stored
    #[error("Invalid capacity: {requested} (holding {count} elements)")]
    InvalidCapacity { requested: usize, count: usize },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for T-Balancer operations
pub type Result<T> = std::result::Result<T, TBalancerError>;
