//! Error types for manocal-core

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol codec errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Buffer does not hold a whole packet
    #[error("Packet too short: expected {expected} bytes, got {actual} bytes")]
    PacketTooShort { expected: usize, actual: usize },

    /// A response header field does not match what was expected
    #[error("Protocol mismatch in {field}: expected 0x{expected:04X}, got 0x{actual:04X}")]
    ProtocolMismatch {
        field: &'static str,
        expected: u16,
        actual: u16,
    },

    /// Command id is not part of the calibration command set
    #[error("Unsupported command id: 0x{0:04X}")]
    UnsupportedCommand(u16),

    /// Streaming notification payload has the wrong length
    #[error("Malformed sample payload: expected {expected} bytes, got {actual} bytes")]
    MalformedSample { expected: usize, actual: usize },

    /// Payload does not fit the fixed payload window
    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },
}
