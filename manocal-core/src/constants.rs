//! Protocol constants

/// Fixed size of every command and response packet
pub const PACKET_SIZE: usize = 20;

/// Offset of the length constant byte
pub const LENGTH_OFFSET: usize = 2;

/// Offset of the first payload byte
pub const PAYLOAD_OFFSET: usize = 3;

/// Offset of the server/subsystem id byte
pub const SERVER_ID_OFFSET: usize = 15;

/// Server/subsystem id of the calibration command handler
pub const SERVER_ID: u8 = 0x21;

/// Payload window between the header and the server id byte
pub const MAX_PAYLOAD_SIZE: usize = SERVER_ID_OFFSET - PAYLOAD_OFFSET;

/// Longest accepted device name, in bytes
pub const MAX_NAME_SIZE: usize = MAX_PAYLOAD_SIZE;

/// Exact size of a streaming-channel notification payload
pub const SAMPLE_PAYLOAD_SIZE: usize = 4;
