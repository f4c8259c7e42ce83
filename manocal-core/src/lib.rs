//! # manocal-core
//!
//! Core protocol implementation for wireless pressure-transmitter
//! calibration.
//!
//! This crate provides the low-level protocol primitives:
//! - Fixed-size packet structure and encoding/decoding
//! - Command definitions
//! - Typed request/response messages
//! - Streaming sample decoding
//! - Protocol constants

pub mod command;
pub mod constants;
pub mod error;
pub mod message;
pub mod packet;
pub mod sample;

pub use command::Command;
pub use error::{Error, Result};
pub use message::{CalRequest, CalResponse};
pub use packet::Packet;
pub use sample::decode_sample;

/// Protocol version information
pub const PROTOCOL_VERSION: &str = "1.0";

/// Fixed packet size
pub const PACKET_SIZE: usize = constants::PACKET_SIZE;
