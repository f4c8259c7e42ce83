//! Streaming-channel sample decoding
//!
//! The streaming endpoint does not use the 20-byte command framing: each
//! notification is a bare 4-byte little-endian IEEE-754 pressure value.

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    constants::SAMPLE_PAYLOAD_SIZE,
    error::{Error, Result},
};

/// Decode one streamed pressure sample
///
/// # Errors
///
/// Returns [`Error::MalformedSample`] for any payload that is not exactly
/// 4 bytes; a truncated notification must never be read as a pressure.
///
/// # Examples
///
/// ```
/// use manocal_core::sample::decode_sample;
///
/// let payload = 101.3_f32.to_le_bytes();
/// assert_eq!(decode_sample(&payload).unwrap(), 101.3);
/// ```
pub fn decode_sample(payload: &[u8]) -> Result<f32> {
    if payload.len() != SAMPLE_PAYLOAD_SIZE {
        return Err(Error::MalformedSample {
            expected: SAMPLE_PAYLOAD_SIZE,
            actual: payload.len(),
        });
    }

    Ok(LittleEndian::read_f32(payload))
}
