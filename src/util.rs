//! # MQTT Serialization Utilities
//!
//! Helpers for reading and writing MQTT primitive types from and to byte
//! buffers: variable-byte integers, big-endian `u16`s and length-prefixed
//! strings / binary blobs.

use crate::error::ProtocolError;

/// Reads a variable-byte integer from the buffer, advancing the cursor.
///
/// This is the encoding MQTT uses for the remaining-length field.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> Result<usize, ProtocolError> {
    let mut multiplier = 1;
    let mut value = 0;
    let mut i = 0;
    loop {
        let encoded_byte = buf
            .get(*cursor + i)
            .ok_or(ProtocolError::MalformedPacket)?;
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            break;
        }
        multiplier *= 128;
        i += 1;
        if i >= 4 {
            return Err(ProtocolError::MalformedPacket);
        }
    }
    *cursor += i + 1;
    Ok(value)
}

/// Writes a variable-byte integer at the start of `buf`, returning the byte count.
pub fn write_variable_byte_integer(buf: &mut [u8], mut val: usize) -> Result<usize, ProtocolError> {
    let mut i = 0;
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(i).ok_or(ProtocolError::BufferTooSmall)? = encoded_byte;
        i += 1;
        if val == 0 {
            break;
        }
    }
    Ok(i)
}

/// Number of bytes `val` occupies as a variable-byte integer.
pub fn variable_byte_integer_len(val: usize) -> usize {
    match val {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Reads a big-endian `u16`, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, ProtocolError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(ProtocolError::MalformedPacket)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Writes a big-endian `u16` at the start of `buf`.
pub fn write_u16(buf: &mut [u8], val: u16) -> Result<usize, ProtocolError> {
    buf.get_mut(0..2)
        .ok_or(ProtocolError::BufferTooSmall)?
        .copy_from_slice(&val.to_be_bytes());
    Ok(2)
}

/// Reads a UTF-8 encoded string (prefixed with a 2-byte length) from the buffer.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a str, ProtocolError> {
    let len = read_u16(cursor, buf)? as usize;
    let s = core::str::from_utf8(
        buf.get(*cursor..*cursor + len)
            .ok_or(ProtocolError::MalformedPacket)?,
    )
    .map_err(|_| ProtocolError::InvalidUtf8String)?;
    *cursor += len;
    Ok(s)
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length) to the buffer.
pub fn write_utf8_string(buf: &mut [u8], s: &str) -> Result<usize, ProtocolError> {
    write_binary(buf, s.as_bytes())
}

/// Writes length-prefixed binary data, as used for will payloads and passwords.
pub fn write_binary(buf: &mut [u8], data: &[u8]) -> Result<usize, ProtocolError> {
    let len = data.len();
    if len > u16::MAX as usize {
        return Err(ProtocolError::PayloadTooLarge);
    }

    let required_space = 2 + len;
    let slice = buf
        .get_mut(0..required_space)
        .ok_or(ProtocolError::BufferTooSmall)?;

    slice[0..2].copy_from_slice(&(len as u16).to_be_bytes());
    slice[2..].copy_from_slice(data);
    Ok(required_space)
}

/// Copies `data` to the start of `buf` without a length prefix.
pub fn write_raw(buf: &mut [u8], data: &[u8]) -> Result<usize, ProtocolError> {
    buf.get_mut(0..data.len())
        .ok_or(ProtocolError::BufferTooSmall)?
        .copy_from_slice(data);
    Ok(data.len())
}
