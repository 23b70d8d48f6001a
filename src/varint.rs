//! Compact-size variable-length integer encoding.
//!
//! The classic "compact size" scheme: values up to 0xFC occupy a single
//! byte; larger magnitudes are escalated through marker bytes 0xFD/0xFE/0xFF
//! followed by a little-endian u16/u32/u64. Encodings are canonical: every
//! value has exactly one valid byte sequence, and decoders reject
//! non-minimal forms. This matters because encoded bytes feed into hashes.

use crate::error::{Result, StorageError};
use std::io::{Read, Write};

/// Marker byte introducing a 2-byte payload.
const MARKER_U16: u8 = 0xFD;
/// Marker byte introducing a 4-byte payload.
const MARKER_U32: u8 = 0xFE;
/// Marker byte introducing an 8-byte payload.
const MARKER_U64: u8 = 0xFF;

/// Largest value that fits in the single-byte fast path.
pub const MAX_SINGLE_BYTE: u64 = 0xFC;

/// Maximum storage width for a constrained varint (CVarInt).
///
/// Used when the pointer/length domain is known to be bounded, e.g. a
/// cluster count that can never exceed `u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CVarIntWidth {
    U16,
    U32,
    U64,
}

impl CVarIntWidth {
    /// Largest value representable at this width.
    pub fn max_value(self) -> u64 {
        match self {
            CVarIntWidth::U16 => u16::MAX as u64,
            CVarIntWidth::U32 => u32::MAX as u64,
            CVarIntWidth::U64 => u64::MAX,
        }
    }

    fn max_marker(self) -> u8 {
        match self {
            CVarIntWidth::U16 => MARKER_U16,
            CVarIntWidth::U32 => MARKER_U32,
            CVarIntWidth::U64 => MARKER_U64,
        }
    }
}

/// Number of bytes `value` occupies when encoded.
pub fn encoded_len(value: u64) -> usize {
    if value <= MAX_SINGLE_BYTE {
        1
    } else if value <= u16::MAX as u64 {
        3
    } else if value <= u32::MAX as u64 {
        5
    } else {
        9
    }
}

/// Encode `value` into `writer`, returning the number of bytes written.
pub fn write_varint<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    if value <= MAX_SINGLE_BYTE {
        writer.write_all(&[value as u8])?;
        Ok(1)
    } else if value <= u16::MAX as u64 {
        writer.write_all(&[MARKER_U16])?;
        writer.write_all(&(value as u16).to_le_bytes())?;
        Ok(3)
    } else if value <= u32::MAX as u64 {
        writer.write_all(&[MARKER_U32])?;
        writer.write_all(&(value as u32).to_le_bytes())?;
        Ok(5)
    } else {
        writer.write_all(&[MARKER_U64])?;
        writer.write_all(&value.to_le_bytes())?;
        Ok(9)
    }
}

/// Decode a varint from `reader`.
///
/// Truncation mid-value and non-minimal encodings are both `CorruptData`.
pub fn read_varint<R: Read>(reader: &mut R) -> Result<u64> {
    read_cvarint(reader, CVarIntWidth::U64)
}

/// Encode `value` with a width constraint.
///
/// Fails if `value` does not fit the declared width; the byte sequence is
/// identical to the unconstrained encoding.
pub fn write_cvarint<W: Write>(writer: &mut W, value: u64, width: CVarIntWidth) -> Result<usize> {
    if value > width.max_value() {
        return Err(StorageError::CorruptData(format!(
            "value {} exceeds {:?} varint domain",
            value, width
        )));
    }
    write_varint(writer, value)
}

/// Decode a varint whose marker must not exceed the declared width.
pub fn read_cvarint<R: Read>(reader: &mut R, width: CVarIntWidth) -> Result<u64> {
    let first = read_byte(reader)?;
    if first <= MAX_SINGLE_BYTE as u8 {
        return Ok(first as u64);
    }
    if first > width.max_marker() {
        return Err(StorageError::CorruptData(format!(
            "varint marker {:#04x} exceeds {:?} width",
            first, width
        )));
    }
    let value = match first {
        MARKER_U16 => {
            let mut buf = [0u8; 2];
            read_exact(reader, &mut buf)?;
            u16::from_le_bytes(buf) as u64
        }
        MARKER_U32 => {
            let mut buf = [0u8; 4];
            read_exact(reader, &mut buf)?;
            u32::from_le_bytes(buf) as u64
        }
        _ => {
            let mut buf = [0u8; 8];
            read_exact(reader, &mut buf)?;
            u64::from_le_bytes(buf)
        }
    };

    // Canonical form check: the marker used must be the smallest that fits.
    let minimal = match first {
        MARKER_U16 => value > MAX_SINGLE_BYTE,
        MARKER_U32 => value > u16::MAX as u64,
        _ => value > u32::MAX as u64,
    };
    if !minimal {
        return Err(StorageError::CorruptData(format!(
            "non-canonical varint: value {} under marker {:#04x}",
            value, first
        )));
    }
    Ok(value)
}

/// Decode a varint from a slice, advancing `pos` past the consumed bytes.
pub fn decode_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut cursor = &buf[(*pos).min(buf.len())..];
    let before = cursor.len();
    let value = read_varint(&mut cursor)?;
    *pos += before - cursor.len();
    Ok(value)
}

/// Encode a varint onto the end of `buf`.
pub fn encode_varint(buf: &mut Vec<u8>, value: u64) {
    // Vec<u8> writes cannot fail.
    write_varint(buf, value).expect("infallible write to Vec");
}

fn read_byte<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_exact(reader, &mut buf)?;
    Ok(buf[0])
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            StorageError::CorruptData("varint truncated by end of stream".into())
        } else {
            StorageError::Io(err)
        }
    })
}
