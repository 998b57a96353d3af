//! MQTT packet encoding/decoding primitives.
//!
//! Remaining-length variable integers, fixed headers and the big-endian,
//! length-prefixed fields used by CONNECT and PUBLISH.

use crate::error::{Error, ProtocolError, Result};
use crate::types::{FixedHeader, MAX_REMAINING_LENGTH};

/// Calculate the number of bytes needed for a variable-length integer.
pub fn variable_int_len(value: u32) -> Result<usize> {
    match value {
        0..=127 => Ok(1),
        128..=16_383 => Ok(2),
        16_384..=2_097_151 => Ok(3),
        2_097_152..=MAX_REMAINING_LENGTH => Ok(4),
        _ => Err(ProtocolError::RemainingLengthTooLarge.into()),
    }
}

/// Write a variable-length integer.
///
/// Returns the number of bytes written.
pub fn write_variable_int(buf: &mut [u8], mut value: u32) -> Result<usize> {
    let needed = variable_int_len(value)?;
    if buf.len() < needed {
        return Err(Error::BufferTooSmall {
            needed,
            available: buf.len(),
        });
    }

    for slot in buf.iter_mut().take(needed) {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        *slot = byte;
    }

    Ok(needed)
}

/// Read a variable-length integer (remaining length encoding).
///
/// Returns `(value, bytes_consumed)`, or `None` if more bytes are needed.
/// Four bytes that all carry the continuation bit are malformed.
pub fn read_variable_int(buf: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut multiplier = 1u32;
    let mut value = 0u32;

    for (i, &byte) in buf.iter().enumerate() {
        if i == 4 {
            break;
        }

        value += (byte & 0x7f) as u32 * multiplier;

        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }

        multiplier *= 128;
    }

    if buf.len() >= 4 {
        return Err(ProtocolError::MalformedRemainingLength.into());
    }

    Ok(None)
}

/// Parse a fixed header from the start of `buf`.
///
/// Returns `(header, header_len)`, or `None` if the header is incomplete.
pub fn read_fixed_header(buf: &[u8]) -> Result<Option<(FixedHeader, usize)>> {
    let Some((&first_byte, rest)) = buf.split_first() else {
        return Ok(None);
    };

    Ok(read_variable_int(rest)?
        .map(|(remaining_length, var_len)| (FixedHeader::new(first_byte, remaining_length), 1 + var_len)))
}

/// Write a fixed header to `buf`.
pub fn write_fixed_header(buf: &mut [u8], first_byte: u8, remaining_length: u32) -> Result<usize> {
    let Some((first, rest)) = buf.split_first_mut() else {
        return Err(Error::BufferTooSmall {
            needed: 1 + variable_int_len(remaining_length)?,
            available: 0,
        });
    };

    *first = first_byte;
    Ok(1 + write_variable_int(rest, remaining_length)?)
}

/// Read a 2-byte big-endian u16.
pub fn read_u16(buf: &[u8]) -> Option<u16> {
    match buf {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

/// Write a 2-byte big-endian u16.
pub fn write_u16(buf: &mut [u8], value: u16) -> Result<usize> {
    ensure_len(buf, 2)?;
    buf[..2].copy_from_slice(&value.to_be_bytes());
    Ok(2)
}

/// Write a UTF-8 string (2-byte length prefix + data).
pub fn write_string(buf: &mut [u8], s: &str) -> Result<usize> {
    write_binary(buf, s.as_bytes())
}

/// Write binary data (2-byte length prefix + data).
pub fn write_binary(buf: &mut [u8], data: &[u8]) -> Result<usize> {
    let len = prefixed_len(data.len())?;
    ensure_len(buf, len)?;

    write_u16(buf, data.len() as u16)?;
    buf[2..len].copy_from_slice(data);

    Ok(len)
}

/// Encoded size of a length-prefixed field.
pub fn prefixed_len(data_len: usize) -> Result<usize> {
    if data_len > u16::MAX as usize {
        return Err(ProtocolError::FieldTooLong(data_len).into());
    }
    Ok(2 + data_len)
}

fn ensure_len(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(Error::BufferTooSmall {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_int_known_encodings() {
        let cases: [(u32, &[u8]); 8] = [
            (0, &[0x00]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xff, 0x7f]),
            (16_384, &[0x80, 0x80, 0x01]),
            (2_097_151, &[0xff, 0xff, 0x7f]),
            (2_097_152, &[0x80, 0x80, 0x80, 0x01]),
            (268_435_455, &[0xff, 0xff, 0xff, 0x7f]),
        ];

        let mut buf = [0u8; 4];
        for (value, encoded) in cases {
            let written = write_variable_int(&mut buf, value).unwrap();
            assert_eq!(&buf[..written], encoded, "encoding {value}");
            assert_eq!(variable_int_len(value).unwrap(), encoded.len());
            assert_eq!(read_variable_int(encoded).unwrap(), Some((value, encoded.len())));
        }
    }

    #[test]
    fn test_variable_int_range_sweep() {
        let boundaries = [
            0,
            1,
            126,
            127,
            128,
            129,
            16_382,
            16_383,
            16_384,
            16_385,
            2_097_150,
            2_097_151,
            2_097_152,
            2_097_153,
            268_435_454,
            MAX_REMAINING_LENGTH,
        ];
        let stride = (0..=MAX_REMAINING_LENGTH).step_by(65_521);

        let mut buf = [0u8; 4];
        for value in boundaries.into_iter().chain(stride) {
            let written = write_variable_int(&mut buf, value).unwrap();
            assert_eq!(written, variable_int_len(value).unwrap(), "length of {value}");
            assert_eq!(read_variable_int(&buf[..written]).unwrap(), Some((value, written)), "decoding {value}");
            // The last byte terminates the encoding.
            assert_eq!(buf[written - 1] & 0x80, 0, "terminator of {value}");
        }
    }

    #[test]
    fn test_variable_int_out_of_range() {
        let mut buf = [0u8; 8];
        assert!(matches!(
            variable_int_len(MAX_REMAINING_LENGTH + 1),
            Err(Error::Protocol(ProtocolError::RemainingLengthTooLarge))
        ));
        assert!(matches!(
            write_variable_int(&mut buf, 268_435_456),
            Err(Error::Protocol(ProtocolError::RemainingLengthTooLarge))
        ));
        assert!(matches!(
            write_variable_int(&mut buf, u32::MAX),
            Err(Error::Protocol(ProtocolError::RemainingLengthTooLarge))
        ));
    }

    #[test]
    fn test_variable_int_buffer_too_small() {
        let mut buf = [0u8; 1];
        assert!(matches!(
            write_variable_int(&mut buf, 128),
            Err(Error::BufferTooSmall { needed: 2, available: 1 })
        ));
    }

    #[test]
    fn test_read_variable_int_incomplete() {
        assert_eq!(read_variable_int(&[]).unwrap(), None);
        assert_eq!(read_variable_int(&[0x80]).unwrap(), None);
        assert_eq!(read_variable_int(&[0xff, 0xff, 0xff]).unwrap(), None);
    }

    #[test]
    fn test_read_variable_int_malformed() {
        assert!(matches!(
            read_variable_int(&[0xff, 0xff, 0xff, 0xff]),
            Err(Error::Protocol(ProtocolError::MalformedRemainingLength))
        ));
        assert!(read_variable_int(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }

    #[test]
    fn test_read_variable_int_non_minimal() {
        // Non-minimal zero is accepted.
        assert_eq!(read_variable_int(&[0x80, 0x80, 0x80, 0x00]).unwrap(), Some((0, 4)));
    }

    #[test]
    fn test_fixed_header() {
        let mut buf = [0u8; 5];
        let len = write_fixed_header(&mut buf, 0x30, 321).unwrap();
        assert_eq!(len, 3);
        assert_eq!(&buf[..3], &[0x30, 0xc1, 0x02]);

        let (header, header_len) = read_fixed_header(&buf[..3]).unwrap().unwrap();
        assert_eq!(header, FixedHeader::new(0x30, 321));
        assert_eq!(header_len, 3);

        assert_eq!(read_fixed_header(&buf[..2]).unwrap(), None);
        assert_eq!(read_fixed_header(&[]).unwrap(), None);
    }

    #[test]
    fn test_u16() {
        let mut buf = [0u8; 2];
        write_u16(&mut buf, 0x1234).unwrap();
        assert_eq!(buf, [0x12, 0x34]);
        assert_eq!(read_u16(&buf), Some(0x1234));
        assert_eq!(read_u16(&buf[..1]), None);
    }

    #[test]
    fn test_string() {
        let mut buf = [0u8; 20];
        let len = write_string(&mut buf, "hello").unwrap();
        assert_eq!(len, 7);
        assert_eq!(&buf[..7], b"\x00\x05hello");

        let mut short = [0u8; 4];
        assert!(matches!(
            write_string(&mut short, "hello"),
            Err(Error::BufferTooSmall { needed: 7, available: 4 })
        ));
    }

    #[test]
    fn test_field_too_long() {
        let data = vec![0u8; u16::MAX as usize + 1];
        let mut buf = vec![0u8; data.len() + 2];
        assert!(matches!(
            write_binary(&mut buf, &data),
            Err(Error::Protocol(ProtocolError::FieldTooLong(65536)))
        ));
    }
}
