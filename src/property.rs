//! Variable-length property descriptor parser (§3 Property descriptor).
//!
//! `SdioGetAllExtDevicePropInfo` returns a concatenation of these records;
//! [`parse_all`] walks the buffer until it is exhausted, yielding one
//! [`PropertyDescriptor`] per `prop_code`. Widths narrower than 4 bytes are
//! zero-extended; sign interpretation of signed data types is a
//! higher-layer concern (value codecs in [`crate::device`]), per the design
//! note in §9.

use std::collections::HashMap;

use crate::codec;
use crate::error::{CodecError, CodecResult};

/// A camera property as surfaced by `SdioGetAllExtDevicePropInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropertyDescriptor {
    /// Raw data-type code from the wire (`2..7`; others are treated as the
    /// 4-byte default per §3).
    pub data_type: u16,
    /// Current value, zero-extended to 32 bits.
    pub current_value: u32,
    pub is_writable: bool,
    pub is_enabled: bool,
}

/// Width in bytes of a property value for a given `data_type` code.
/// Unknown codes are treated as 4-byte (§3, §9).
fn value_size(data_type: u16) -> usize {
    match data_type {
        2 | 3 => 1,
        4 | 5 => 2,
        6 | 7 => 4,
        _ => 4,
    }
}

/// Form flag values (§3).
const FORM_NONE: u8 = 0x00;
const FORM_RANGE: u8 = 0x01;
const FORM_ENUM: u8 = 0x02;

/// Parse a concatenated list of property descriptors, consuming the buffer
/// exactly and returning a `prop_code -> descriptor` mapping. Later entries
/// for the same `prop_code` overwrite earlier ones (the wire format does
/// not repeat codes in practice, but this keeps the map well-defined if it
/// ever did).
pub fn parse_all(data: &[u8]) -> CodecResult<HashMap<u16, PropertyDescriptor>> {
    let mut out = HashMap::new();
    let mut offset = 0;

    while offset < data.len() {
        let prop_code = codec::read_u16(data, offset)?;
        let data_type = codec::read_u16(data, offset + 2)?;
        let get_set = read_u8(data, offset + 4)?;
        let is_enabled = read_u8(data, offset + 5)?;
        offset += 6;

        let size = value_size(data_type);

        // default_value — skipped.
        check_remaining(data, offset, size)?;
        offset += size;

        // current_value — little-endian unsigned, zero-extended.
        let current_value = codec::read_uint_le(data, offset, size)?;
        offset += size;

        let form_flag = read_u8(data, offset)?;
        offset += 1;

        match form_flag {
            FORM_NONE => {}
            FORM_RANGE => {
                // min, max, step — each `size` bytes.
                let span = size * 3;
                check_remaining(data, offset, span)?;
                offset += span;
            }
            FORM_ENUM => {
                let count = codec::read_u16(data, offset)? as usize;
                offset += 2;
                let span = size * count;
                check_remaining(data, offset, span)?;
                offset += span;
            }
            other => return Err(CodecError::UnknownFormFlag(other)),
        }

        out.insert(
            prop_code,
            PropertyDescriptor {
                data_type,
                current_value,
                is_writable: get_set == 0x01,
                is_enabled: is_enabled == 0x01,
            },
        );
    }

    Ok(out)
}

fn read_u8(data: &[u8], offset: usize) -> CodecResult<u8> {
    data.get(offset)
        .copied()
        .ok_or_else(|| CodecError::payload_too_short("property descriptor byte", offset + 1, data.len()))
}

fn check_remaining(data: &[u8], offset: usize, need: usize) -> CodecResult<()> {
    if data.len() < offset + need {
        Err(CodecError::payload_too_short(
            "property descriptor",
            offset + need,
            data.len(),
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build one descriptor's bytes for a given data type / form flag, with
    /// a current value chosen to fit the type's width.
    fn build_descriptor(prop_code: u16, data_type: u16, current: u32, form: u8) -> Vec<u8> {
        let size = value_size(data_type);
        let mut buf = Vec::new();
        codec::write_u16(&mut buf, prop_code);
        codec::write_u16(&mut buf, data_type);
        buf.push(0x01); // writable
        buf.push(0x01); // enabled

        let le = |v: u32, n: usize| -> Vec<u8> { v.to_le_bytes()[..n].to_vec() };

        buf.extend(le(0, size)); // default_value
        buf.extend(le(current, size)); // current_value
        buf.push(form);

        match form {
            FORM_NONE => {}
            FORM_RANGE => {
                buf.extend(le(0, size)); // min
                buf.extend(le(100, size)); // max
                buf.extend(le(1, size)); // step
            }
            FORM_ENUM => {
                let values = [current, current + 1];
                codec::write_u16(&mut buf, values.len() as u16);
                for v in values {
                    buf.extend(le(v, size));
                }
            }
            _ => {}
        }

        buf
    }

    #[test]
    fn round_trip_every_width_and_form() {
        let mut data = Vec::new();
        let mut expected = HashMap::new();

        let mut code = 0xD200;
        for &data_type in &[2u16, 3, 4, 5, 6, 7, 0xFFFF] {
            for &form in &[FORM_NONE, FORM_RANGE, FORM_ENUM] {
                let current = 5u32;
                data.extend(build_descriptor(code, data_type, current, form));
                expected.insert(
                    code,
                    PropertyDescriptor {
                        data_type,
                        current_value: current,
                        is_writable: true,
                        is_enabled: true,
                    },
                );
                code += 1;
            }
        }

        let parsed = parse_all(&data).unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn narrow_values_zero_extend() {
        // 1-byte data type, current_value = 0xFF should zero-extend to 0xFF,
        // not sign-extend to 0xFFFFFFFF.
        let data = build_descriptor(0xD218, 2, 0xFF, FORM_NONE);
        let parsed = parse_all(&data).unwrap();
        assert_eq!(parsed[&0xD218].current_value, 0xFF);
    }

    #[test]
    fn not_writable_not_enabled() {
        let mut buf = Vec::new();
        codec::write_u16(&mut buf, 0x5005);
        codec::write_u16(&mut buf, 4); // 2-byte type
        buf.push(0x00); // not writable
        buf.push(0x00); // not enabled
        buf.extend([0u8, 0]); // default
        buf.extend([0x02u8, 0]); // current = 2
        buf.push(FORM_NONE);

        let parsed = parse_all(&buf).unwrap();
        let desc = parsed[&0x5005];
        assert!(!desc.is_writable);
        assert!(!desc.is_enabled);
        assert_eq!(desc.current_value, 2);
    }

    #[test]
    fn truncated_buffer_errors() {
        let mut buf = Vec::new();
        codec::write_u16(&mut buf, 0x5005);
        codec::write_u16(&mut buf, 4);
        buf.push(0x01);
        // missing is_enabled and beyond
        assert!(parse_all(&buf).is_err());
    }

    #[test]
    fn unrecognized_form_flag_errors() {
        let data = build_descriptor(0x5005, 4, 2, 0x7F);
        match parse_all(&data) {
            Err(CodecError::UnknownFormFlag(0x7F)) => {}
            other => panic!("expected UnknownFormFlag(0x7F), got {other:?}"),
        }
    }
}
