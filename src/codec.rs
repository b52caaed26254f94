//! Field codecs and packet builders for the PTP/IP wire protocol (§4.1).
//!
//! All multi-byte integers are little-endian. The codec is stateless:
//! every builder below returns a single contiguous buffer sized exactly to
//! the packet, and every reader returns an error rather than panicking on a
//! short buffer.

use crate::error::{CodecError, CodecResult};
use crate::packet::PacketType;

// ---------------------------------------------------------------------------
// Read helpers
// ---------------------------------------------------------------------------

/// Read a little-endian unsigned 16-bit integer.
pub fn read_u16(data: &[u8], offset: usize) -> CodecResult<u16> {
    check_len(data, offset, 2, "u16")?;
    Ok(u16::from_le_bytes([data[offset], data[offset + 1]]))
}

/// Read a little-endian unsigned 32-bit integer.
pub fn read_u32(data: &[u8], offset: usize) -> CodecResult<u32> {
    check_len(data, offset, 4, "u32")?;
    Ok(u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ]))
}

/// Read a little-endian unsigned 64-bit integer.
pub fn read_u64(data: &[u8], offset: usize) -> CodecResult<u64> {
    check_len(data, offset, 8, "u64")?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    Ok(u64::from_le_bytes(bytes))
}

/// Read `width` little-endian bytes as an unsigned value, zero-extended to
/// `u32`. Widths other than 1/2/4 are rejected by the caller upstream; this
/// helper trusts `width <= 4`.
pub fn read_uint_le(data: &[u8], offset: usize, width: usize) -> CodecResult<u32> {
    check_len(data, offset, width, "uint(variable width)")?;
    let mut acc: u32 = 0;
    for i in (0..width).rev() {
        acc = (acc << 8) | data[offset + i] as u32;
    }
    Ok(acc)
}

// ---------------------------------------------------------------------------
// Write helpers
// ---------------------------------------------------------------------------

/// Write a little-endian unsigned 16-bit integer.
pub fn write_u16(buf: &mut Vec<u8>, val: u16) {
    buf.extend_from_slice(&val.to_le_bytes());
}

/// Write a little-endian unsigned 32-bit integer.
pub fn write_u32(buf: &mut Vec<u8>, val: u32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

/// Write a little-endian unsigned 64-bit integer.
pub fn write_u64(buf: &mut Vec<u8>, val: u64) {
    buf.extend_from_slice(&val.to_le_bytes());
}

// ---------------------------------------------------------------------------
// Internal
// ---------------------------------------------------------------------------

fn check_len(data: &[u8], offset: usize, need: usize, name: &'static str) -> CodecResult<()> {
    if data.len() < offset + need {
        Err(CodecError::payload_too_short(name, offset + need, data.len()))
    } else {
        Ok(())
    }
}

/// Write the 8-byte header once the rest of the payload is known, returning
/// the final buffer. `body` is everything after the header.
fn with_header(packet_type: PacketType, body: &[u8]) -> Vec<u8> {
    let total_len = HEADER_LEN + body.len();
    let mut buf = Vec::with_capacity(total_len);
    write_u32(&mut buf, total_len as u32);
    write_u32(&mut buf, packet_type.as_u32());
    buf.extend_from_slice(body);
    buf
}

const HEADER_LEN: usize = crate::packet::HEADER_LEN;

// ---------------------------------------------------------------------------
// Packet builders (§4.1)
// ---------------------------------------------------------------------------

/// Build `InitCommandRequest`: header | 16-byte GUID | UTF-16LE
/// `friendly_name` + U+0000 terminator | `u32 protocol_version`.
pub fn init_command_request(guid: &[u8; 16], friendly_name: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(16 + friendly_name.len() * 2 + 2 + 4);
    body.extend_from_slice(guid);
    for unit in friendly_name.encode_utf16() {
        write_u16(&mut body, unit);
    }
    write_u16(&mut body, 0x0000); // UTF-16 NUL terminator
    write_u32(&mut body, 0x0001_0000); // protocol version
    with_header(PacketType::InitCommandRequest, &body)
}

/// Build `InitEventRequest`: header | u32 connection_id (12 bytes total).
pub fn init_event_request(connection_id: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(4);
    write_u32(&mut body, connection_id);
    with_header(PacketType::InitEventRequest, &body)
}

/// Build `OperationRequest`: header | u32 phase | u16 opcode | u32 txn |
/// N x u32 params.
///
/// `data_phase` is `true` for an operation with a following data phase
/// (phase indicator 2), `false` for command-only (phase indicator 1).
pub fn operation_request(opcode: u16, txn: u32, params: &[u32], data_phase: bool) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + 2 + 4 + params.len() * 4);
    write_u32(&mut body, if data_phase { 2 } else { 1 });
    write_u16(&mut body, opcode);
    write_u32(&mut body, txn);
    for &p in params {
        write_u32(&mut body, p);
    }
    with_header(PacketType::OperationRequest, &body)
}

/// Build `StartData`: header | u32 txn | u64 payload_size (20 bytes total).
pub fn start_data(txn: u32, payload_size: u64) -> Vec<u8> {
    let mut body = Vec::with_capacity(12);
    write_u32(&mut body, txn);
    write_u64(&mut body, payload_size);
    with_header(PacketType::StartData, &body)
}

/// Build `EndData`: header | u32 txn | payload bytes.
pub fn end_data(txn: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + payload.len());
    write_u32(&mut body, txn);
    body.extend_from_slice(payload);
    with_header(PacketType::EndData, &body)
}

/// Build `ProbeRequest`: header only (8 bytes total).
pub fn probe_request() -> Vec<u8> {
    with_header(PacketType::ProbeRequest, &[])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
