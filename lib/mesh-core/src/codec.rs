//! Tag-length-value wire codec for [`CallHeader`]
//!
//! Every field is emitted as (wire type: u8, field id: i16, payload) and
//! the header is terminated by a stop marker. Absent optional fields are
//! simply omitted. Decoding is forward compatible: unknown field ids are
//! skipped by their declared wire type, which is how the schema grows
//! without breaking older readers.

use crate::error::CodecError;
use crate::header::CallHeader;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Wire type tags, compatible with the binary protocol the original
/// framework spoke.
pub mod wire {
    pub const STOP: u8 = 0;
    pub const BOOL: u8 = 2;
    pub const BYTE: u8 = 3;
    pub const DOUBLE: u8 = 4;
    pub const I16: u8 = 6;
    pub const I32: u8 = 8;
    pub const I64: u8 = 10;
    pub const STRING: u8 = 11;
    pub const STRUCT: u8 = 12;
    pub const MAP: u8 = 13;
    pub const SET: u8 = 14;
    pub const LIST: u8 = 15;
}

/// Encode a header into its canonical wire form.
///
/// Dual-representation fields (addresses, transaction ids) are always
/// written as strings; the integer forms are accepted on read only.
pub fn encode(header: &CallHeader) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);

    write_opt_string(&mut buf, 1, &header.service_name);
    write_opt_string(&mut buf, 2, &header.method_name);
    write_opt_string(&mut buf, 3, &header.version_name);
    write_opt_string(&mut buf, 4, &header.caller_mid);
    write_opt_string(&mut buf, 5, &header.caller_ip);
    write_opt_i32(&mut buf, 6, header.caller_port);
    write_opt_string(&mut buf, 7, &header.session_tid);
    write_opt_string(&mut buf, 8, &header.user_ip);
    write_opt_string(&mut buf, 9, &header.caller_tid);
    write_opt_i32(&mut buf, 10, header.timeout);
    write_opt_string(&mut buf, 11, &header.resp_code);
    write_opt_string(&mut buf, 12, &header.resp_message);
    write_opt_string(&mut buf, 13, &header.callee_tid);
    write_opt_string(&mut buf, 14, &header.callee_ip);
    write_opt_i32(&mut buf, 15, header.operator_id);
    write_opt_i32(&mut buf, 16, header.callee_port);
    if let Some(user_id) = header.user_id {
        write_field_header(&mut buf, wire::I64, 17);
        buf.put_i64(user_id);
    }
    write_opt_string(&mut buf, 18, &header.callee_mid);
    write_opt_i32(&mut buf, 19, header.transaction_id);
    write_opt_i32(&mut buf, 20, header.transaction_sequence);
    write_opt_i32(&mut buf, 21, header.callee_time1);
    write_opt_i32(&mut buf, 22, header.callee_time2);
    write_opt_string(&mut buf, 23, &header.operator_name);
    write_opt_i32(&mut buf, 24, header.customer_id);
    write_opt_string(&mut buf, 25, &header.customer_name);
    write_opt_string(&mut buf, 26, &header.session_id);
    write_opt_string(&mut buf, 27, &header.caller_from);

    // Cookies are always emitted, even when empty.
    write_field_header(&mut buf, wire::MAP, 28);
    buf.put_u8(wire::STRING);
    buf.put_u8(wire::STRING);
    buf.put_i32(header.cookies.len() as i32);
    for (key, value) in &header.cookies {
        write_string(&mut buf, key);
        write_string(&mut buf, value);
    }

    buf.put_u8(wire::STOP);
    buf.freeze()
}

/// Decode a header from its wire form.
///
/// Unknown field ids, and known ids carrying an unexpected wire type, are
/// skipped rather than rejected. Mandatory-field presence is deliberately
/// not checked here; callers run [`CallHeader::validate`] when they need a
/// dispatchable header.
pub fn decode(mut buf: &[u8]) -> Result<CallHeader, CodecError> {
    let buf = &mut buf;
    let mut header = CallHeader::default();

    loop {
        let wire_type = read_u8(buf)?;
        if wire_type == wire::STOP {
            break;
        }
        let field_id = read_i16(buf)?;

        match (field_id, wire_type) {
            (1, wire::STRING) => header.service_name = Some(read_string(buf, field_id)?),
            (2, wire::STRING) => header.method_name = Some(read_string(buf, field_id)?),
            (3, wire::STRING) => header.version_name = Some(read_string(buf, field_id)?),
            (4, wire::STRING) => header.caller_mid = Some(read_string(buf, field_id)?),
            (5, wire::STRING) => header.caller_ip = Some(read_string(buf, field_id)?),
            (5, wire::I32) => header.caller_ip = Some(ipv4_from_wire(read_i32(buf)?)),
            (6, wire::I32) => header.caller_port = Some(read_i32(buf)?),
            (7, wire::STRING) => header.session_tid = Some(read_string(buf, field_id)?),
            (7, wire::I64) => header.session_tid = Some(hex_from_wire(read_i64(buf)?)),
            (8, wire::STRING) => header.user_ip = Some(read_string(buf, field_id)?),
            (8, wire::I32) => header.user_ip = Some(ipv4_from_wire(read_i32(buf)?)),
            (9, wire::STRING) => header.caller_tid = Some(read_string(buf, field_id)?),
            (9, wire::I64) => header.caller_tid = Some(hex_from_wire(read_i64(buf)?)),
            (10, wire::I32) => header.timeout = Some(read_i32(buf)?),
            (11, wire::STRING) => header.resp_code = Some(read_string(buf, field_id)?),
            (12, wire::STRING) => header.resp_message = Some(read_string(buf, field_id)?),
            (13, wire::STRING) => header.callee_tid = Some(read_string(buf, field_id)?),
            (13, wire::I64) => header.callee_tid = Some(hex_from_wire(read_i64(buf)?)),
            (14, wire::STRING) => header.callee_ip = Some(read_string(buf, field_id)?),
            (14, wire::I32) => header.callee_ip = Some(ipv4_from_wire(read_i32(buf)?)),
            (15, wire::I32) => header.operator_id = Some(read_i32(buf)?),
            (16, wire::I32) => header.callee_port = Some(read_i32(buf)?),
            (17, wire::I64) => header.user_id = Some(read_i64(buf)?),
            (18, wire::STRING) => header.callee_mid = Some(read_string(buf, field_id)?),
            (19, wire::I32) => header.transaction_id = Some(read_i32(buf)?),
            (20, wire::I32) => header.transaction_sequence = Some(read_i32(buf)?),
            (21, wire::I32) => header.callee_time1 = Some(read_i32(buf)?),
            (22, wire::I32) => header.callee_time2 = Some(read_i32(buf)?),
            (23, wire::STRING) => header.operator_name = Some(read_string(buf, field_id)?),
            (24, wire::I32) => header.customer_id = Some(read_i32(buf)?),
            (25, wire::STRING) => header.customer_name = Some(read_string(buf, field_id)?),
            (26, wire::STRING) => header.session_id = Some(read_string(buf, field_id)?),
            (27, wire::STRING) => header.caller_from = Some(read_string(buf, field_id)?),
            (28, wire::MAP) => header.cookies = read_string_map(buf, field_id)?,
            (_, unexpected) => skip(buf, unexpected)?,
        }
    }

    Ok(header)
}

fn write_field_header(buf: &mut BytesMut, wire_type: u8, field_id: i16) {
    buf.put_u8(wire_type);
    buf.put_i16(field_id);
}

fn write_string(buf: &mut BytesMut, value: &str) {
    buf.put_i32(value.len() as i32);
    buf.put_slice(value.as_bytes());
}

fn write_opt_string(buf: &mut BytesMut, field_id: i16, value: &Option<String>) {
    if let Some(value) = value {
        write_field_header(buf, wire::STRING, field_id);
        write_string(buf, value);
    }
}

fn write_opt_i32(buf: &mut BytesMut, field_id: i16, value: Option<i32>) {
    if let Some(value) = value {
        write_field_header(buf, wire::I32, field_id);
        buf.put_i32(value);
    }
}

/// Render an integer-encoded IPv4 address (network byte order) as the
/// canonical dotted-quad string.
fn ipv4_from_wire(raw: i32) -> String {
    Ipv4Addr::from(raw as u32).to_string()
}

/// Render an integer-encoded transaction id as the canonical lowercase
/// hex string, no padding.
fn hex_from_wire(raw: i64) -> String {
    format!("{:x}", raw as u64)
}

fn ensure(buf: &&[u8], needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        Err(CodecError::Truncated {
            needed: needed - buf.remaining(),
        })
    } else {
        Ok(())
    }
}

fn read_u8(buf: &mut &[u8]) -> Result<u8, CodecError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_i16(buf: &mut &[u8]) -> Result<i16, CodecError> {
    ensure(buf, 2)?;
    Ok(buf.get_i16())
}

fn read_i32(buf: &mut &[u8]) -> Result<i32, CodecError> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

fn read_i64(buf: &mut &[u8]) -> Result<i64, CodecError> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

fn read_string(buf: &mut &[u8], field_id: i16) -> Result<String, CodecError> {
    let len = read_i32(buf)?;
    if len < 0 {
        return Err(CodecError::InvalidLength {
            wire_type: wire::STRING,
            len,
        });
    }
    let len = len as usize;
    ensure(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidString { field_id })
}

fn read_string_map(
    buf: &mut &[u8],
    field_id: i16,
) -> Result<HashMap<String, String>, CodecError> {
    let key_type = read_u8(buf)?;
    let value_type = read_u8(buf)?;
    let count = read_i32(buf)?;
    if count < 0 {
        return Err(CodecError::InvalidLength {
            wire_type: wire::MAP,
            len: count,
        });
    }

    // A map whose entries are not string/string is schema drift from a
    // newer writer; treat it like an unknown field.
    if key_type != wire::STRING || value_type != wire::STRING {
        for _ in 0..count {
            skip(buf, key_type)?;
            skip(buf, value_type)?;
        }
        return Ok(HashMap::new());
    }

    let mut map = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let key = read_string(buf, field_id)?;
        let value = read_string(buf, field_id)?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Skip one value of the given wire type, recursing into containers.
fn skip(buf: &mut &[u8], wire_type: u8) -> Result<(), CodecError> {
    match wire_type {
        wire::BOOL | wire::BYTE => {
            ensure(buf, 1)?;
            buf.advance(1);
        }
        wire::I16 => {
            ensure(buf, 2)?;
            buf.advance(2);
        }
        wire::I32 => {
            ensure(buf, 4)?;
            buf.advance(4);
        }
        wire::DOUBLE | wire::I64 => {
            ensure(buf, 8)?;
            buf.advance(8);
        }
        wire::STRING => {
            let len = read_i32(buf)?;
            if len < 0 {
                return Err(CodecError::InvalidLength {
                    wire_type: wire::STRING,
                    len,
                });
            }
            ensure(buf, len as usize)?;
            buf.advance(len as usize);
        }
        wire::STRUCT => loop {
            let field_type = read_u8(buf)?;
            if field_type == wire::STOP {
                break;
            }
            read_i16(buf)?;
            skip(buf, field_type)?;
        },
        wire::MAP => {
            let key_type = read_u8(buf)?;
            let value_type = read_u8(buf)?;
            let count = read_i32(buf)?;
            for _ in 0..count.max(0) {
                skip(buf, key_type)?;
                skip(buf, value_type)?;
            }
        }
        wire::SET | wire::LIST => {
            let element_type = read_u8(buf)?;
            let count = read_i32(buf)?;
            for _ in 0..count.max(0) {
                skip(buf, element_type)?;
            }
        }
        other => return Err(CodecError::UnsupportedWireType(other)),
    }
    Ok(())
}
