//! Payload field readers.

use super::parse::{get_u32, parse_quoted, parse_uint};
use super::{order, FieldReader, WireKind};
use crate::packet::ScratchPacket;

fn ascii_payload(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match parse_quoted(token) {
        Some(bytes) => {
            d.vals.blob = bytes;
            true
        }
        // a payload that does not parse is abandoned entirely
        None => false,
    }
}

fn binary_payload(d: &mut ScratchPacket, data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    let len = get_u32(data) as usize;
    if data.len() < 4 + len {
        return false;
    }
    d.vals.blob = data[4..4 + len].to_vec();
    true
}

fn payload_extent(data: &[u8]) -> usize {
    if data.len() < 4 {
        data.len()
    } else {
        (4 + get_u32(data) as usize).min(data.len())
    }
}

/// Payload runs last in order-key order, so it lands after all header
/// geometry is settled.
fn inject_payload(d: &mut ScratchPacket) {
    let blob = std::mem::take(&mut d.vals.blob);
    let p = d.p.as_mut().unwrap();
    p.data_mut().extend_from_slice(&blob);
}

pub static PAYLOAD: FieldReader = FieldReader {
    name: "payload",
    wire: WireKind::Special,
    order: order::PAYLOAD,
    parse_ascii: ascii_payload,
    parse_binary: binary_payload,
    inject: Some(inject_payload),
    extent: Some(payload_extent),
};

fn ascii_u32(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match parse_uint(token) {
        Some(v) if v <= u32::MAX as u64 => {
            d.vals.u0 = v as u32;
            true
        }
        _ => false,
    }
}

fn binary_u32(d: &mut ScratchPacket, data: &[u8]) -> bool {
    d.vals.u0 = get_u32(data);
    true
}

/// The payload is not present in the dump, only its length; record it
/// as extra length so the fix-up pass can size `ip_len`.
fn inject_payload_len(d: &mut ScratchPacket) {
    d.p.as_mut().unwrap().anno.extra_length = d.vals.u0;
}

pub static PAYLOAD_LEN: FieldReader = FieldReader {
    name: "payload_len",
    wire: WireKind::B4,
    order: order::PAYLOAD_LEN,
    parse_ascii: ascii_u32,
    parse_binary: binary_u32,
    inject: Some(inject_payload_len),
    extent: None,
};
