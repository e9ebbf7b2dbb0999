//! Annotation field readers: timestamps, packet counts, link
//! direction, aggregate.

use super::parse::{get_u32, parse_timestamp, parse_uint};
use super::{order, FieldReader, WireKind};
use crate::packet::ScratchPacket;
use crate::time::{Timestamp, NSEC_PER_SEC};

fn ascii_timestamp(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match parse_timestamp(token) {
        Some((sec, nsec)) if sec <= u32::MAX as u64 => {
            d.vals.u0 = sec as u32;
            d.vals.u1 = nsec;
            true
        }
        _ => false,
    }
}

/// Binary timestamps are two 32-bit words; the second is microseconds
/// in the legacy layout, nanoseconds in the `n` variants.
fn binary_timestamp_usec(d: &mut ScratchPacket, data: &[u8]) -> bool {
    d.vals.u0 = get_u32(data);
    d.vals.u1 = get_u32(&data[4..]).wrapping_mul(1000);
    d.vals.u1 < NSEC_PER_SEC
}

fn binary_timestamp_nsec(d: &mut ScratchPacket, data: &[u8]) -> bool {
    d.vals.u0 = get_u32(data);
    d.vals.u1 = get_u32(&data[4..]);
    d.vals.u1 < NSEC_PER_SEC
}

fn inject_timestamp(d: &mut ScratchPacket) {
    let ts = Timestamp::new(d.vals.u0 as i64, d.vals.u1);
    d.p.as_mut().unwrap().anno.timestamp = ts;
}

fn inject_first_timestamp(d: &mut ScratchPacket) {
    let ts = Timestamp::new(d.vals.u0 as i64, d.vals.u1);
    d.p.as_mut().unwrap().anno.first_timestamp = Some(ts);
}

pub static TIMESTAMP: FieldReader = FieldReader {
    name: "timestamp",
    wire: WireKind::B8,
    order: order::ANNO,
    parse_ascii: ascii_timestamp,
    parse_binary: binary_timestamp_usec,
    inject: Some(inject_timestamp),
    extent: None,
};

pub static NTIMESTAMP: FieldReader = FieldReader {
    name: "ntimestamp",
    wire: WireKind::B8,
    order: order::ANNO,
    parse_ascii: ascii_timestamp,
    parse_binary: binary_timestamp_nsec,
    inject: Some(inject_timestamp),
    extent: None,
};

pub static FIRST_TIMESTAMP: FieldReader = FieldReader {
    name: "first_timestamp",
    wire: WireKind::B8,
    order: order::ANNO,
    parse_ascii: ascii_timestamp,
    parse_binary: binary_timestamp_usec,
    inject: Some(inject_first_timestamp),
    extent: None,
};

pub static FIRST_NTIMESTAMP: FieldReader = FieldReader {
    name: "first_ntimestamp",
    wire: WireKind::B8,
    order: order::ANNO,
    parse_ascii: ascii_timestamp,
    parse_binary: binary_timestamp_nsec,
    inject: Some(inject_first_timestamp),
    extent: None,
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

fn inject_ts_sec(d: &mut ScratchPacket) {
    let sec = d.vals.u0 as i64;
    d.p.as_mut().unwrap().anno.timestamp.set_sec(sec);
}

pub static TS_SEC: FieldReader = FieldReader {
    name: "ts_sec",
    wire: WireKind::B4,
    order: order::ANNO,
    parse_ascii: ascii_u32,
    parse_binary: binary_u32,
    inject: Some(inject_ts_sec),
    extent: None,
};

fn ascii_ts_usec(d: &mut ScratchPacket, token: &[u8]) -> bool {
    ascii_u32(d, token) && d.vals.u0 < 1_000_000
}

fn binary_ts_usec(d: &mut ScratchPacket, data: &[u8]) -> bool {
    d.vals.u0 = get_u32(data);
    d.vals.u0 < 1_000_000
}

fn inject_ts_usec(d: &mut ScratchPacket) {
    let nsec = d.vals.u0 * 1000;
    d.p.as_mut().unwrap().anno.timestamp.set_nsec(nsec);
}

pub static TS_USEC: FieldReader = FieldReader {
    name: "ts_usec",
    wire: WireKind::B4,
    order: order::ANNO,
    parse_ascii: ascii_ts_usec,
    parse_binary: binary_ts_usec,
    inject: Some(inject_ts_usec),
    extent: None,
};

/// Single 64-bit microsecond count since the epoch.
fn ascii_ts_usec1(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match parse_uint(token) {
        Some(v) => {
            d.vals.u0 = (v >> 32) as u32;
            d.vals.u1 = v as u32;
            true
        }
        None => false,
    }
}

fn binary_ts_usec1(d: &mut ScratchPacket, data: &[u8]) -> bool {
    d.vals.u0 = get_u32(data);
    d.vals.u1 = get_u32(&data[4..]);
    true
}

fn inject_ts_usec1(d: &mut ScratchPacket) {
    let usec = ((d.vals.u0 as u64) << 32) | d.vals.u1 as u64;
    d.p.as_mut().unwrap().anno.timestamp = Timestamp::from_total_usec(usec);
}

pub static TS_USEC1: FieldReader = FieldReader {
    name: "ts_usec1",
    wire: WireKind::B8,
    order: order::ANNO,
    parse_ascii: ascii_ts_usec1,
    parse_binary: binary_ts_usec1,
    inject: Some(inject_ts_usec1),
    extent: None,
};

fn inject_count(d: &mut ScratchPacket) {
    if d.vals.u0 != 0 {
        d.p.as_mut().unwrap().anno.extra_packets = d.vals.u0 - 1;
    }
}

pub static COUNT: FieldReader = FieldReader {
    name: "count",
    wire: WireKind::B4,
    order: order::ANNO,
    parse_ascii: ascii_u32,
    parse_binary: binary_u32,
    inject: Some(inject_count),
    extent: None,
};

fn ascii_link(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match token {
        b">" | b"L" => {
            d.vals.u0 = 0;
            true
        }
        b"<" | b"X" | b"R" => {
            d.vals.u0 = 1;
            true
        }
        _ => match parse_uint(token) {
            Some(v) if v <= 255 => {
                d.vals.u0 = v as u32;
                true
            }
            _ => false,
        },
    }
}

fn binary_u8(d: &mut ScratchPacket, data: &[u8]) -> bool {
    d.vals.u0 = data[0] as u32;
    true
}

fn inject_link(d: &mut ScratchPacket) {
    d.p.as_mut().unwrap().anno.paint = d.vals.u0 as u8;
}

pub static LINK: FieldReader = FieldReader {
    name: "link",
    wire: WireKind::B1,
    order: order::ANNO,
    parse_ascii: ascii_link,
    parse_binary: binary_u8,
    inject: Some(inject_link),
    extent: None,
};

fn inject_aggregate(d: &mut ScratchPacket) {
    d.p.as_mut().unwrap().anno.aggregate = d.vals.u0;
    d.aggregate_set = true;
}

pub static AGGREGATE: FieldReader = FieldReader {
    name: "aggregate",
    wire: WireKind::B4,
    order: order::ANNO,
    parse_ascii: ascii_u32,
    parse_binary: binary_u32,
    inject: Some(inject_aggregate),
    extent: None,
};
