//! IP header field readers.

use super::parse::{get_u16, get_u32, parse_hex_blob, parse_ipv4, parse_uint, scan_uint};
use super::{order, FieldReader, WireKind};
use crate::packet::{
    ScratchPacket, IP_MF, IP_OFFMASK, IP_PROTO_ICMP, IP_PROTO_TCP, IP_PROTO_UDP,
};

fn ascii_addr(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match parse_ipv4(token) {
        Some(addr) => {
            d.vals.u0 = addr;
            true
        }
        None => false,
    }
}

fn binary_addr(d: &mut ScratchPacket, data: &[u8]) -> bool {
    // stored in network order; big-endian read gives the host value
    d.vals.u0 = get_u32(data);
    true
}

fn inject_ip_src(d: &mut ScratchPacket) {
    if d.make_ip(0) {
        let addr = d.vals.u0;
        d.p.as_mut().unwrap().set_ip_src(addr.into());
    }
}

fn inject_ip_dst(d: &mut ScratchPacket) {
    if d.make_ip(0) {
        let addr = d.vals.u0;
        d.p.as_mut().unwrap().set_ip_dst(addr.into());
    }
}

pub static IP_SRC: FieldReader = FieldReader {
    name: "ip_src",
    wire: WireKind::B4Net,
    order: order::NET,
    parse_ascii: ascii_addr,
    parse_binary: binary_addr,
    inject: Some(inject_ip_src),
    extent: None,
};

pub static IP_DST: FieldReader = FieldReader {
    name: "ip_dst",
    wire: WireKind::B4Net,
    order: order::NET,
    parse_ascii: ascii_addr,
    parse_binary: binary_addr,
    inject: Some(inject_ip_dst),
    extent: None,
};

fn ascii_proto(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match token {
        b"T" => {
            d.vals.u0 = IP_PROTO_TCP as u32;
            true
        }
        b"U" => {
            d.vals.u0 = IP_PROTO_UDP as u32;
            true
        }
        b"I" => {
            d.vals.u0 = IP_PROTO_ICMP as u32;
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

fn binary_u16(d: &mut ScratchPacket, data: &[u8]) -> bool {
    d.vals.u0 = get_u16(data) as u32;
    true
}

fn binary_u32(d: &mut ScratchPacket, data: &[u8]) -> bool {
    d.vals.u0 = get_u32(data);
    true
}

fn ascii_u8(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match parse_uint(token) {
        Some(v) if v <= 255 => {
            d.vals.u0 = v as u32;
            true
        }
        _ => false,
    }
}

fn ascii_u16(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match parse_uint(token) {
        Some(v) if v <= 0xFFFF => {
            d.vals.u0 = v as u32;
            true
        }
        _ => false,
    }
}

fn ascii_u32(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match parse_uint(token) {
        Some(v) if v <= u32::MAX as u64 => {
            d.vals.u0 = v as u32;
            true
        }
        _ => false,
    }
}

fn inject_proto(d: &mut ScratchPacket) {
    if d.make_ip(0) {
        let proto = d.vals.u0 as u8;
        d.p.as_mut().unwrap().data_mut()[9] = proto;
    }
}

pub static IP_PROTO: FieldReader = FieldReader {
    name: "ip_proto",
    wire: WireKind::B1,
    order: order::NET_PROTO,
    parse_ascii: ascii_proto,
    parse_binary: binary_u8,
    inject: Some(inject_proto),
    extent: None,
};

fn inject_tos(d: &mut ScratchPacket) {
    if d.make_ip(0) {
        let tos = d.vals.u0 as u8;
        d.p.as_mut().unwrap().data_mut()[1] = tos;
    }
}

pub static IP_TOS: FieldReader = FieldReader {
    name: "ip_tos",
    wire: WireKind::B1,
    order: order::NET,
    parse_ascii: ascii_u8,
    parse_binary: binary_u8,
    inject: Some(inject_tos),
    extent: None,
};

fn inject_ttl(d: &mut ScratchPacket) {
    if d.make_ip(0) {
        let ttl = d.vals.u0 as u8;
        d.p.as_mut().unwrap().data_mut()[8] = ttl;
    }
}

pub static IP_TTL: FieldReader = FieldReader {
    name: "ip_ttl",
    wire: WireKind::B1,
    order: order::NET,
    parse_ascii: ascii_u8,
    parse_binary: binary_u8,
    inject: Some(inject_ttl),
    extent: None,
};

fn inject_id(d: &mut ScratchPacket) {
    if d.make_ip(0) {
        let id = d.vals.u0 as u16;
        d.p.as_mut().unwrap().put_u16_at(4, id);
    }
}

pub static IP_ID: FieldReader = FieldReader {
    name: "ip_id",
    wire: WireKind::B2,
    order: order::NET,
    parse_ascii: ascii_u16,
    parse_binary: binary_u16,
    inject: Some(inject_id),
    extent: None,
};

fn ascii_hl(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match parse_uint(token) {
        Some(v) if (20..=60).contains(&v) && v % 4 == 0 => {
            d.vals.u0 = v as u32;
            true
        }
        _ => false,
    }
}

fn binary_hl(d: &mut ScratchPacket, data: &[u8]) -> bool {
    let v = data[0] as u32;
    if (20..=60).contains(&v) && v % 4 == 0 {
        d.vals.u0 = v;
        true
    } else {
        false
    }
}

fn inject_hl(d: &mut ScratchPacket) {
    if d.make_ip(0) {
        d.set_ip_header_len(d.vals.u0 as usize);
    }
}

pub static IP_HL: FieldReader = FieldReader {
    name: "ip_hl",
    wire: WireKind::B1,
    order: order::NET_HL,
    parse_ascii: ascii_hl,
    parse_binary: binary_hl,
    inject: Some(inject_hl),
    extent: None,
};

/// ASCII option blobs are hex strings; `.` means present-but-empty.
fn ascii_opt_blob(d: &mut ScratchPacket, token: &[u8]) -> bool {
    if token == b"." {
        return true; // no options
    }
    match parse_hex_blob(token) {
        Some(blob) => {
            d.vals.blob = blob;
            true
        }
        None => false,
    }
}

fn binary_opt_blob(d: &mut ScratchPacket, data: &[u8]) -> bool {
    let len = data[0] as usize;
    if data.len() < 1 + len {
        return false;
    }
    d.vals.blob = data[1..1 + len].to_vec();
    true
}

fn opt_blob_extent(data: &[u8]) -> usize {
    if data.is_empty() {
        0
    } else {
        (1 + data[0] as usize).min(data.len())
    }
}

fn inject_ip_opt(d: &mut ScratchPacket) {
    if !d.vals.blob.is_empty() && d.make_ip(0) {
        let blob = std::mem::take(&mut d.vals.blob);
        d.append_ip_options(&blob);
    }
}

pub static IP_OPT: FieldReader = FieldReader {
    name: "ip_opt",
    wire: WireKind::Special,
    order: order::NET_OPT,
    parse_ascii: ascii_opt_blob,
    parse_binary: binary_opt_blob,
    inject: Some(inject_ip_opt),
    extent: Some(opt_blob_extent),
};

/// One-letter fragment codes: `F` first fragment (MF set), `f` later
/// fragment, `.` not fragmented.
fn ascii_frag(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match token {
        b"F" => {
            d.vals.u0 = IP_MF as u32;
            true
        }
        b"f" => {
            d.vals.u0 = 100; // some non-first fragment offset
            true
        }
        b"." => {
            d.vals.u0 = 0;
            true
        }
        _ => false,
    }
}

fn binary_frag(d: &mut ScratchPacket, data: &[u8]) -> bool {
    d.vals.u0 = match data[0] {
        b'F' => IP_MF as u32,
        b'f' => 100,
        _ => 0,
    };
    true
}

fn inject_ip_off(d: &mut ScratchPacket) {
    if d.make_ip(0) {
        let off = d.vals.u0 as u16;
        d.p.as_mut().unwrap().put_u16_at(6, off);
    }
}

pub static IP_FRAG: FieldReader = FieldReader {
    name: "ip_frag",
    wire: WireKind::B1,
    order: order::NET,
    parse_ascii: ascii_frag,
    parse_binary: binary_frag,
    inject: Some(inject_ip_off),
    extent: None,
};

/// Fragment offset with optional `+` suffix (more fragments follow).
/// Minor-version-0 dumps stored the raw byte offset, divided by 8 on
/// read; current dumps store the 8-byte-unit value directly.
fn ascii_fragoff(d: &mut ScratchPacket, token: &[u8]) -> bool {
    let (value, n) = scan_uint(token);
    if n == 0 {
        return false;
    }
    let mut off = if d.minor_version == 0 {
        if value & 7 != 0 || value >= 65536 {
            return false;
        }
        (value >> 3) as u32
    } else {
        if value > u32::MAX as u64 {
            return false;
        }
        value as u32
    };
    if off > IP_OFFMASK as u32 {
        return false;
    }
    match &token[n..] {
        b"" => {}
        b"+" => off |= IP_MF as u32,
        _ => return false,
    }
    d.vals.u0 = off;
    true
}

fn binary_fragoff(d: &mut ScratchPacket, data: &[u8]) -> bool {
    let off = get_u16(data);
    if off & !IP_MF <= IP_OFFMASK {
        d.vals.u0 = off as u32;
        true
    } else {
        false
    }
}

pub static IP_FRAGOFF: FieldReader = FieldReader {
    name: "ip_fragoff",
    wire: WireKind::B2,
    order: order::NET,
    parse_ascii: ascii_fragoff,
    parse_binary: binary_fragoff,
    inject: Some(inject_ip_off),
    extent: None,
};

fn inject_ip_len(d: &mut ScratchPacket) {
    if d.make_ip(0) {
        let len = d.vals.u0.min(0xFFFF) as u16;
        d.p.as_mut().unwrap().set_ip_len(len);
    }
}

pub static IP_LEN: FieldReader = FieldReader {
    name: "ip_len",
    wire: WireKind::B4,
    order: order::NET,
    parse_ascii: ascii_u32,
    parse_binary: binary_u32,
    inject: Some(inject_ip_len),
    extent: None,
};

fn inject_nothing(_d: &mut ScratchPacket) {
    // capture length carries no reconstruction information
}

pub static IP_CAPTURE_LEN: FieldReader = FieldReader {
    name: "ip_capture_len",
    wire: WireKind::B4,
    order: order::NET,
    parse_ascii: ascii_u32,
    parse_binary: binary_u32,
    inject: Some(inject_nothing),
    extent: None,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn scratch() -> ScratchPacket {
        ScratchPacket::new(IP_PROTO_TCP, None, 3)
    }

    #[test]
    fn test_addr_inject() {
        let mut d = scratch();
        assert!(ascii_addr(&mut d, b"10.0.0.1"));
        inject_ip_src(&mut d);
        assert_eq!(d.p.as_ref().unwrap().ip_src(), Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn test_proto_letters() {
        let mut d = scratch();
        assert!(ascii_proto(&mut d, b"U"));
        inject_proto(&mut d);
        assert_eq!(d.p.as_ref().unwrap().ip_proto(), IP_PROTO_UDP);

        assert!(ascii_proto(&mut d, b"47"));
        assert_eq!(d.vals.u0, 47);
        assert!(!ascii_proto(&mut d, b"300"));
    }

    #[test]
    fn test_fragoff_current_semantics() {
        let mut d = scratch();
        assert!(ascii_fragoff(&mut d, b"8"));
        assert_eq!(d.vals.u0, 8); // already in 8-byte units

        assert!(ascii_fragoff(&mut d, b"8+"));
        assert_eq!(d.vals.u0, 8 | IP_MF as u32);

        // beyond the 13-bit offset field
        assert!(!ascii_fragoff(&mut d, b"8192"));
    }

    #[test]
    fn test_fragoff_legacy_preshift() {
        let mut d = ScratchPacket::new(IP_PROTO_TCP, None, 0);
        // legacy dumps store the byte offset, divided by 8 on read
        assert!(ascii_fragoff(&mut d, b"8"));
        assert_eq!(d.vals.u0, 1);
        // a legacy byte offset must be a fragment boundary
        assert!(!ascii_fragoff(&mut d, b"12"));
    }

    #[test]
    fn test_frag_codes() {
        let mut d = scratch();
        assert!(ascii_frag(&mut d, b"F"));
        assert_eq!(d.vals.u0, IP_MF as u32);
        assert!(ascii_frag(&mut d, b"f"));
        assert_eq!(d.vals.u0, 100);
        assert!(ascii_frag(&mut d, b"."));
        assert_eq!(d.vals.u0, 0);
        assert!(!ascii_frag(&mut d, b"x"));
    }

    #[test]
    fn test_ip_len_clamps() {
        let mut d = scratch();
        assert!(ascii_u32(&mut d, b"100000"));
        inject_ip_len(&mut d);
        assert_eq!(d.p.as_ref().unwrap().ip_len(), 0xFFFF);
    }

    #[test]
    fn test_hl_validation() {
        let mut d = scratch();
        assert!(ascii_hl(&mut d, b"24"));
        assert!(!ascii_hl(&mut d, b"19"));
        assert!(!ascii_hl(&mut d, b"22"));
        assert!(!ascii_hl(&mut d, b"64"));
    }
}
