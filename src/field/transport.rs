//! Transport header field readers: ports, TCP, ICMP.

use super::parse::{get_u16, get_u32, parse_hex_blob, parse_uint};
use super::{order, FieldReader, WireKind};
use crate::packet::{ScratchPacket, IP_PROTO_ICMP, IP_PROTO_TCP};

/// TCP flag letters in bit order: FIN, SYN, RST, PSH, ACK, URG, ECE,
/// CWR, NS.
const TCP_FLAG_LETTERS: &[u8] = b"FSRPAUECN";

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

/// Ports live at the same transport offsets for TCP and UDP, so the
/// port injectors accept any established protocol.
fn inject_sport(d: &mut ScratchPacket) {
    if d.make_ip(0) && d.make_transport() {
        let port = d.vals.u0 as u16;
        let p = d.p.as_mut().unwrap();
        let t = p.transport_offset();
        p.put_u16_at(t, port);
    }
}

fn inject_dport(d: &mut ScratchPacket) {
    if d.make_ip(0) && d.make_transport() {
        let port = d.vals.u0 as u16;
        let p = d.p.as_mut().unwrap();
        let t = p.transport_offset();
        p.put_u16_at(t + 2, port);
    }
}

pub static SPORT: FieldReader = FieldReader {
    name: "sport",
    wire: WireKind::B2,
    order: order::TRANSPORT,
    parse_ascii: ascii_u16,
    parse_binary: binary_u16,
    inject: Some(inject_sport),
    extent: None,
};

pub static DPORT: FieldReader = FieldReader {
    name: "dport",
    wire: WireKind::B2,
    order: order::TRANSPORT,
    parse_ascii: ascii_u16,
    parse_binary: binary_u16,
    inject: Some(inject_dport),
    extent: None,
};

fn inject_tcp_seq(d: &mut ScratchPacket) {
    if d.make_ip(IP_PROTO_TCP) && d.make_transport() {
        let seq = d.vals.u0;
        let p = d.p.as_mut().unwrap();
        let t = p.transport_offset();
        p.put_u32_at(t + 4, seq);
    }
}

fn inject_tcp_ack(d: &mut ScratchPacket) {
    if d.make_ip(IP_PROTO_TCP) && d.make_transport() {
        let ack = d.vals.u0;
        let p = d.p.as_mut().unwrap();
        let t = p.transport_offset();
        p.put_u32_at(t + 8, ack);
    }
}

pub static TCP_SEQ: FieldReader = FieldReader {
    name: "tcp_seq",
    wire: WireKind::B4,
    order: order::TRANSPORT,
    parse_ascii: ascii_u32,
    parse_binary: binary_u32,
    inject: Some(inject_tcp_seq),
    extent: None,
};

pub static TCP_ACK: FieldReader = FieldReader {
    name: "tcp_ack",
    wire: WireKind::B4,
    order: order::TRANSPORT,
    parse_ascii: ascii_u32,
    parse_binary: binary_u32,
    inject: Some(inject_tcp_ack),
    extent: None,
};

/// Decimal bitmask, `.` for none, or a letter sequence (`SA`, `FPA`).
fn ascii_tcp_flags(d: &mut ScratchPacket, token: &[u8]) -> bool {
    if token == b"." {
        d.vals.u0 = 0;
        return true;
    }
    if token[0].is_ascii_digit() {
        return match parse_uint(token) {
            Some(v) if v <= 0xFFF => {
                d.vals.u0 = v as u32;
                true
            }
            _ => false,
        };
    }
    let mut flags = 0u32;
    for &letter in token {
        match TCP_FLAG_LETTERS.iter().position(|&l| l == letter) {
            Some(bit) => flags |= 1 << bit,
            None => return false,
        }
    }
    d.vals.u0 = flags;
    true
}

fn inject_tcp_flags(d: &mut ScratchPacket) {
    if d.make_ip(IP_PROTO_TCP) && d.make_transport() {
        let flags = d.vals.u0;
        let p = d.p.as_mut().unwrap();
        let t = p.transport_offset();
        if flags <= 0xFF {
            p.data_mut()[t + 13] = flags as u8;
        } else {
            // NS lives in the combined offset/flags word
            p.put_u16_at(t + 12, flags as u16);
        }
    }
}

pub static TCP_FLAGS: FieldReader = FieldReader {
    name: "tcp_flags",
    wire: WireKind::B1,
    order: order::TRANSPORT,
    parse_ascii: ascii_tcp_flags,
    parse_binary: binary_u8,
    inject: Some(inject_tcp_flags),
    extent: None,
};

fn ascii_tcp_off(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match parse_uint(token) {
        Some(v) if (20..=60).contains(&v) && v % 4 == 0 => {
            d.vals.u0 = v as u32;
            true
        }
        _ => false,
    }
}

fn binary_tcp_off(d: &mut ScratchPacket, data: &[u8]) -> bool {
    let v = data[0] as u32;
    if (20..=60).contains(&v) && v % 4 == 0 {
        d.vals.u0 = v;
        true
    } else {
        false
    }
}

fn inject_tcp_off(d: &mut ScratchPacket) {
    if d.make_ip(IP_PROTO_TCP) && d.make_transport() {
        d.set_tcp_header_len(d.vals.u0 as usize);
    }
}

pub static TCP_OFF: FieldReader = FieldReader {
    name: "tcp_off",
    wire: WireKind::B1,
    order: order::TCP_OFF,
    parse_ascii: ascii_tcp_off,
    parse_binary: binary_tcp_off,
    inject: Some(inject_tcp_off),
    extent: None,
};

fn inject_tcp_window(d: &mut ScratchPacket) {
    if d.make_ip(IP_PROTO_TCP) && d.make_transport() {
        let win = d.vals.u0 as u16;
        let p = d.p.as_mut().unwrap();
        let t = p.transport_offset();
        p.put_u16_at(t + 14, win);
    }
}

fn inject_tcp_urp(d: &mut ScratchPacket) {
    if d.make_ip(IP_PROTO_TCP) && d.make_transport() {
        let urp = d.vals.u0 as u16;
        let p = d.p.as_mut().unwrap();
        let t = p.transport_offset();
        p.put_u16_at(t + 18, urp);
    }
}

pub static TCP_WINDOW: FieldReader = FieldReader {
    name: "tcp_window",
    wire: WireKind::B2,
    order: order::TRANSPORT,
    parse_ascii: ascii_u16,
    parse_binary: binary_u16,
    inject: Some(inject_tcp_window),
    extent: None,
};

pub static TCP_URP: FieldReader = FieldReader {
    name: "tcp_urp",
    wire: WireKind::B2,
    order: order::TRANSPORT,
    parse_ascii: ascii_u16,
    parse_binary: binary_u16,
    inject: Some(inject_tcp_urp),
    extent: None,
};

fn ascii_opt_blob(d: &mut ScratchPacket, token: &[u8]) -> bool {
    if token == b"." {
        return true;
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

fn inject_tcp_opt(d: &mut ScratchPacket) {
    if !d.vals.blob.is_empty() && d.make_ip(IP_PROTO_TCP) && d.make_transport() {
        let blob = std::mem::take(&mut d.vals.blob);
        d.append_tcp_options(&blob);
    }
}

pub static TCP_OPT: FieldReader = FieldReader {
    name: "tcp_opt",
    wire: WireKind::Special,
    order: order::TCP_OPT,
    parse_ascii: ascii_opt_blob,
    parse_binary: binary_opt_blob,
    inject: Some(inject_tcp_opt),
    extent: Some(opt_blob_extent),
};

pub static TCP_NTOPT: FieldReader = FieldReader {
    name: "tcp_ntopt",
    wire: WireKind::Special,
    order: order::TCP_OPT,
    parse_ascii: ascii_opt_blob,
    parse_binary: binary_opt_blob,
    inject: Some(inject_tcp_opt),
    extent: Some(opt_blob_extent),
};

pub static TCP_SACK: FieldReader = FieldReader {
    name: "tcp_sack",
    wire: WireKind::Special,
    order: order::TCP_OPT,
    parse_ascii: ascii_opt_blob,
    parse_binary: binary_opt_blob,
    inject: Some(inject_tcp_opt),
    extent: Some(opt_blob_extent),
};

/// Symbolic ICMP type names accepted alongside numeric values.
static ICMP_TYPE_NAMES: &[(&str, u8)] = &[
    ("echo-reply", 0),
    ("unreachable", 3),
    ("sourcequench", 4),
    ("redirect", 5),
    ("echo", 8),
    ("routeradvert", 9),
    ("routersolicit", 10),
    ("timeexceeded", 11),
    ("parameterproblem", 12),
    ("timestamp", 13),
    ("timestamp-reply", 14),
];

fn ascii_icmp_type(d: &mut ScratchPacket, token: &[u8]) -> bool {
    if token[0].is_ascii_digit() {
        return match parse_uint(token) {
            Some(v) if v <= 255 => {
                d.vals.u0 = v as u32;
                true
            }
            _ => false,
        };
    }
    let name = std::str::from_utf8(token).ok();
    match name.and_then(|n| ICMP_TYPE_NAMES.iter().find(|(s, _)| *s == n)) {
        Some((_, value)) => {
            d.vals.u0 = *value as u32;
            true
        }
        None => false,
    }
}

fn inject_icmp_type(d: &mut ScratchPacket) {
    if d.make_ip(IP_PROTO_ICMP) && d.make_transport() {
        let ty = d.vals.u0 as u8;
        d.icmp_type = Some(ty);
        let p = d.p.as_mut().unwrap();
        let t = p.transport_offset();
        p.data_mut()[t] = ty;
    }
}

fn ascii_icmp_code(d: &mut ScratchPacket, token: &[u8]) -> bool {
    match parse_uint(token) {
        Some(v) if v <= 255 => {
            d.vals.u0 = v as u32;
            true
        }
        _ => false,
    }
}

fn inject_icmp_code(d: &mut ScratchPacket) {
    if d.make_ip(IP_PROTO_ICMP) && d.make_transport() {
        let code = d.vals.u0 as u8;
        let p = d.p.as_mut().unwrap();
        let t = p.transport_offset();
        p.data_mut()[t + 1] = code;
    }
}

pub static ICMP_TYPE: FieldReader = FieldReader {
    name: "icmp_type",
    wire: WireKind::B1,
    order: order::TRANSPORT,
    parse_ascii: ascii_icmp_type,
    parse_binary: binary_u8,
    inject: Some(inject_icmp_type),
    extent: None,
};

pub static ICMP_CODE: FieldReader = FieldReader {
    name: "icmp_code",
    wire: WireKind::B1,
    order: order::ICMP_CODE,
    parse_ascii: ascii_icmp_code,
    parse_binary: binary_u8,
    inject: Some(inject_icmp_code),
    extent: None,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::IP_PROTO_UDP;

    fn scratch() -> ScratchPacket {
        ScratchPacket::new(IP_PROTO_TCP, None, 3)
    }

    #[test]
    fn test_ports_inject_through_transport() {
        let mut d = scratch();
        assert!(ascii_u16(&mut d, b"1000"));
        inject_sport(&mut d);
        assert!(ascii_u16(&mut d, b"80"));
        inject_dport(&mut d);

        let p = d.p.as_ref().unwrap();
        assert_eq!(p.len(), 40);
        assert_eq!(p.sport(), 1000);
        assert_eq!(p.dport(), 80);
    }

    #[test]
    fn test_tcp_flags_letters() {
        let mut d = scratch();
        assert!(ascii_tcp_flags(&mut d, b"SA"));
        assert_eq!(d.vals.u0, 0x12);

        assert!(ascii_tcp_flags(&mut d, b"."));
        assert_eq!(d.vals.u0, 0);

        assert!(ascii_tcp_flags(&mut d, b"18"));
        assert_eq!(d.vals.u0, 18);

        assert!(!ascii_tcp_flags(&mut d, b"SAQ"));
    }

    #[test]
    fn test_tcp_flags_wide_value_sets_offset_word() {
        let mut d = scratch();
        // NS flag (bit 8) lands in the combined offset/flags word
        assert!(ascii_tcp_flags(&mut d, b"SN"));
        assert_eq!(d.vals.u0, 0x102);
        inject_tcp_flags(&mut d);

        let p = d.p.as_ref().unwrap();
        assert_eq!(p.get_u16_at(p.transport_offset() + 12), 0x102);
    }

    #[test]
    fn test_tcp_field_rejects_udp_packet() {
        let mut d = ScratchPacket::new(IP_PROTO_UDP, None, 3);
        d.make_ip(0);
        assert!(ascii_u32(&mut d, b"12345"));
        inject_tcp_seq(&mut d);
        // no TCP header materialized on a UDP packet
        assert_eq!(d.p.as_ref().unwrap().len(), 20);
    }

    #[test]
    fn test_icmp_type_then_code() {
        let mut d = ScratchPacket::new(IP_PROTO_ICMP, None, 3);
        assert!(ascii_icmp_type(&mut d, b"echo"));
        inject_icmp_type(&mut d);
        assert_eq!(d.icmp_type, Some(8));

        d.clear_values();
        assert!(ascii_icmp_code(&mut d, b"0"));
        inject_icmp_code(&mut d);

        let p = d.p.as_ref().unwrap();
        assert_eq!(p.icmp_type(), 8);
        assert_eq!(p.icmp_code(), 0);
        assert_eq!(p.len(), 28);
    }
}
