//! Schema-driven field reader registry.
//!
//! Each dump column is described by a [`FieldReader`]: its wire width
//! class for binary framing, an order key that fixes processing order
//! independently of column order, an ASCII parser, a binary parser,
//! and an injector that moves the parsed value into the packet under
//! assembly. Readers are looked up by name (with aliases) when a
//! `!data` directive declares the active field list.

mod anno;
mod net;
pub(crate) mod parse;
mod payload;
mod transport;

use crate::packet::ScratchPacket;

/// Wire width class for binary records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    /// No bytes on the wire.
    B0,
    B1,
    B2,
    B4,
    /// Four bytes kept in network order (addresses).
    B4Net,
    /// Six bytes (link-level addresses).
    B6Ptr,
    B8,
    B16,
    /// Variable width; the reader's `extent` callback sizes it.
    Special,
}

impl WireKind {
    /// Fixed byte width, or `None` for `Special`.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            WireKind::B0 => Some(0),
            WireKind::B1 => Some(1),
            WireKind::B2 => Some(2),
            WireKind::B4 | WireKind::B4Net => Some(4),
            WireKind::B6Ptr => Some(6),
            WireKind::B8 => Some(8),
            WireKind::B16 => Some(16),
            WireKind::Special => None,
        }
    }
}

/// Order keys grouping fields by what they must precede.
///
/// Timestamps and annotations land first; the IP protocol byte and
/// header geometry precede everything that needs a transport offset;
/// ICMP codes follow ICMP types; payload runs last so length-dependent
/// fields see the final header layout.
pub mod order {
    pub const ANNO: u16 = 100;
    pub const NET_PROTO: u16 = 200;
    pub const NET_HL: u16 = 201;
    pub const NET_OPT: u16 = 202;
    pub const NET: u16 = 210;
    pub const TRANSPORT: u16 = 300;
    pub const ICMP_CODE: u16 = 301;
    pub const TCP_OPT: u16 = 305;
    pub const TCP_OFF: u16 = 310;
    pub const PAYLOAD_LEN: u16 = 400;
    pub const PAYLOAD: u16 = 410;
    pub const NONE: u16 = u16::MAX;
}

/// Parses one ASCII token into the scratch slots. True on success.
pub type AsciiParser = fn(&mut ScratchPacket, &[u8]) -> bool;
/// Parses one binary field slice into the scratch slots.
pub type BinaryParser = fn(&mut ScratchPacket, &[u8]) -> bool;
/// Moves the parsed scratch values into the packet.
pub type Injector = fn(&mut ScratchPacket);
/// Bytes a `Special` field occupies at the front of `data`.
pub type ExtentFn = fn(data: &[u8]) -> usize;

/// One entry in the field registry.
pub struct FieldReader {
    pub name: &'static str,
    pub wire: WireKind,
    pub order: u16,
    pub parse_ascii: AsciiParser,
    pub parse_binary: BinaryParser,
    /// `None` marks an output-only field, ignored on input.
    pub inject: Option<Injector>,
    pub extent: Option<ExtentFn>,
}

impl FieldReader {
    pub fn can_inject(&self) -> bool {
        self.inject.is_some()
    }

    /// Bytes this field occupies at the front of `data` in a binary
    /// record.
    pub fn binary_extent(&self, data: &[u8]) -> usize {
        match self.wire.fixed_width() {
            Some(w) => w,
            None => (self.extent.expect("special wire without extent"))(data),
        }
    }
}

impl std::fmt::Debug for FieldReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldReader")
            .field("name", &self.name)
            .field("wire", &self.wire)
            .field("order", &self.order)
            .finish()
    }
}

fn parse_never(_d: &mut ScratchPacket, _data: &[u8]) -> bool {
    false
}

/// Placeholder for unknown or non-injectable columns: consumes no
/// binary bytes, never parses, never injects.
pub static NULL_READER: FieldReader = FieldReader {
    name: "none",
    wire: WireKind::B0,
    order: order::NONE,
    parse_ascii: parse_never,
    parse_binary: parse_never,
    inject: None,
    extent: None,
};

static READERS: &[&FieldReader] = &[
    &anno::TIMESTAMP,
    &anno::NTIMESTAMP,
    &anno::TS_SEC,
    &anno::TS_USEC,
    &anno::TS_USEC1,
    &anno::FIRST_TIMESTAMP,
    &anno::FIRST_NTIMESTAMP,
    &anno::COUNT,
    &anno::LINK,
    &anno::AGGREGATE,
    &net::IP_SRC,
    &net::IP_DST,
    &net::IP_PROTO,
    &net::IP_TOS,
    &net::IP_TTL,
    &net::IP_ID,
    &net::IP_HL,
    &net::IP_OPT,
    &net::IP_FRAG,
    &net::IP_FRAGOFF,
    &net::IP_LEN,
    &net::IP_CAPTURE_LEN,
    &transport::SPORT,
    &transport::DPORT,
    &transport::TCP_SEQ,
    &transport::TCP_ACK,
    &transport::TCP_FLAGS,
    &transport::TCP_OFF,
    &transport::TCP_WINDOW,
    &transport::TCP_URP,
    &transport::TCP_OPT,
    &transport::TCP_NTOPT,
    &transport::TCP_SACK,
    &transport::ICMP_TYPE,
    &transport::ICMP_CODE,
    &payload::PAYLOAD,
    &payload::PAYLOAD_LEN,
    &NULL_READER,
];

static ALIASES: &[(&str, &str)] = &[
    ("ts", "timestamp"),
    ("sec", "ts_sec"),
    ("usec", "ts_usec"),
    ("usec1", "ts_usec1"),
    ("first_ts", "first_timestamp"),
    ("src", "ip_src"),
    ("dst", "ip_dst"),
    ("len", "ip_len"),
    ("length", "ip_len"),
    ("proto", "ip_proto"),
    ("id", "ip_id"),
    ("frag", "ip_frag"),
    ("fragoff", "ip_fragoff"),
    ("caplen", "ip_capture_len"),
    ("seq", "tcp_seq"),
    ("ack", "tcp_ack"),
    ("flags", "tcp_flags"),
    ("win", "tcp_window"),
    ("window", "tcp_window"),
    ("direction", "link"),
];

/// Look up a field reader by name or alias.
pub fn find(name: &str) -> Option<&'static FieldReader> {
    let name = ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canon)| *canon)
        .unwrap_or(name);
    READERS.iter().copied().find(|r| r.name == name)
}
