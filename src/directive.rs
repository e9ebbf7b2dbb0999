//! In-band directive handling and the dump-level state it mutates.

use std::net::Ipv4Addr;

use crate::error::ConfigError;
use crate::field::{self, parse, FieldReader, NULL_READER};
use crate::io::DumpFile;
use crate::packet::{FlowId, IP_PROTO_ICMP, IP_PROTO_TCP, IP_PROTO_UDP};

/// Dump format version this engine expects.
pub const MAJOR_VERSION: u8 = 1;
pub const MINOR_VERSION: u8 = 3;

/// State the in-band directives operate on: the active field list, its
/// processing-order permutation, and the record-level defaults.
#[derive(Debug)]
pub struct DumpState {
    /// Active field list in declared (column) order.
    pub fields: Vec<&'static FieldReader>,
    /// Permutation of field indices sorted by order key; injection
    /// walks this, not the column order.
    pub field_order: Vec<usize>,
    pub default_proto: u8,
    pub flowid: Option<FlowId>,
    pub aggregate: Option<u32>,
    /// Records are length-prefixed binary frames from here on.
    pub binary: bool,
    pub minor_version: u8,
    /// One-shot latch: at most one parse complaint per field-list
    /// epoch.
    pub format_complaint: bool,
}

impl DumpState {
    pub fn new(default_proto: u8) -> Self {
        DumpState {
            fields: Vec::new(),
            field_order: Vec::new(),
            default_proto,
            flowid: None,
            aggregate: None,
            binary: false,
            minor_version: MINOR_VERSION,
            format_complaint: false,
        }
    }

    /// Dispatch a `!` line. Returns true when the line was a directive
    /// (unknown `!` lines are consumed silently).
    pub fn apply_directive(&mut self, line: &[u8], ff: &mut DumpFile) -> bool {
        if line.first() != Some(&b'!') {
            return false;
        }
        let words = spacevec(line);
        match words.first().copied() {
            Some(b"!data") | Some(b"!contents") => self.bang_data(&words[1..], ff),
            Some(b"!flowid") => self.bang_flowid(&words[1..], ff),
            Some(b"!aggregate") => self.bang_aggregate(&words[1..], ff),
            Some(b"!binary") => self.bang_binary(&words[1..], ff),
            _ => {} // unknown directives are ignored
        }
        true
    }

    /// Replace the active field list and rebuild the order
    /// permutation. Resets the format-complaint latch: a new epoch may
    /// complain once more.
    pub fn bang_data(&mut self, words: &[&[u8]], ff: &DumpFile) {
        self.fields.clear();
        self.field_order.clear();
        self.format_complaint = false;

        for word in words {
            let word = parse::unquote(word);
            let name = String::from_utf8_lossy(word);
            let reader = match field::find(&name) {
                None => {
                    ff.warning(&format!("unknown content type '{name}'"));
                    &NULL_READER
                }
                Some(r) if !r.can_inject() => {
                    ff.warning(&format!("content type '{name}' ignored on input"));
                    &NULL_READER
                }
                Some(r) => r,
            };
            self.fields.push(reader);
            self.field_order.push(self.fields.len() - 1);
        }

        if self.fields.is_empty() {
            ff.error("no contents specified");
        }

        // stable sort: order key, ties broken by declaration index
        let fields = &self.fields;
        self.field_order.sort_by_key(|&i| fields[i].order);
    }

    /// `SRC SPORT DST DPORT [PROTO]`, `-` meaning unset. A bad
    /// specification clears the default and keeps the stream going.
    pub fn bang_flowid(&mut self, words: &[&[u8]], ff: &DumpFile) {
        let parsed = Self::parse_flowid(words);
        match parsed {
            Some((flow, proto)) => {
                if let Some(proto) = proto {
                    match proto {
                        FlowProto::Known(p) => self.default_proto = p,
                        FlowProto::Bad => ff.error("bad protocol in !flowid"),
                    }
                }
                self.flowid = Some(flow);
            }
            None => {
                ff.error("bad !flowid specification");
                self.flowid = None;
            }
        }
    }

    fn parse_flowid(words: &[&[u8]]) -> Option<(FlowId, Option<FlowProto>)> {
        if words.len() < 4 {
            return None;
        }
        let addr = |w: &[u8]| -> Option<Ipv4Addr> {
            if w == b"-" {
                Some(Ipv4Addr::UNSPECIFIED)
            } else {
                parse::parse_ipv4(w).map(Ipv4Addr::from)
            }
        };
        let port = |w: &[u8]| -> Option<u16> {
            if w == b"-" {
                Some(0)
            } else {
                match parse::parse_uint(w) {
                    Some(v) if v <= 65535 => Some(v as u16),
                    _ => None,
                }
            }
        };
        let flow = FlowId {
            src: addr(words[0])?,
            sport: port(words[1])?,
            dst: addr(words[2])?,
            dport: port(words[3])?,
        };
        let proto = words.get(4).map(|w| match *w {
            b"T" => FlowProto::Known(IP_PROTO_TCP),
            b"U" => FlowProto::Known(IP_PROTO_UDP),
            b"I" => FlowProto::Known(IP_PROTO_ICMP),
            w => match parse::parse_uint(w) {
                Some(v) if v < 256 => FlowProto::Known(v as u8),
                _ => FlowProto::Bad,
            },
        });
        Some((flow, proto))
    }

    /// Configure flow-ID defaults from a construction-time string
    /// (`SRC SPORT DST DPORT [PROTO]`). Unlike the in-band directive,
    /// a malformed specification here fails construction.
    pub fn set_default_flowid(&mut self, spec: &str) -> Result<(), ConfigError> {
        let words = spacevec(spec.as_bytes());
        match Self::parse_flowid(&words) {
            Some((flow, proto)) => {
                match proto {
                    Some(FlowProto::Known(p)) => self.default_proto = p,
                    Some(FlowProto::Bad) => {
                        return Err(ConfigError::BadFlowId {
                            reason: format!("bad protocol in '{spec}'"),
                        })
                    }
                    None => {}
                }
                self.flowid = Some(flow);
                Ok(())
            }
            None => Err(ConfigError::BadFlowId { reason: spec.into() }),
        }
    }

    pub fn bang_aggregate(&mut self, words: &[&[u8]], ff: &DumpFile) {
        match words {
            [word] => match parse::parse_uint(word) {
                Some(v) if v <= u32::MAX as u64 => self.aggregate = Some(v as u32),
                _ => {
                    ff.error("bad !aggregate specification");
                    self.aggregate = None;
                }
            },
            _ => {
                ff.error("bad !aggregate specification");
                self.aggregate = None;
            }
        }
    }

    /// Switch to binary framing; records are counted from 1. Only
    /// meaningful in text mode.
    pub fn bang_binary(&mut self, words: &[&[u8]], ff: &mut DumpFile) {
        if self.binary {
            ff.error("'!binary' directive in binary mode");
            return;
        }
        if !words.is_empty() {
            ff.error("bad !binary specification");
        }
        self.binary = true;
        ff.set_record_landmark();
        ff.set_lineno(0);
    }

    /// Examine the (peeked) first line of the dump. Consumes a version
    /// banner; otherwise warns once unless a default field list was
    /// configured.
    pub fn handle_banner(&mut self, ff: &mut DumpFile) {
        let Some(line) = ff.peek_line().map(<[u8]>::to_vec) else {
            return;
        };
        let line = line.as_slice();
        if let Some(rest) = line.strip_prefix(b"!IPSummaryDump") {
            if let Some((major, minor)) = parse_version(rest) {
                if major != MAJOR_VERSION || minor > MINOR_VERSION {
                    ff.warning(&format!(
                        "unexpected IPSummaryDump version {major}.{minor}"
                    ));
                    self.minor_version = MINOR_VERSION;
                } else {
                    self.minor_version = minor;
                }
            }
            ff.read_line(); // consume the banner
        } else if !line.starts_with(b"!creator")
            && !line.starts_with(b"!data")
            && !line.starts_with(b"!contents")
            && self.fields.is_empty()
        {
            ff.warning("missing banner line; is this an IP summary dump?");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FlowProto {
    Known(u8),
    Bad,
}

fn parse_version(rest: &[u8]) -> Option<(u8, u8)> {
    let rest = trim(rest);
    let mut parts = rest.splitn(2, |&b| b == b'.');
    let major = parse::parse_uint(parts.next()?)?;
    let minor = parse::parse_uint(parts.next()?)?;
    if major <= u8::MAX as u64 && minor <= u8::MAX as u64 {
        Some((major as u8, minor as u8))
    } else {
        None
    }
}

fn trim(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let end = data
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |e| e + 1);
    &data[start..end]
}

/// Split a line into whitespace-separated words.
pub fn spacevec(line: &[u8]) -> Vec<&[u8]> {
    let mut words = Vec::new();
    let mut rest = line;
    loop {
        let start = match rest.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(i) => i,
            None => return words,
        };
        rest = &rest[start..];
        let end = rest
            .iter()
            .position(|b| b.is_ascii_whitespace())
            .unwrap_or(rest.len());
        words.push(&rest[..end]);
        rest = &rest[end..];
    }
}
