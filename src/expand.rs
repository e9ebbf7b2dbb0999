//! Multi-packet expansion.
//!
//! A record whose `count` annotation says it stands for N packets is
//! expanded into N clones: each carries a proportional share of the
//! total length, and timestamps interpolate linearly from the record's
//! first-timestamp annotation to its timestamp. The decrementing
//! source packet is re-parked in the engine's single work slot after
//! each clone.

use crate::packet::{SumPacket, IP_PROTO_UDP, UDP_HEADER_LEN};
use crate::time::Timestamp;

/// Interpolation state for the record currently being expanded.
#[derive(Debug, Default)]
pub struct MultipacketState {
    /// An expansion is in progress; the work slot holds its source.
    active: bool,
    /// Per-clone length (buffer plus extra).
    length: u32,
    end_timestamp: Timestamp,
    timestamp_delta: Timestamp,
}

impl MultipacketState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next clone of `p` (taken from the work slot or
    /// freshly read), re-parking the decremented source in `work`. A
    /// packet without extra-packets passes through and ends the
    /// expansion.
    pub fn expand(&mut self, mut p: SumPacket, work: &mut Option<SumPacket>) -> SumPacket {
        if p.anno.extra_packets == 0 {
            self.active = false;
            *work = None;
            return p;
        }
        let count = 1 + p.anno.extra_packets;

        if !self.active {
            // fresh source record: fix the per-clone share
            self.length = (p.len() as u32 + p.anno.extra_length) / count;
            if (self.length as usize) < p.len() {
                // not enough extra length to cover every clone
                self.length = p.len() as u32;
                p.anno.extra_length = self.length * (count - 1);
            }
            self.end_timestamp = p.anno.timestamp;
            match p.anno.first_timestamp {
                Some(first) if !first.is_zero() => {
                    self.timestamp_delta = (p.anno.timestamp - first).div(count - 1);
                    p.anno.timestamp = first;
                }
                _ => self.timestamp_delta = Timestamp::ZERO,
            }
            let adjust = self.length - p.len() as u32;
            set_packet_lengths(&mut p, adjust);
            self.active = true;
        }

        let mut clone = p.clone();
        clone.anno.extra_packets = 0;
        clone.anno.extra_length = self.length - clone.len() as u32;

        p.anno.extra_packets = count - 2;
        p.anno.extra_length -= self.length;
        if count == 2 {
            p.anno.timestamp = self.end_timestamp;
            let residual = p.anno.extra_length;
            set_packet_lengths(&mut p, residual);
        } else {
            p.anno.timestamp += self.timestamp_delta;
        }
        *work = Some(p);

        clone
    }
}

/// Retarget a packet to `len + extra` bytes: when that differs from the
/// current `ip_len`, rewrite `ip_len` and keep `uh_ulen` coherent.
pub fn set_packet_lengths(p: &mut SumPacket, extra: u32) {
    if !p.has_net_header() {
        return;
    }
    let target = p.len() as u32 + extra;
    if target != p.ip_len() as u32 {
        p.set_ip_len(target.min(0xFFFF) as u16);
        if p.ip_proto() == IP_PROTO_UDP && p.transport_len() >= UDP_HEADER_LEN {
            let ulen = target.min(0xFFFF) as u16 - p.ip_header_len() as u16;
            p.set_udp_ulen(ulen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::ScratchPacket;

    /// IP packet with the given ip_len, count, and timestamps.
    fn source(ip_len: u16, count: u32, first: Option<Timestamp>, ts: Timestamp) -> SumPacket {
        let mut d = ScratchPacket::new(6, None, 3);
        d.make_ip(0);
        let mut p = d.p.take().unwrap();
        p.set_ip_len(ip_len);
        p.anno.extra_length = (ip_len as u32).saturating_sub(p.len() as u32);
        p.anno.extra_packets = count - 1;
        p.anno.first_timestamp = first;
        p.anno.timestamp = ts;
        p
    }

    /// Drive the expander the way the emission loop does: take the
    /// work slot first, read fresh otherwise.
    fn drain(state: &mut MultipacketState, initial: SumPacket) -> Vec<SumPacket> {
        let mut work = None;
        let mut clones = Vec::new();
        let mut p = initial;
        loop {
            clones.push(state.expand(p, &mut work));
            match work.take() {
                Some(next) => p = next,
                None => return clones,
            }
        }
    }

    #[test]
    fn test_three_way_expansion_conserves_length_and_time() {
        let mut state = MultipacketState::new();
        let p = source(300, 3, Some(Timestamp::new(1, 0)), Timestamp::new(3, 0));
        let clones = drain(&mut state, p);

        assert_eq!(clones.len(), 3);
        let lengths: Vec<u32> = clones
            .iter()
            .map(|c| c.len() as u32 + c.anno.extra_length)
            .collect();
        assert_eq!(lengths, vec![100, 100, 100]);

        let times: Vec<Timestamp> = clones.iter().map(|c| c.anno.timestamp).collect();
        assert_eq!(
            times,
            vec![
                Timestamp::new(1, 0),
                Timestamp::new(2, 0),
                Timestamp::new(3, 0)
            ]
        );
        // every clone stands for exactly one packet now
        assert!(clones.iter().all(|c| c.anno.extra_packets == 0));
    }

    #[test]
    fn test_single_packet_passes_through() {
        let mut state = MultipacketState::new();
        let p = source(40, 1, None, Timestamp::new(5, 0));
        let clones = drain(&mut state, p);
        assert_eq!(clones.len(), 1);
        assert_eq!(clones[0].ip_len(), 40);
    }

    #[test]
    fn test_no_first_timestamp_repeats_timestamp() {
        let mut state = MultipacketState::new();
        let p = source(200, 2, None, Timestamp::new(7, 0));
        let clones = drain(&mut state, p);
        assert_eq!(clones.len(), 2);
        assert!(clones
            .iter()
            .all(|c| c.anno.timestamp == Timestamp::new(7, 0)));
    }

    #[test]
    fn test_short_extra_length_clamps_to_buffer() {
        // 20-byte buffer, ip_len 30, count 4: shares would be 7 bytes,
        // smaller than the physical buffer
        let mut state = MultipacketState::new();
        let p = source(30, 4, None, Timestamp::new(1, 0));
        let clones = drain(&mut state, p);

        assert_eq!(clones.len(), 4);
        assert!(clones.iter().all(|c| c.len() == 20));
        assert!(clones.iter().all(|c| c.anno.extra_length == 0));
    }

    #[test]
    fn test_set_packet_lengths_updates_udp() {
        let mut d = ScratchPacket::new(IP_PROTO_UDP, None, 3);
        d.make_ip(0);
        d.make_transport();
        let mut p = d.p.take().unwrap();
        p.set_ip_len(28);

        set_packet_lengths(&mut p, 72);
        assert_eq!(p.ip_len(), 100);
        assert_eq!(p.udp_ulen(), 80);

        // no-op when the target already matches
        let before = p.clone();
        set_packet_lengths(&mut p, 72);
        assert_eq!(p, before);
    }
}
