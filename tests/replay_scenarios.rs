//! End-to-end replay scenarios.
//!
//! Drives the full engine over on-disk dumps and checks the emitted
//! packets, using etherparse as an independent header oracle.

use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::Arc;

use etherparse::{Ipv4HeaderSlice, TcpHeaderSlice, UdpHeaderSlice};
use tempfile::NamedTempFile;

use sumreplay::config::{EmitMode, ReplayConfig};
use sumreplay::engine::ReplayEngine;
use sumreplay::error::CountingSink;
use sumreplay::packet::{in_cksum, in_cksum_pseudo, SumPacket};
use sumreplay::runtime::ManualRuntime;
use sumreplay::time::Timestamp;

fn dump(content: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content).unwrap();
    file
}

fn replay_with(
    content: &[u8],
    tweak: impl FnOnce(&mut ReplayConfig),
) -> (Vec<SumPacket>, Arc<CountingSink>) {
    let file = dump(content);
    let sink = CountingSink::new();
    let mut config = ReplayConfig::new(file.path());
    config.mode = EmitMode::Pull;
    tweak(&mut config);
    let mut engine = ReplayEngine::with_error_sink(&config, sink.clone()).unwrap();
    engine.initialize().unwrap();

    let mut rt = ManualRuntime::new();
    let mut packets = Vec::new();
    while !engine.source_exhausted() {
        if let Some(p) = engine.pull(&mut rt) {
            packets.push(p);
        }
    }
    (packets, sink)
}

fn replay(content: &[u8]) -> (Vec<SumPacket>, Arc<CountingSink>) {
    replay_with(content, |_| {})
}

#[test]
fn scenario_minimal_tcp() {
    let (packets, sink) = replay(
        b"!IPSummaryDump 1.3\n\
          !data ip_src ip_dst sport dport proto\n\
          10.0.0.1 10.0.0.2 1000 80 T\n",
    );

    assert_eq!(packets.len(), 1);
    let p = &packets[0];
    assert!(p.has_net_header());

    let ip = Ipv4HeaderSlice::from_slice(p.data()).expect("valid IPv4 header");
    assert_eq!(ip.source_addr(), Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(ip.destination_addr(), Ipv4Addr::new(10, 0, 0, 2));
    assert_eq!(ip.protocol().0, 6);
    assert_eq!(ip.total_len(), 40);
    assert_eq!(ip.ihl(), 5);

    let tcp = TcpHeaderSlice::from_slice(&p.data()[20..]).expect("valid TCP header");
    assert_eq!(tcp.source_port(), 1000);
    assert_eq!(tcp.destination_port(), 80);

    assert_eq!(sink.error_count(), 0);
    assert_eq!(sink.warning_count(), 0);
}

#[test]
fn scenario_flowid_defaulting() {
    let (packets, _sink) = replay(
        b"!IPSummaryDump 1.3\n\
          !flowid 1.2.3.4 5000 5.6.7.8 6000 U\n\
          !data proto\n\
          U\n",
    );

    assert_eq!(packets.len(), 1);
    let p = &packets[0];
    assert_eq!(p.ip_src(), Ipv4Addr::new(1, 2, 3, 4));
    assert_eq!(p.ip_dst(), Ipv4Addr::new(5, 6, 7, 8));
    assert_eq!(p.sport(), 5000);
    assert_eq!(p.dport(), 6000);

    let udp = UdpHeaderSlice::from_slice(&p.data()[20..]).expect("valid UDP header");
    assert_eq!(udp.length(), 8);
    assert_eq!(p.anno.dst_ip, Some(Ipv4Addr::new(5, 6, 7, 8)));
}

#[test]
fn scenario_multipacket_expansion() {
    let (packets, _sink) = replay_with(
        b"!IPSummaryDump 1.3\n\
          !data first_timestamp timestamp count ip_src ip_len\n\
          1.0 3.0 3 10.0.0.1 300\n",
        |c| c.multipacket = true,
    );

    assert_eq!(packets.len(), 3);
    let times: Vec<Timestamp> = packets.iter().map(|p| p.anno.timestamp).collect();
    assert_eq!(
        times,
        vec![
            Timestamp::new(1, 0),
            Timestamp::new(2, 0),
            Timestamp::new(3, 0)
        ]
    );
    assert!(packets.iter().all(|p| p.ip_len() == 100));
}

#[test]
fn scenario_legacy_fragoff() {
    let (packets, _sink) = replay(
        b"!IPSummaryDump 1.0\n\
          !data ip_src ip_fragoff\n\
          10.0.0.1 8\n",
    );
    assert_eq!(packets.len(), 1);
    // legacy: byte offset 8 becomes one 8-byte unit
    assert_eq!(packets[0].ip_off(), 1);

    let (packets, _sink) = replay(
        b"!IPSummaryDump 1.3\n\
          !data ip_src ip_fragoff\n\
          10.0.0.1 8\n",
    );
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].ip_off(), 8);
}

#[test]
fn scenario_sampling_zero() {
    let mut content = Vec::new();
    content.extend_from_slice(b"!IPSummaryDump 1.3\n!data ip_src\n");
    for _ in 0..1000 {
        content.extend_from_slice(b"10.0.0.1\n");
    }
    let (packets, sink) = replay_with(&content, |c| c.sample = 0.0);

    assert!(packets.is_empty());
    assert_eq!(sink.error_count(), 0);
}

#[test]
fn scenario_bad_record_recovery() {
    let (packets, sink) = replay(
        b"!IPSummaryDump 1.3\n\
          !data ip_src ip_dst\n\
          10.0.0.1 10.0.0.2\n\
          not an address at all\n\
          10.0.0.3 10.0.0.4\n",
    );

    assert_eq!(packets.len(), 2);
    assert_eq!(sink.error_count(), 1);
    assert_eq!(packets[0].ip_src(), Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(packets[1].ip_src(), Ipv4Addr::new(10, 0, 0, 3));
}

#[test]
fn property_directive_idempotence() {
    let once = b"!IPSummaryDump 1.3\n\
                 !data timestamp ip_src ip_dst sport dport proto ip_len\n\
                 1.5 10.0.0.1 10.0.0.2 1000 80 T 600\n";
    let twice = b"!IPSummaryDump 1.3\n\
                  !data timestamp ip_src ip_dst sport dport proto ip_len\n\
                  !data timestamp ip_src ip_dst sport dport proto ip_len\n\
                  1.5 10.0.0.1 10.0.0.2 1000 80 T 600\n";

    let (a, _) = replay(once);
    let (b, _) = replay(twice);
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(a[0].data(), b[0].data());
    assert_eq!(a[0].anno, b[0].anno);
}

#[test]
fn property_declaration_order_invariance() {
    // same record content under permuted column orders
    let forward = b"!IPSummaryDump 1.3\n\
                    !data ip_src ip_dst sport dport proto timestamp\n\
                    10.0.0.1 10.0.0.2 1000 80 T 2.25\n";
    let shuffled = b"!IPSummaryDump 1.3\n\
                     !data timestamp proto dport sport ip_dst ip_src\n\
                     2.25 T 80 1000 10.0.0.2 10.0.0.1\n";

    let (a, _) = replay(forward);
    let (b, _) = replay(shuffled);
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(a[0].data(), b[0].data());
    assert_eq!(a[0].anno, b[0].anno);
}

#[test]
fn property_multipacket_conservation() {
    let (packets, _sink) = replay_with(
        b"!IPSummaryDump 1.3\n\
          !data first_timestamp timestamp count ip_src ip_len\n\
          0.5 2.0 4 10.0.0.1 480\n",
        |c| c.multipacket = true,
    );

    assert_eq!(packets.len(), 4);
    let total: u32 = packets
        .iter()
        .map(|p| p.len() as u32 + p.anno.extra_length)
        .sum();
    assert_eq!(total, 480);

    let times: Vec<Timestamp> = packets.iter().map(|p| p.anno.timestamp).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*times.last().unwrap(), Timestamp::new(2, 0));
}

#[test]
fn property_checksum_validity() {
    let (packets, _sink) = replay_with(
        b"!IPSummaryDump 1.3\n\
          !data ip_src ip_dst sport dport proto payload\n\
          10.0.0.1 10.0.0.2 1000 80 T \"hello world\"\n\
          10.0.0.3 10.0.0.4 53 53 U \"dns-ish\"\n",
        |c| c.checksum = true,
    );

    assert_eq!(packets.len(), 2);
    for p in &packets {
        let hl = p.ip_header_len();
        assert_eq!(in_cksum(&p.data()[..hl]), 0, "IP header checksum");
        assert_eq!(
            in_cksum_pseudo(p.ip_src(), p.ip_dst(), p.ip_proto(), &p.data()[hl..]),
            0,
            "transport pseudo-header checksum"
        );
        // the oracle agrees the header is well-formed
        Ipv4HeaderSlice::from_slice(p.data()).expect("valid IPv4 header");
    }
}

#[test]
fn property_binary_ascii_equivalence() {
    let ascii = b"!IPSummaryDump 1.3\n\
                  !data ntimestamp ip_src ip_dst sport dport ip_proto ip_len\n\
                  2.000000500 192.168.0.1 192.168.0.2 4000 443 6 1500\n";

    let mut binary = Vec::new();
    binary.extend_from_slice(b"!IPSummaryDump 1.3\n");
    binary.extend_from_slice(b"!data ntimestamp ip_src ip_dst sport dport ip_proto ip_len\n");
    binary.extend_from_slice(b"!binary\n");
    let mut payload = Vec::new();
    payload.extend_from_slice(&2u32.to_be_bytes());
    payload.extend_from_slice(&500u32.to_be_bytes());
    payload.extend_from_slice(&[192, 168, 0, 1]);
    payload.extend_from_slice(&[192, 168, 0, 2]);
    payload.extend_from_slice(&4000u16.to_be_bytes());
    payload.extend_from_slice(&443u16.to_be_bytes());
    payload.push(6);
    payload.extend_from_slice(&1500u32.to_be_bytes());
    binary.extend_from_slice(&((payload.len() as u32 + 4).to_be_bytes()));
    binary.extend_from_slice(&payload);

    let (a, sink_a) = replay(ascii);
    let (b, sink_b) = replay(&binary);

    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(a[0].data(), b[0].data());
    assert_eq!(a[0].anno, b[0].anno);
    assert_eq!(sink_a.error_count(), 0);
    assert_eq!(sink_b.error_count(), 0);
}

#[test]
fn property_sampling_is_roughly_binomial() {
    let mut content = Vec::new();
    content.extend_from_slice(b"!IPSummaryDump 1.3\n!data ip_src\n");
    for _ in 0..1000 {
        content.extend_from_slice(b"10.0.0.1\n");
    }
    let file = dump(&content);

    let mut config = ReplayConfig::new(file.path());
    config.mode = EmitMode::Pull;
    config.sample = 0.5;
    let mut engine = ReplayEngine::new(&config).unwrap();
    engine.set_sampling_seed(0x5eed);
    engine.initialize().unwrap();

    let mut rt = ManualRuntime::new();
    let mut kept = 0u32;
    while !engine.source_exhausted() {
        if engine.pull(&mut rt).is_some() {
            kept += 1;
        }
    }
    // p=0.5, n=1000: anything outside [400, 600] is far beyond 6 sigma
    assert!((400..=600).contains(&kept), "kept {kept} of 1000");
}

#[test]
fn scenario_timing_pacing_order() {
    let file = dump(
        b"!IPSummaryDump 1.3\n\
          !data timestamp ip_src\n\
          1.0 10.0.0.1\n\
          1.5 10.0.0.2\n\
          4.0 10.0.0.3\n",
    );
    let mut config = ReplayConfig::new(file.path());
    config.mode = EmitMode::Pull;
    config.timing = true;
    let mut engine = ReplayEngine::new(&config).unwrap();
    engine.initialize().unwrap();

    let mut rt = ManualRuntime::at(Timestamp::new(50, 0));
    let mut emitted = Vec::new();
    let mut guard = 0;
    while !engine.source_exhausted() {
        match engine.pull(&mut rt) {
            Some(p) => emitted.push(p.anno.timestamp),
            None => {
                // advance the clock to the armed timer, like a real
                // timer wheel would
                if let Some(at) = rt.timers.last().copied() {
                    rt.now = at;
                    engine.run_timer(&mut rt);
                }
            }
        }
        guard += 1;
        assert!(guard < 100, "pacing loop did not converge");
    }

    assert_eq!(
        emitted,
        vec![
            Timestamp::new(1, 0),
            Timestamp::new(1, 5 * 100_000_000),
            Timestamp::new(4, 0)
        ]
    );
    // two stalls were paced by the timer
    assert_eq!(rt.timers.len(), 2);
    assert!(rt.wakes >= 3);
}

#[test]
fn scenario_comments_and_blanks_ignored() {
    let (packets, sink) = replay(
        b"!IPSummaryDump 1.3\n\
          !data ip_src\n\
          # a comment line\n\
          \n\
          10.0.0.1\n\
          \n\
          # another\n\
          10.0.0.2\n",
    );
    assert_eq!(packets.len(), 2);
    assert_eq!(sink.error_count(), 0);
}
