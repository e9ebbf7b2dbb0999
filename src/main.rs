//! sumreplay CLI entry point.
//!
//! Replays an IP summary dump and prints one summary line per
//! synthesized packet.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sumreplay::config::{EmitMode, ReplayConfig};
use sumreplay::engine::ReplayEngine;
use sumreplay::packet::{SumPacket, IP_PROTO_ICMP, IP_PROTO_TCP, IP_PROTO_UDP};
use sumreplay::runtime::{Runtime, SystemRuntime};

/// Replay IP packets from an IP summary dump.
#[derive(Parser, Debug)]
#[command(name = "sumreplay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Summary dump file to replay
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Pace emission against the dump's timestamps
    #[arg(long = "timing")]
    timing: bool,

    /// Recompute IP/TCP/UDP checksums
    #[arg(long = "checksum")]
    checksum: bool,

    /// Expand records with packet counts into multiple packets
    #[arg(long = "multipacket")]
    multipacket: bool,

    /// Sampling probability in [0, 1]
    #[arg(long = "sample", default_value = "1.0")]
    sample: f64,

    /// Default IP protocol for records that omit one
    #[arg(long = "proto", default_value = "6")]
    proto: u8,

    /// Field list to assume when the dump has no !data banner
    #[arg(long = "contents", value_name = "FIELDS")]
    contents: Option<String>,

    /// Flow-ID defaults: "SRC SPORT DST DPORT [PROTO]"
    #[arg(long = "flowid", value_name = "FLOW")]
    flowid: Option<String>,

    /// Stop after this many packets
    #[arg(short = 'n', long = "limit", value_name = "COUNT")]
    limit: Option<u64>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let mut config = ReplayConfig::new(&args.file);
    config.mode = EmitMode::Pull;
    config.timing = args.timing;
    config.checksum = args.checksum;
    config.multipacket = args.multipacket;
    config.sample = args.sample;
    config.proto = args.proto;
    config.contents = args.contents;
    config.flowid = args.flowid;

    let mut engine = ReplayEngine::new(&config)?;
    engine
        .initialize()
        .with_context(|| format!("failed to open dump: {}", args.file.display()))?;

    let mut rt = SystemRuntime::new();
    let mut emitted: u64 = 0;

    while !engine.source_exhausted() {
        match engine.pull(&mut rt) {
            Some(packet) => {
                print_packet(emitted + 1, &packet);
                emitted += 1;
                if args.limit.is_some_and(|limit| emitted >= limit) {
                    break;
                }
            }
            None => {
                // timing stall: sleep until the armed wake-up time
                if let Some(wake_at) = rt.wake_at.take() {
                    let now = rt.now();
                    if wake_at > now {
                        let delta = wake_at - now;
                        std::thread::sleep(Duration::new(
                            delta.sec().max(0) as u64,
                            delta.nsec(),
                        ));
                    }
                    engine.run_timer(&mut rt);
                }
            }
        }
    }

    eprintln!("{emitted} packets");
    Ok(())
}

fn print_packet(index: u64, p: &SumPacket) {
    if !p.has_net_header() {
        println!("{index}: {} [{} bytes, no network header]", p.anno.timestamp, p.len());
        return;
    }
    let proto = match p.ip_proto() {
        IP_PROTO_TCP => "tcp",
        IP_PROTO_UDP => "udp",
        IP_PROTO_ICMP => "icmp",
        _ => "ip",
    };
    let ports = if p.transport_len() >= 4 && p.is_first_fragment() {
        format!(" {}>{}", p.sport(), p.dport())
    } else {
        String::new()
    };
    println!(
        "{index}: {} {} > {} {proto}{ports} len {}",
        p.anno.timestamp,
        p.ip_src(),
        p.ip_dst(),
        p.ip_len(),
    );
}
