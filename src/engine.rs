//! The replay engine: record loop, gates, and control surface.
//!
//! Push mode runs as a scheduled task ([`run_task`]) that reads until
//! it produces one admissible packet, pushes it, and reschedules
//! itself. Pull mode ([`pull`]) hands one admissible packet per call
//! and drives the empty-notifier so the consumer can sleep.
//! "Admissible" means the packet passed the sampling and timing gates.
//!
//! [`run_task`]: ReplayEngine::run_task
//! [`pull`]: ReplayEngine::pull

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::assemble::assemble_record;
use crate::config::{EmitMode, ReplayConfig, SAMPLING_SHIFT};
use crate::directive::{spacevec, DumpState, MINOR_VERSION};
use crate::error::{ConfigError, Error, ErrorSink, LogSink};
use crate::expand::MultipacketState;
use crate::io::DumpFile;
use crate::packet::SumPacket;
use crate::runtime::{PacketSink, Runtime};
use crate::time::Timestamp;

/// Reconstructs packets from an IP summary dump and emits them through
/// the push or pull contract.
pub struct ReplayEngine {
    ff: DumpFile,
    state: DumpState,
    mode: EmitMode,
    stop: bool,
    active: bool,
    checksum: bool,
    multipacket: bool,
    timing: bool,
    sampling_prob: u32,
    timing_offset: Option<Timestamp>,
    /// Single slot for a parked packet: timing-stalled, or the
    /// decrementing multipacket source.
    work: Option<SumPacket>,
    expander: MultipacketState,
    rng: SmallRng,
}

impl ReplayEngine {
    /// Validate the configuration and build an engine. The source is
    /// not opened until [`initialize`](Self::initialize).
    pub fn new(config: &ReplayConfig) -> Result<Self, Error> {
        Self::with_error_sink(config, Arc::new(LogSink))
    }

    /// Like [`new`](Self::new), with diagnostics routed to `errors`.
    pub fn with_error_sink(
        config: &ReplayConfig,
        errors: Arc<dyn ErrorSink>,
    ) -> Result<Self, Error> {
        let sampling_prob = config.sampling_prob_fixed()?;
        let ff = DumpFile::new(&config.filename, errors);
        let mut state = DumpState::new(config.proto);

        if let Some(contents) = &config.contents {
            let line = contents.as_bytes();
            let words = spacevec(line);
            if words.is_empty() {
                return Err(ConfigError::BadContents {
                    reason: "empty field list".into(),
                }
                .into());
            }
            state.bang_data(&words, &ff);
        }
        if let Some(flowid) = &config.flowid {
            state.set_default_flowid(flowid).map_err(Error::Config)?;
        }

        Ok(ReplayEngine {
            ff,
            state,
            mode: config.mode,
            stop: config.stop,
            active: config.active,
            checksum: config.checksum,
            multipacket: config.multipacket,
            timing: config.timing,
            sampling_prob,
            timing_offset: None,
            work: None,
            expander: MultipacketState::new(),
            rng: SmallRng::from_entropy(),
        })
    }

    /// Open the dump and interpret its banner line.
    pub fn initialize(&mut self) -> Result<(), Error> {
        self.ff.initialize()?;
        self.state.minor_version = MINOR_VERSION;
        self.state.handle_banner(&mut self.ff);
        Ok(())
    }

    /// Release the source and any parked packet. Safe in any state.
    pub fn cleanup(&mut self) {
        self.ff.cleanup();
        self.work = None;
    }

    /// Seed the sampling PRNG (reproducible sampling runs).
    pub fn set_sampling_seed(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }

    /// Read one length-prefixed binary record. Returns the payload and
    /// whether it is textual (high bit of the length word).
    fn read_binary(&mut self) -> Option<(Vec<u8>, bool)> {
        debug_assert!(self.state.binary);
        let header = self.ff.get_unaligned(4)?;
        let word = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let record_length = (word & 0x7FFF_FFFF) as usize;
        if record_length < 4 {
            self.ff.error("binary record too short");
            self.ff.cleanup();
            return None;
        }
        let textual = header[0] & 0x80 != 0;
        let mut payload = self.ff.get_string(record_length - 4)?;
        if textual {
            while payload.last() == Some(&0) {
                payload.pop();
            }
        }
        self.ff.set_lineno(self.ff.lineno() + 1);
        Some((payload, textual))
    }

    /// Read records until one assembles into a packet. `None` either
    /// means EOF (the source reports uninitialized) or a discarded
    /// record; callers distinguish via [`source_exhausted`].
    ///
    /// [`source_exhausted`]: Self::source_exhausted
    fn read_packet(&mut self) -> Option<SumPacket> {
        loop {
            let (line, binary_record) = if self.state.binary {
                match self.read_binary() {
                    Some((line, textual)) => (line, !textual),
                    None => {
                        self.ff.cleanup();
                        return None;
                    }
                }
            } else {
                match self.ff.read_line() {
                    Some(line) => (line, false),
                    None => return None,
                }
            };

            if line.is_empty() {
                continue;
            }
            if !binary_record {
                match line[0] {
                    b'#' => continue,
                    b'!' => {
                        self.state.apply_directive(&line, &mut self.ff);
                        continue;
                    }
                    _ => {}
                }
            }

            return assemble_record(
                &mut self.state,
                &line,
                binary_record,
                self.checksum,
                &self.ff,
            );
        }
    }

    /// True once EOF or a source error has closed the dump.
    pub fn source_exhausted(&self) -> bool {
        !self.ff.initialized()
    }

    /// Sampling gate: one 28-bit draw per loop iteration.
    fn sample_keep(&mut self) -> bool {
        self.sampling_prob >= (1 << SAMPLING_SHIFT)
            || (self.rng.gen::<u32>() & ((1 << SAMPLING_SHIFT) - 1)) < self.sampling_prob
    }

    /// Timing gate. Returns the packet when it is due; otherwise parks
    /// it in the work slot, arms the timer (or fast-reschedules when
    /// the target is inside the adjustment slack), and returns `None`.
    fn check_timing<R: Runtime>(&mut self, p: SumPacket, rt: &mut R) -> Option<SumPacket> {
        let offset = *self
            .timing_offset
            .get_or_insert_with(|| rt.now() - p.anno.timestamp);
        let now = rt.now();
        let target = p.anno.timestamp + offset;
        if now < target {
            let adjusted = target - rt.timer_adjustment();
            if now < adjusted {
                rt.schedule_at(adjusted);
                if self.mode == EmitMode::Pull {
                    rt.notifier_sleep();
                }
            } else if self.mode == EmitMode::Push {
                rt.fast_reschedule();
            }
            self.work = Some(p);
            return None;
        }
        Some(p)
    }

    /// One push-task activation: emit at most one admissible packet,
    /// reschedule. Returns false when the task should not be
    /// rescheduled (inactive, EOF, or waiting on the timer).
    pub fn run_task<R: Runtime, S: PacketSink>(&mut self, rt: &mut R, sink: &mut S) -> bool {
        if !self.active {
            return false;
        }
        let mut p: Option<SumPacket>;
        loop {
            p = self.work.take().or_else(|| self.read_packet());
            if p.is_none() {
                if self.source_exhausted() {
                    if self.stop {
                        rt.request_stop();
                    }
                    return false;
                }
                break; // bad record: try again next activation
            }
            if self.timing {
                match self.check_timing(p.take().unwrap(), rt) {
                    Some(pkt) => p = Some(pkt),
                    None => return false,
                }
            }
            if self.multipacket {
                p = p.map(|pkt| self.expander.expand(pkt, &mut self.work));
            }
            if self.sample_keep() {
                break;
            }
            p = None; // sampled out
        }

        if let Some(pkt) = p {
            sink.push(pkt);
        }
        rt.fast_reschedule();
        true
    }

    /// Pull one admissible packet. `None` at EOF (after sleeping the
    /// notifier), on a timing stall, or for a discarded record.
    pub fn pull<R: Runtime>(&mut self, rt: &mut R) -> Option<SumPacket> {
        if !self.active {
            return None;
        }
        let mut p: Option<SumPacket>;
        loop {
            p = self.work.take().or_else(|| self.read_packet());
            if p.is_none() && self.source_exhausted() {
                if self.stop {
                    rt.request_stop();
                }
                rt.notifier_sleep();
                return None;
            }
            if p.is_some() && self.timing {
                match self.check_timing(p.take().unwrap(), rt) {
                    Some(pkt) => p = Some(pkt),
                    None => return None,
                }
            }
            if self.multipacket {
                p = p.map(|pkt| self.expander.expand(pkt, &mut self.work));
            }
            if self.sample_keep() {
                break;
            }
            p = None; // sampled out
        }

        rt.notifier_wake();
        p
    }

    /// Timer callback: resume the stalled loop.
    pub fn run_timer<R: Runtime>(&mut self, rt: &mut R) {
        if self.active {
            match self.mode {
                EmitMode::Pull => rt.notifier_wake(),
                EmitMode::Push => rt.task_reschedule(),
            }
        }
    }

    // Control surface.

    /// Sampling probability as a 28-bit fixed-point fraction.
    pub fn sampling_prob(&self) -> u32 {
        self.sampling_prob
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Flip the active flag; re-activation schedules the task or wakes
    /// the notifier, deactivation is passive.
    pub fn set_active<R: Runtime>(&mut self, active: bool, rt: &mut R) {
        self.active = active;
        match self.mode {
            EmitMode::Push => {
                if active {
                    rt.task_reschedule();
                }
            }
            EmitMode::Pull => {
                if active {
                    rt.notifier_wake();
                } else {
                    rt.notifier_sleep();
                }
            }
        }
    }

    /// Encapsulation of the produced packets.
    pub fn encap(&self) -> &'static str {
        "IP"
    }

    /// Deactivate and ask the surrounding driver to halt.
    pub fn stop<R: Runtime>(&mut self, rt: &mut R) {
        self.active = false;
        rt.request_stop();
    }

    /// Dump minor version in effect (banner-declared, clamped).
    pub fn minor_version(&self) -> u8 {
        self.state.minor_version
    }
}

impl Drop for ReplayEngine {
    fn drop(&mut self) {
        self.cleanup();
    }
}
