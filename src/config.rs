//! Engine configuration.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Fixed-point shift for the sampling probability.
pub const SAMPLING_SHIFT: u32 = 28;

/// How the engine hands packets downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitMode {
    /// A scheduled task pushes packets to a sink.
    #[default]
    Push,
    /// The consumer pulls packets on demand.
    Pull,
}

/// Construction-time knobs for [`ReplayEngine`](crate::engine::ReplayEngine).
///
/// Mirrors the dump format's configuration surface; every field has
/// exactly one effect.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Path to the dump source.
    pub filename: PathBuf,
    /// Emission mode (push task vs pull on demand).
    pub mode: EmitMode,
    /// Ask the surrounding driver to halt at EOF.
    pub stop: bool,
    /// Initial active state.
    pub active: bool,
    /// Zero-fill packet buffers before assembly. Accepted for
    /// compatibility; buffer growth always zero-fills here.
    pub zero: bool,
    /// Pace emission against the wall clock.
    pub timing: bool,
    /// Recompute IP/TCP/UDP checksums during assembly.
    pub checksum: bool,
    /// Sampling probability in [0, 1].
    pub sample: f64,
    /// Default IP protocol byte for records that omit one.
    pub proto: u8,
    /// Expand records with a packet count into that many packets.
    pub multipacket: bool,
    /// Field list to use when the dump carries no `!data` banner.
    pub contents: Option<String>,
    /// Flow-ID defaults to use when the dump carries no `!flowid`.
    pub flowid: Option<String>,
}

impl ReplayConfig {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        ReplayConfig {
            filename: filename.into(),
            mode: EmitMode::Push,
            stop: false,
            active: true,
            zero: true,
            timing: false,
            checksum: false,
            sample: 1.0,
            proto: crate::packet::IP_PROTO_TCP,
            multipacket: false,
            contents: None,
            flowid: None,
        }
    }

    /// Convert the sampling probability to 28-bit fixed point.
    ///
    /// Values above 1 clamp with a warning; exactly zero warns that the
    /// engine will emit nothing. Negative values are a config error.
    pub fn sampling_prob_fixed(&self) -> Result<u32, ConfigError> {
        if self.sample < 0.0 || !self.sample.is_finite() {
            return Err(ConfigError::SampleOutOfRange { value: self.sample });
        }
        if self.sample > 1.0 {
            tracing::warn!("SAMPLE probability reduced to 1");
            return Ok(1 << SAMPLING_SHIFT);
        }
        let fixed = (self.sample * (1u64 << SAMPLING_SHIFT) as f64).round() as u32;
        if fixed == 0 {
            tracing::warn!("SAMPLE probability is 0; emitting no packets");
        }
        Ok(fixed)
    }
}
