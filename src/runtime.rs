//! External collaborator contracts.
//!
//! The engine is single-threaded and cooperative; everything that
//! suspends or crosses into the surrounding pipeline goes through
//! these traits: the push task, the timing-gate timer, the pull-mode
//! empty-notifier, and the driver-stop request. [`SystemRuntime`] is a
//! wall-clock implementation for standalone use; [`ManualRuntime`]
//! records calls and runs on a hand-set clock for tests.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::packet::SumPacket;
use crate::time::Timestamp;

/// Downstream consumer for push mode.
pub trait PacketSink {
    fn push(&mut self, packet: SumPacket);
}

impl PacketSink for Vec<SumPacket> {
    fn push(&mut self, packet: SumPacket) {
        Vec::push(self, packet);
    }
}

/// Scheduling surface the engine drives.
pub trait Runtime {
    /// Current time on the emission clock.
    fn now(&self) -> Timestamp;

    /// Slack subtracted from a timing target so the timer does not
    /// oversleep.
    fn timer_adjustment(&self) -> Timestamp {
        Timestamp::from_usec(0, 500)
    }

    /// Arm the one-shot timer; on fire the holder calls
    /// [`ReplayEngine::run_timer`](crate::engine::ReplayEngine::run_timer).
    fn schedule_at(&mut self, at: Timestamp);

    /// Schedule the push task if it is not already scheduled.
    fn task_reschedule(&mut self);

    /// Yield and re-run the push task promptly.
    fn fast_reschedule(&mut self);

    /// Pull mode: nothing to give, downstream may sleep.
    fn notifier_sleep(&mut self);

    /// Pull mode: a packet is available, wake downstream.
    fn notifier_wake(&mut self);

    /// Ask the surrounding driver to halt.
    fn request_stop(&mut self);
}

/// Wall-clock runtime for driving the engine outside a pipeline.
///
/// Scheduling calls just record state; the embedding loop inspects
/// `wake_at` / `stop_requested` and sleeps or exits accordingly.
#[derive(Debug, Default)]
pub struct SystemRuntime {
    pub wake_at: Option<Timestamp>,
    pub task_pending: bool,
    pub notifier_awake: bool,
    pub stop_requested: bool,
}

impl SystemRuntime {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Runtime for SystemRuntime {
    fn now(&self) -> Timestamp {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp::new(elapsed.as_secs() as i64, elapsed.subsec_nanos())
    }

    fn schedule_at(&mut self, at: Timestamp) {
        self.wake_at = Some(at);
    }

    fn task_reschedule(&mut self) {
        self.task_pending = true;
    }

    fn fast_reschedule(&mut self) {
        self.task_pending = true;
    }

    fn notifier_sleep(&mut self) {
        self.notifier_awake = false;
    }

    fn notifier_wake(&mut self) {
        self.notifier_awake = true;
    }

    fn request_stop(&mut self) {
        self.stop_requested = true;
    }
}

/// Deterministic runtime double: manual clock, recorded calls.
#[derive(Debug, Default)]
pub struct ManualRuntime {
    pub now: Timestamp,
    pub timers: Vec<Timestamp>,
    pub reschedules: usize,
    pub fast_reschedules: usize,
    pub sleeps: usize,
    pub wakes: usize,
    pub stop_requested: bool,
}

impl ManualRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(now: Timestamp) -> Self {
        ManualRuntime {
            now,
            ..Self::default()
        }
    }
}

impl Runtime for ManualRuntime {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn timer_adjustment(&self) -> Timestamp {
        Timestamp::ZERO
    }

    fn schedule_at(&mut self, at: Timestamp) {
        self.timers.push(at);
    }

    fn task_reschedule(&mut self) {
        self.reschedules += 1;
    }

    fn fast_reschedule(&mut self) {
        self.fast_reschedules += 1;
    }

    fn notifier_sleep(&mut self) {
        self.sleeps += 1;
    }

    fn notifier_wake(&mut self) {
        self.wakes += 1;
    }

    fn request_stop(&mut self) {
        self.stop_requested = true;
    }
}
