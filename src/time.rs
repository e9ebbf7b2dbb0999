//! Fixed-point timestamps.
//!
//! Dump records carry `seconds.nanoseconds` timestamps with up to nine
//! sub-second digits, and the emission scheduler needs signed offsets
//! (wall clock minus first packet time), so timestamps are kept as a
//! signed second count plus a normalized nanosecond part rather than as
//! a single microsecond integer.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

pub const NSEC_PER_SEC: u32 = 1_000_000_000;
pub const NSEC_PER_USEC: u32 = 1_000;

/// A second.nanosecond timestamp or signed duration.
///
/// `nsec` is always in `0..NSEC_PER_SEC`; negative values are
/// represented by a negative `sec` with a non-negative `nsec`, the same
/// normalization `timespec` uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    sec: i64,
    nsec: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { sec: 0, nsec: 0 };

    /// Build from seconds and nanoseconds; `nsec` must be < 1e9.
    pub fn new(sec: i64, nsec: u32) -> Self {
        debug_assert!(nsec < NSEC_PER_SEC);
        Timestamp { sec, nsec }
    }

    pub fn from_usec(sec: i64, usec: u32) -> Self {
        debug_assert!(usec < 1_000_000);
        Timestamp {
            sec,
            nsec: usec * NSEC_PER_USEC,
        }
    }

    /// Total microseconds since the epoch (e.g. `ts_usec1` records).
    pub fn from_total_usec(usec: u64) -> Self {
        Timestamp {
            sec: (usec / 1_000_000) as i64,
            nsec: ((usec % 1_000_000) as u32) * NSEC_PER_USEC,
        }
    }

    fn from_nanos(nanos: i128) -> Self {
        let sec = nanos.div_euclid(NSEC_PER_SEC as i128);
        let nsec = nanos.rem_euclid(NSEC_PER_SEC as i128);
        Timestamp {
            sec: sec as i64,
            nsec: nsec as u32,
        }
    }

    fn as_nanos(&self) -> i128 {
        self.sec as i128 * NSEC_PER_SEC as i128 + self.nsec as i128
    }

    pub fn sec(&self) -> i64 {
        self.sec
    }

    pub fn nsec(&self) -> u32 {
        self.nsec
    }

    pub fn set_sec(&mut self, sec: i64) {
        self.sec = sec;
    }

    /// Replace only the sub-second part.
    pub fn set_nsec(&mut self, nsec: u32) {
        debug_assert!(nsec < NSEC_PER_SEC);
        self.nsec = nsec;
    }

    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    /// Divide a non-negative duration into `n` equal steps.
    pub fn div(&self, n: u32) -> Self {
        debug_assert!(n > 0);
        Self::from_nanos(self.as_nanos() / n as i128)
    }
}

impl Add for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Timestamp) -> Timestamp {
        Timestamp::from_nanos(self.as_nanos() + rhs.as_nanos())
    }
}

impl AddAssign for Timestamp {
    fn add_assign(&mut self, rhs: Timestamp) {
        *self = *self + rhs;
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Timestamp) -> Timestamp {
        Timestamp::from_nanos(self.as_nanos() - rhs.as_nanos())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sec < 0 && self.nsec != 0 {
            // -1.2s is stored as sec=-2 nsec=8e8; print the human form
            let nanos = -self.as_nanos();
            let sec = nanos / NSEC_PER_SEC as i128;
            let nsec = nanos % NSEC_PER_SEC as i128;
            write!(f, "-{sec}.{nsec:09}")
        } else {
            write!(f, "{}.{:09}", self.sec, self.nsec)
        }
    }
}
