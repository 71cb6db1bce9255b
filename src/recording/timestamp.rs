// Capture timestamps and the timestamp -> frame index map
//
// Presentation timestamps arrive as floating point seconds (or integer
// nanoseconds) from two independent sources. They are quantized to whole
// microseconds before they are ever compared or used as keys.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Presentation timestamp quantized to integer microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Quantize seconds to the nearest microsecond
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1e6).round() as i64)
    }

    /// Quantize nanoseconds to the nearest microsecond (half rounds up)
    pub fn from_nanos(nanos: u64) -> Self {
        Self((nanos.saturating_add(500) / 1_000) as i64)
    }

    pub fn from_duration(d: Duration) -> Self {
        Self::from_nanos(d.as_nanos() as u64)
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    /// Nanoseconds for the encoder; negative times clamp to zero
    pub fn as_nanos(&self) -> u64 {
        (self.0.max(0) as u64).saturating_mul(1_000)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e6
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

/// Maps each ingested frame's timestamp to its sequence number.
///
/// Sequence numbers are handed out by the caller in arrival order; the
/// index only records them. Entries are never removed during a session.
#[derive(Debug, Default)]
pub struct TimestampIndex {
    map: HashMap<Timestamp, usize>,
}

impl TimestampIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `ts -> index`. Returns the index previously held by `ts`, if
    /// the same timestamp was ingested twice; the newer frame wins.
    pub fn insert(&mut self, ts: Timestamp, index: usize) -> Option<usize> {
        self.map.insert(ts, index)
    }

    pub fn get(&self, ts: Timestamp) -> Option<usize> {
        self.map.get(&ts).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
