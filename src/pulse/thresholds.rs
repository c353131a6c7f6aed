//! Runtime-tunable classification thresholds
//!
//! Shared between the decode thread (read on every edge) and the
//! control interface (written out-of-band). Each parameter is an
//! independent atomic: readers always see a whole value, but the set
//! as a whole is not updated transactionally.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Pulses shorter than this are glitches (µs).
pub const DEFAULT_PULSE_MIN_LEN: u64 = 500;
/// Lower bound of the sync pulse band (µs, exclusive).
pub const DEFAULT_SYNC_PULSE_MIN_LEN: u64 = 8000;
/// Upper bound of the sync pulse band (µs, exclusive).
pub const DEFAULT_SYNC_PULSE_MAX_LEN: u64 = 10000;
/// Pulses longer than this terminate a frame (µs).
pub const DEFAULT_END_PULSE_MIN_LEN: u64 = 10000;

/// Parameter names accepted by [`Thresholds::get`] and [`Thresholds::set`].
pub const PARAM_NAMES: [&str; 5] = [
    "pulse_min_len",
    "sync_pulse_min_len",
    "sync_pulse_max_len",
    "end_pulse_min_len",
    "echo_timestamps",
];

/// Shared threshold store.
#[derive(Debug)]
pub struct Thresholds {
    pulse_min_len: AtomicU64,
    sync_pulse_min_len: AtomicU64,
    sync_pulse_max_len: AtomicU64,
    end_pulse_min_len: AtomicU64,
    echo_timestamps: AtomicBool,
}

/// A point-in-time copy of the threshold set, taken once per edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdValues {
    pub pulse_min_len: u64,
    pub sync_pulse_min_len: u64,
    pub sync_pulse_max_len: u64,
    pub end_pulse_min_len: u64,
    pub echo_timestamps: bool,
}

impl Default for ThresholdValues {
    fn default() -> Self {
        Self {
            pulse_min_len: DEFAULT_PULSE_MIN_LEN,
            sync_pulse_min_len: DEFAULT_SYNC_PULSE_MIN_LEN,
            sync_pulse_max_len: DEFAULT_SYNC_PULSE_MAX_LEN,
            end_pulse_min_len: DEFAULT_END_PULSE_MIN_LEN,
            echo_timestamps: true,
        }
    }
}

impl Thresholds {
    pub fn new(values: ThresholdValues) -> Self {
        Self {
            pulse_min_len: AtomicU64::new(values.pulse_min_len),
            sync_pulse_min_len: AtomicU64::new(values.sync_pulse_min_len),
            sync_pulse_max_len: AtomicU64::new(values.sync_pulse_max_len),
            end_pulse_min_len: AtomicU64::new(values.end_pulse_min_len),
            echo_timestamps: AtomicBool::new(values.echo_timestamps),
        }
    }

    /// Read the whole set. Last-write-wins per parameter.
    pub fn snapshot(&self) -> ThresholdValues {
        ThresholdValues {
            pulse_min_len: self.pulse_min_len.load(Ordering::Relaxed),
            sync_pulse_min_len: self.sync_pulse_min_len.load(Ordering::Relaxed),
            sync_pulse_max_len: self.sync_pulse_max_len.load(Ordering::Relaxed),
            end_pulse_min_len: self.end_pulse_min_len.load(Ordering::Relaxed),
            echo_timestamps: self.echo_timestamps.load(Ordering::Relaxed),
        }
    }

    /// Look up a parameter by name. The boolean flag reads as 0/1.
    pub fn get(&self, name: &str) -> Option<u64> {
        match name {
            "pulse_min_len" => Some(self.pulse_min_len.load(Ordering::Relaxed)),
            "sync_pulse_min_len" => Some(self.sync_pulse_min_len.load(Ordering::Relaxed)),
            "sync_pulse_max_len" => Some(self.sync_pulse_max_len.load(Ordering::Relaxed)),
            "end_pulse_min_len" => Some(self.end_pulse_min_len.load(Ordering::Relaxed)),
            "echo_timestamps" => Some(u64::from(self.echo_timestamps.load(Ordering::Relaxed))),
            _ => None,
        }
    }

    /// Update a parameter by name. The boolean flag accepts any value,
    /// nonzero meaning enabled. Returns false for unknown names.
    pub fn set(&self, name: &str, value: u64) -> bool {
        match name {
            "pulse_min_len" => self.pulse_min_len.store(value, Ordering::Relaxed),
            "sync_pulse_min_len" => self.sync_pulse_min_len.store(value, Ordering::Relaxed),
            "sync_pulse_max_len" => self.sync_pulse_max_len.store(value, Ordering::Relaxed),
            "end_pulse_min_len" => self.end_pulse_min_len.store(value, Ordering::Relaxed),
            "echo_timestamps" => self.echo_timestamps.store(value != 0, Ordering::Relaxed),
            _ => return false,
        }
        true
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(ThresholdValues::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let thresholds = Thresholds::default();
        let values = thresholds.snapshot();
        assert_eq!(values.pulse_min_len, 500);
        assert_eq!(values.sync_pulse_min_len, 8000);
        assert_eq!(values.sync_pulse_max_len, 10000);
        assert_eq!(values.end_pulse_min_len, 10000);
        assert!(values.echo_timestamps);
    }

    #[test]
    fn test_set_get_by_name() {
        let thresholds = Thresholds::default();
        for name in PARAM_NAMES {
            assert!(thresholds.get(name).is_some(), "{} should exist", name);
        }

        assert!(thresholds.set("pulse_min_len", 250));
        assert_eq!(thresholds.get("pulse_min_len"), Some(250));
        assert_eq!(thresholds.snapshot().pulse_min_len, 250);

        assert!(thresholds.set("echo_timestamps", 0));
        assert_eq!(thresholds.get("echo_timestamps"), Some(0));
        assert!(!thresholds.snapshot().echo_timestamps);
    }

    #[test]
    fn test_unknown_name() {
        let thresholds = Thresholds::default();
        assert!(thresholds.get("bogus").is_none());
        assert!(!thresholds.set("bogus", 1));
    }
}
