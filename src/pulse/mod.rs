//! Pulse classification module
//!
//! Turns timestamped edge events into classified records:
//! 1. Measure the pulse length between consecutive edges
//! 2. Discard sub-threshold glitches
//! 3. Detect sync pulses and (re)start recording
//! 4. Emit data records while recording, with end/level-fault detection

pub mod decoder;
pub mod record;
pub mod thresholds;

pub use decoder::PulseDecoder;
pub use record::{Level, Record};
pub use thresholds::{ThresholdValues, Thresholds};
