//! Pulse classification state machine
//!
//! Runs once per edge in the decode context, so it must complete in
//! bounded time and cannot block or allocate. The transition function
//! is pure: state in, records out; pushing records into the FIFO is
//! the caller's job.

use heapless::Vec;

use super::record::{Level, Record};
use super::thresholds::ThresholdValues;

/// Upper bound on records from a single edge: a sync pulse can carry a
/// data record that is simultaneously an end pulse and a level fault.
pub const MAX_RECORDS_PER_EDGE: usize = 4;

/// Records produced by one edge, in emission order.
pub type Records = Vec<Record, MAX_RECORDS_PER_EDGE>;

/// Pulse decoder state for one session.
#[derive(Debug, Default)]
pub struct PulseDecoder {
    /// Timestamp of the last processed edge; `None` before the first
    /// edge of the session.
    prev_timestamp_us: Option<u64>,
    /// Whether we are inside a valid pulse train. Only a sync pulse
    /// sets this.
    recording: bool,
    /// Level seen on the previous recorded edge; `None` right after a
    /// sync, when there is no comparison basis yet.
    prev_level: Option<Level>,
}

impl PulseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one edge transition and classify the pulse that ended
    /// with it.
    ///
    /// Timestamps are expected to be monotonic within a session. A
    /// backwards timestamp measures as a zero-length pulse and takes
    /// the glitch path below, so it can never register as a sync or
    /// data pulse.
    pub fn on_edge(&mut self, now_us: u64, level: Level, th: &ThresholdValues) -> Records {
        let mut out = Records::new();

        // The first edge has no prior timestamp to diff against.
        let Some(prev_us) = self.prev_timestamp_us.replace(now_us) else {
            return out;
        };

        let pulse_len = now_us.saturating_sub(prev_us);

        // Ignore short pulses and abort recording
        if pulse_len < th.pulse_min_len {
            if self.recording {
                self.recording = false;
                let _ = out.push(Record::ErrLen);
            }
            return out;
        }

        // Start recording if this is a sync pulse
        if pulse_len > th.sync_pulse_min_len && pulse_len < th.sync_pulse_max_len {
            self.recording = true;
            self.prev_level = None;
            let _ = out.push(Record::Sync);
        }

        if self.recording {
            // Record the data
            let _ = out.push(Record::Data {
                level,
                pulse_len_us: pulse_len,
            });

            // Stop recording if this is an end pulse
            if pulse_len > th.end_pulse_min_len {
                self.recording = false;
                let _ = out.push(Record::End);
            }

            // Abort recording if the level didn't toggle
            if Some(level) == self.prev_level {
                self.recording = false;
                let _ = out.push(Record::ErrLevel);
            }

            self.prev_level = Some(level);
        }

        out
    }

    /// Whether the decoder currently believes it is inside a frame.
    pub fn recording(&self) -> bool {
        self.recording
    }
}
