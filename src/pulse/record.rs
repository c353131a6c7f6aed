//! Classified pulse records and their wire format

use core::fmt::Write;

/// Maximum encoded line length, including the optional timestamp prefix
/// and the trailing newline.
pub const MAX_LINE_LEN: usize = 64;

/// One encoded record line.
pub type RecordLine = heapless::String<MAX_LINE_LEN>;

/// Signal level of the monitored input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// The level as it appears on the wire (`0` or `1`).
    pub fn bit(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }

    pub fn from_bit(bit: u8) -> Self {
        if bit & 1 == 1 {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// A classified record produced by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    /// Sync pulse detected; a new frame starts here.
    Sync,
    /// One data pulse: the sampled level and the pulse length in µs.
    Data { level: Level, pulse_len_us: u64 },
    /// Overlong pulse; the frame ends here.
    End,
    /// Sub-threshold pulse while recording.
    ErrLen,
    /// The level failed to toggle between consecutive data pulses.
    ErrLevel,
}

impl Record {
    /// Encode the record as a newline-terminated ASCII line, optionally
    /// prefixed with the triggering timestamp (`"<ts> "`, decimal).
    ///
    /// The line buffer is large enough for the widest possible record,
    /// so the writes below cannot fail.
    pub fn encode(&self, timestamp_us: Option<u64>) -> RecordLine {
        let mut line = RecordLine::new();

        if let Some(ts) = timestamp_us {
            let _ = write!(line, "{} ", ts);
        }

        match self {
            Record::Sync => {
                let _ = line.push_str("SYNC\n");
            }
            Record::Data {
                level,
                pulse_len_us,
            } => {
                let _ = write!(line, "{} {}\n", level.bit(), pulse_len_us);
            }
            Record::End => {
                let _ = line.push_str("END\n");
            }
            Record::ErrLen => {
                let _ = line.push_str("ERR_LEN\n");
            }
            Record::ErrLevel => {
                let _ = line.push_str("ERR_LEVEL\n");
            }
        }

        line
    }
}
