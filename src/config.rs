//! Configuration loaded from environment variables

use std::path::PathBuf;

use crate::pulse::thresholds::ThresholdValues;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Command whose stdout provides transition lines (takes priority
    /// over the file source when both are set)
    pub source_command: Option<String>,

    /// Capture file to replay transition lines from
    pub source_file: Option<PathBuf>,

    /// Listen address for the control interface
    pub control_addr: String,

    /// Record FIFO capacity in bytes
    pub fifo_capacity: usize,

    /// Stats reporting interval in seconds
    pub stats_interval_secs: u64,

    /// Initial classification thresholds
    pub thresholds: ThresholdValues,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = ThresholdValues::default();

        Self {
            source_command: std::env::var("EDGE_SOURCE_CMD").ok(),

            source_file: std::env::var("EDGE_SOURCE_FILE").ok().map(PathBuf::from),

            control_addr: std::env::var("CONTROL_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:4433".to_string()),

            fifo_capacity: std::env::var("FIFO_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4096),

            stats_interval_secs: std::env::var("STATS_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            thresholds: ThresholdValues {
                pulse_min_len: std::env::var("PULSE_MIN_LEN")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.pulse_min_len),

                sync_pulse_min_len: std::env::var("SYNC_PULSE_MIN_LEN")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.sync_pulse_min_len),

                sync_pulse_max_len: std::env::var("SYNC_PULSE_MAX_LEN")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.sync_pulse_max_len),

                end_pulse_min_len: std::env::var("END_PULSE_MIN_LEN")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.end_pulse_min_len),

                echo_timestamps: std::env::var("ECHO_TIMESTAMPS")
                    .ok()
                    .and_then(|s| s.parse::<u8>().ok())
                    .map(|v| v != 0)
                    .unwrap_or(defaults.echo_timestamps),
            },
        }
    }
}
