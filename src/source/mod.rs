//! Edge event sources
//!
//! The decoder consumes timestamped transitions of one digital input.
//! Where those transitions come from is behind the [`EdgeSource`]
//! trait: production uses [`LineSource`] over a helper process, a
//! capture file, or stdin; tests feed events through a channel
//! directly.

use crossbeam_channel::Receiver;

use crate::pulse::record::Level;

mod line;

pub use line::LineSource;

/// A single timestamped transition of the monitored input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub timestamp_us: u64,
    pub level: Level,
}

/// Errors surfaced when a source cannot start delivering events.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("edge source unavailable: {0}")]
    Unavailable(String),
    #[error("edge source I/O error")]
    Io(#[from] std::io::Error),
}

/// An edge-event provider.
///
/// `subscribe` starts delivery and hands back the receiving end of a
/// bounded channel; dropping the receiver ends the subscription. A
/// source that cannot start (missing input, spawn failure) fails here,
/// and the caller establishes no session.
pub trait EdgeSource: Send + Sync {
    fn subscribe(&self) -> Result<Receiver<EdgeEvent>, SourceError>;
}
