//! Line-oriented edge source
//!
//! Reads transition lines from a helper process's stdout, a capture
//! file, or stdin. Two line shapes are accepted:
//!
//! ```text
//! <timestamp_us> <level>     e.g. "9000 1"
//! <level>                    e.g. "1", stamped on arrival
//! ```
//!
//! Blank lines and `#` comments are ignored; anything else that fails
//! to parse is counted and dropped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, error, info};

use super::{EdgeEvent, EdgeSource, SourceError};
use crate::clock::{Clock, MonotonicClock};
use crate::pulse::record::Level;

/// Edge events buffered between the reading thread and the decoder.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

enum Input {
    Command { program: String, args: Vec<String> },
    File(PathBuf),
    Stdin,
}

/// Edge source over a line-oriented transition stream.
pub struct LineSource {
    input: Input,
    clock: Arc<dyn Clock>,
    events_delivered: Arc<AtomicU64>,
    events_dropped: Arc<AtomicU64>,
    parse_errors: Arc<AtomicU64>,
}

impl LineSource {
    /// Spawn `program` and read transition lines from its stdout. The
    /// child's stderr is forwarded to the log; the child is killed
    /// when the subscription ends.
    pub fn command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(Input::Command {
            program: program.into(),
            args,
        })
    }

    /// Replay transition lines from a capture file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Input::File(path.into()))
    }

    /// Read transition lines from stdin.
    pub fn stdin() -> Self {
        Self::new(Input::Stdin)
    }

    fn new(input: Input) -> Self {
        Self {
            input,
            clock: Arc::new(MonotonicClock::new()),
            events_delivered: Arc::new(AtomicU64::new(0)),
            events_dropped: Arc::new(AtomicU64::new(0)),
            parse_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replace the arrival-stamping clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    fn spawn_pump<R>(&self, reader: R, tx: Sender<EdgeEvent>, mut child: Option<Child>)
    where
        R: BufRead + Send + 'static,
    {
        let clock = self.clock.clone();
        let delivered = self.events_delivered.clone();
        let dropped = self.events_dropped.clone();
        let parse_errors = self.parse_errors.clone();

        thread::spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Error reading edge source: {}", e);
                        break;
                    }
                };

                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }

                let Some(event) = parse_edge_line(trimmed, clock.now_us()) else {
                    parse_errors.fetch_add(1, Ordering::Relaxed);
                    debug!("Failed to parse edge line: {}", trimmed);
                    continue;
                };

                match tx.try_send(event) {
                    Ok(()) => {
                        delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("Edge channel full, dropping event");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("Edge channel closed, stopping source");
                        break;
                    }
                }
            }

            if let Some(child) = child.as_mut() {
                let _ = child.kill();
                let _ = child.wait();
            }
            info!("Edge source stopped");
        });
    }
}

impl EdgeSource for LineSource {
    fn subscribe(&self) -> Result<Receiver<EdgeEvent>, SourceError> {
        let (tx, rx) = bounded::<EdgeEvent>(EVENT_CHANNEL_CAPACITY);

        match &self.input {
            Input::Command { program, args } => {
                info!("Starting edge source: {} {}", program, args.join(" "));
                let mut child = Command::new(program)
                    .args(args)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()?;

                let stdout = child.stdout.take().ok_or_else(|| {
                    SourceError::Unavailable("failed to capture child stdout".into())
                })?;

                // Forward the child's stderr to the log, as-is.
                if let Some(stderr) = child.stderr.take() {
                    let tag = program.clone();
                    thread::spawn(move || {
                        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                            if !line.trim().is_empty() {
                                info!("[{}] {}", tag, line.trim());
                            }
                        }
                    });
                }

                self.spawn_pump(BufReader::new(stdout), tx, Some(child));
            }
            Input::File(path) => {
                info!("Replaying edge source file: {}", path.display());
                let file = File::open(path)?;
                self.spawn_pump(BufReader::new(file), tx, None);
            }
            Input::Stdin => {
                info!("Reading edge source from stdin");
                self.spawn_pump(BufReader::new(std::io::stdin()), tx, None);
            }
        }

        Ok(rx)
    }
}

/// Parse one transition line. `fallback_us` stamps lines that carry
/// only a level.
fn parse_edge_line(line: &str, fallback_us: u64) -> Option<EdgeEvent> {
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    let second = tokens.next();

    // Trailing garbage is a parse error, not data.
    if tokens.next().is_some() {
        return None;
    }

    let (timestamp_us, level_token) = match second {
        Some(level) => (first.parse::<u64>().ok()?, level),
        None => (fallback_us, first),
    };

    let level = match level_token {
        "0" => Level::Low,
        "1" => Level::High,
        _ => return None,
    };

    Some(EdgeEvent {
        timestamp_us,
        level,
    })
}
