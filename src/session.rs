//! Reader session and single-owner lifecycle guard
//!
//! A `PulseDevice` hands out at most one `Session` at a time. Opening
//! subscribes to the edge source, resets a fresh record FIFO, and
//! spawns the decode thread; dropping the session stops the thread,
//! ends the subscription, and makes the device available again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

use crate::fifo::{self, Consumer, Interrupted, Producer, ReadInterrupt};
use crate::pulse::decoder::PulseDecoder;
use crate::pulse::record::Record;
use crate::pulse::thresholds::Thresholds;
use crate::source::{EdgeEvent, EdgeSource, SourceError};

/// Errors from `PulseDevice::open`.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// Another session is active.
    #[error("device busy")]
    Busy,
    /// The edge source could not start; no session was established and
    /// the device stays available for a retry.
    #[error("failed to subscribe to edge source")]
    Subscribe(#[from] SourceError),
}

/// Decode-side counters, shared for the lifetime of the device.
#[derive(Debug, Default)]
pub struct DecodeStats {
    pub edges_processed: AtomicU64,
    pub records_emitted: AtomicU64,
    pub records_dropped: AtomicU64,
    pub sync_records: AtomicU64,
    pub data_records: AtomicU64,
    pub end_records: AtomicU64,
    pub length_errors: AtomicU64,
    pub level_errors: AtomicU64,
}

impl DecodeStats {
    fn record(&self, record: &Record) {
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
        let counter = match record {
            Record::Sync => &self.sync_records,
            Record::Data { .. } => &self.data_records,
            Record::End => &self.end_records,
            Record::ErrLen => &self.length_errors,
            Record::ErrLevel => &self.level_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The capture device: edge source, thresholds, stats, and the
/// exclusive-access guard.
pub struct PulseDevice {
    source: Arc<dyn EdgeSource>,
    thresholds: Arc<Thresholds>,
    stats: Arc<DecodeStats>,
    available: Arc<AtomicBool>,
    fifo_capacity: usize,
}

impl PulseDevice {
    pub fn new(
        source: Arc<dyn EdgeSource>,
        thresholds: Arc<Thresholds>,
        fifo_capacity: usize,
    ) -> Self {
        Self {
            source,
            thresholds,
            stats: Arc::new(DecodeStats::default()),
            available: Arc::new(AtomicBool::new(true)),
            fifo_capacity,
        }
    }

    pub fn stats(&self) -> &Arc<DecodeStats> {
        &self.stats
    }

    pub fn thresholds(&self) -> &Arc<Thresholds> {
        &self.thresholds
    }

    /// Open the device. Fails fast with `Busy` while another session
    /// is active.
    pub fn open(&self) -> Result<Session, OpenError> {
        if self
            .available
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(OpenError::Busy);
        }

        let events = match self.source.subscribe() {
            Ok(rx) => rx,
            Err(e) => {
                self.available.store(true, Ordering::Release);
                return Err(OpenError::Subscribe(e));
            }
        };

        let (producer, mut consumer) = fifo::bounded(self.fifo_capacity);
        consumer.reset();

        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let thresholds = self.thresholds.clone();
            let stats = self.stats.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("pulse-decode".to_string())
                .spawn(move || decode_loop(events, producer, thresholds, stats, running))
                .map_err(|e| {
                    self.available.store(true, Ordering::Release);
                    OpenError::Subscribe(SourceError::Io(e))
                })?
        };

        info!("Session opened");
        Ok(Session {
            consumer,
            running,
            handle: Some(handle),
            available: self.available.clone(),
        })
    }
}

/// The decode context: drains edge events, runs the state machine, and
/// pushes encoded records into the FIFO. Never blocks on the reader
/// and never allocates per record.
fn decode_loop(
    events: Receiver<EdgeEvent>,
    records: Producer,
    thresholds: Arc<Thresholds>,
    stats: Arc<DecodeStats>,
    running: Arc<AtomicBool>,
) {
    let mut decoder = PulseDecoder::new();

    while running.load(Ordering::SeqCst) {
        // The timeout only bounds how long a stop request can go
        // unnoticed; it is not a data timeout.
        let event = match events.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Edge source disconnected");
                break;
            }
        };

        stats.edges_processed.fetch_add(1, Ordering::Relaxed);
        let th = thresholds.snapshot();
        let echo = th.echo_timestamps.then_some(event.timestamp_us);

        for record in decoder.on_edge(event.timestamp_us, event.level, &th) {
            stats.record(&record);
            let line = record.encode(echo);
            if !records.try_push(line.as_bytes()) {
                stats.records_dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Record FIFO full, dropping record");
            }
        }
    }
}

/// An open capture session. Reading blocks until decoded bytes are
/// available; dropping the session closes the device.
pub struct Session {
    consumer: Consumer,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    available: Arc<AtomicBool>,
}

impl Session {
    /// Blocking read of up to `buf.len()` decoded bytes. Records are
    /// newline-framed; a read may end mid-record.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Interrupted> {
        self.consumer.read_blocking(buf)
    }

    /// Handle for cancelling a blocked read from another context.
    pub fn interrupter(&self) -> ReadInterrupt {
        self.consumer.interrupter()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.available.store(true, Ordering::Release);
        info!("Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulse::record::Level;
    use crossbeam_channel::Sender;
    use std::sync::Mutex;

    /// Edge source backed by a plain channel, so tests can feed edges
    /// by hand.
    struct TestSource {
        feeder: Mutex<Option<Sender<EdgeEvent>>>,
        fail: bool,
    }

    impl TestSource {
        fn failing() -> Arc<Self> {
            Arc::new(Self {
                feeder: Mutex::new(None),
                fail: true,
            })
        }
    }

    impl EdgeSource for TestSource {
        fn subscribe(&self) -> Result<Receiver<EdgeEvent>, SourceError> {
            if self.fail {
                return Err(SourceError::Unavailable("test source down".into()));
            }
            let (tx, rx) = crossbeam_channel::bounded(64);
            let mut feeder = self.feeder.lock().unwrap();
            *feeder = Some(tx);
            Ok(rx)
        }
    }

    fn edge(ts: u64, level: Level) -> EdgeEvent {
        EdgeEvent {
            timestamp_us: ts,
            level,
        }
    }

    fn read_until(session: &mut Session, wanted: &str) -> String {
        let mut collected = String::new();
        let mut buf = [0u8; 256];
        while !collected.contains(wanted) {
            let n = session.read(&mut buf).unwrap();
            collected.push_str(std::str::from_utf8(&buf[..n]).unwrap());
        }
        collected
    }

    #[test]
    fn test_end_to_end_frame() {
        let source = Arc::new(TestSource {
            feeder: Mutex::new(None),
            fail: false,
        });
        let thresholds = Arc::new(Thresholds::default());
        thresholds.set("echo_timestamps", 0);
        let device = PulseDevice::new(source.clone(), thresholds, 4096);

        let mut session = device.open().unwrap();
        let feeder = source.feeder.lock().unwrap().clone().unwrap();

        feeder.send(edge(0, Level::Low)).unwrap();
        feeder.send(edge(9000, Level::High)).unwrap();
        feeder.send(edge(9600, Level::Low)).unwrap();
        feeder.send(edge(10_200, Level::High)).unwrap();
        feeder.send(edge(21_000, Level::Low)).unwrap();

        let output = read_until(&mut session, "END\n");
        assert_eq!(
            output,
            "SYNC\n1 9000\n0 600\n1 600\n0 10800\nEND\n"
        );

        let stats = device.stats();
        assert_eq!(stats.sync_records.load(Ordering::Relaxed), 1);
        assert_eq!(stats.end_records.load(Ordering::Relaxed), 1);
        assert_eq!(stats.data_records.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_timestamp_echo() {
        let source = Arc::new(TestSource {
            feeder: Mutex::new(None),
            fail: false,
        });
        let device = PulseDevice::new(source.clone(), Arc::new(Thresholds::default()), 4096);

        let mut session = device.open().unwrap();
        let feeder = source.feeder.lock().unwrap().clone().unwrap();

        feeder.send(edge(0, Level::Low)).unwrap();
        feeder.send(edge(9000, Level::High)).unwrap();

        let output = read_until(&mut session, "9000 SYNC\n");
        assert!(output.starts_with("9000 SYNC\n"));
    }

    #[test]
    fn test_second_open_is_busy() {
        let source = Arc::new(TestSource {
            feeder: Mutex::new(None),
            fail: false,
        });
        let device = PulseDevice::new(source, Arc::new(Thresholds::default()), 4096);

        let _session = device.open().unwrap();
        assert!(matches!(device.open(), Err(OpenError::Busy)));
    }

    #[test]
    fn test_close_releases_device() {
        let source = Arc::new(TestSource {
            feeder: Mutex::new(None),
            fail: false,
        });
        let device = PulseDevice::new(source, Arc::new(Thresholds::default()), 4096);

        let session = device.open().unwrap();
        drop(session);
        assert!(device.open().is_ok());
    }

    #[test]
    fn test_subscribe_failure_keeps_device_available() {
        let device = PulseDevice::new(
            TestSource::failing(),
            Arc::new(Thresholds::default()),
            4096,
        );

        assert!(matches!(device.open(), Err(OpenError::Subscribe(_))));
        // The failed open released the guard; only the source is broken.
        assert!(matches!(device.open(), Err(OpenError::Subscribe(_))));
    }

    #[test]
    fn test_interrupt_unblocks_read() {
        let source = Arc::new(TestSource {
            feeder: Mutex::new(None),
            fail: false,
        });
        let device = PulseDevice::new(source, Arc::new(Thresholds::default()), 4096);

        let mut session = device.open().unwrap();
        let interrupt = session.interrupter();

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            interrupt.interrupt();
        });

        let mut buf = [0u8; 64];
        assert_eq!(session.read(&mut buf), Err(Interrupted));
        canceller.join().unwrap();
    }
}
