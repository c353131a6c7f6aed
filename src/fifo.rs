//! Bounded SPSC byte FIFO between the decode thread and a blocking reader
//!
//! The producer side is wait-free on the data path: bytes move through
//! a preallocated ring indexed by two atomic counters, and the only
//! lock involved is a wakeup mutex the consumer holds for the handful
//! of instructions between its empty check and the condvar wait. A
//! record that does not fit whole is dropped, never split and never
//! waited for.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Error returned when a blocking read is cancelled externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("read interrupted")]
pub struct Interrupted;

struct Inner {
    buf: Box<[UnsafeCell<u8>]>,
    /// Position of the next byte to read. Monotonically increasing;
    /// the ring index is `pos % capacity`.
    head: AtomicUsize,
    /// Position of the next byte to write.
    tail: AtomicUsize,
    /// Whole records dropped because the ring was too full.
    dropped: AtomicU64,
    /// Set by an interrupt handle, consumed by the next read.
    interrupted: AtomicBool,
    /// Guards only the consumer's empty-check/wait window.
    wait_lock: Mutex<()>,
    readable: Condvar,
}

// SAFETY: the byte cells are written only by the single Producer at
// positions >= tail and read only by the single Consumer at positions
// < tail; the Release store of `tail` publishes writes before the
// consumer's Acquire load observes them, and symmetrically for `head`.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

impl Inner {
    fn len(&self) -> usize {
        self.tail
            .load(Ordering::Acquire)
            .wrapping_sub(self.head.load(Ordering::Acquire))
    }
}

/// Create a FIFO with room for at least `capacity` bytes and split it
/// into its producer and consumer halves. The capacity is rounded up
/// to a power of two: positions wrap at `usize::MAX`, so the ring
/// length must divide the index space evenly.
pub fn bounded(capacity: usize) -> (Producer, Consumer) {
    assert!(capacity > 0, "FIFO capacity must be non-zero");
    let capacity = capacity.next_power_of_two();
    let buf = (0..capacity)
        .map(|_| UnsafeCell::new(0))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let inner = Arc::new(Inner {
        buf,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        dropped: AtomicU64::new(0),
        interrupted: AtomicBool::new(false),
        wait_lock: Mutex::new(()),
        readable: Condvar::new(),
    });
    (
        Producer {
            inner: inner.clone(),
        },
        Consumer { inner },
    )
}

/// Writing half. Safe to drive from a context that must never block.
pub struct Producer {
    inner: Arc<Inner>,
}

impl Producer {
    /// Copy `bytes` into the FIFO and wake the reader. Returns false
    /// without writing anything if there is not room for all of them.
    pub fn try_push(&self, bytes: &[u8]) -> bool {
        let inner = &*self.inner;
        let head = inner.head.load(Ordering::Acquire);
        let tail = inner.tail.load(Ordering::Relaxed);
        let free = inner.buf.len() - tail.wrapping_sub(head);
        if bytes.len() > free {
            inner.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        for (i, &byte) in bytes.iter().enumerate() {
            let idx = tail.wrapping_add(i) % inner.buf.len();
            // SAFETY: sole producer; these positions are past `tail`,
            // so the consumer will not read them until the store below.
            unsafe { *inner.buf[idx].get() = byte };
        }
        inner.tail.store(tail.wrapping_add(bytes.len()), Ordering::Release);

        // The consumer holds this lock only between its empty check and
        // the wait, so the producer is delayed a bounded few
        // instructions at most.
        let _guard = inner
            .wait_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inner.readable.notify_one();
        true
    }

    /// Number of records dropped so far because the FIFO was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// Reading half.
pub struct Consumer {
    inner: Arc<Inner>,
}

impl Consumer {
    /// Block until at least one byte is available, then copy out up to
    /// `buf.len()` bytes. Reads do not wait for record boundaries;
    /// callers frame on newline.
    pub fn read_blocking(&mut self, buf: &mut [u8]) -> Result<usize, Interrupted> {
        if buf.is_empty() {
            return Ok(0);
        }

        let inner = &*self.inner;
        {
            let mut guard = inner
                .wait_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            loop {
                if inner.len() > 0 {
                    break;
                }
                if inner.interrupted.swap(false, Ordering::AcqRel) {
                    return Err(Interrupted);
                }
                guard = inner
                    .readable
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        let head = inner.head.load(Ordering::Relaxed);
        let tail = inner.tail.load(Ordering::Acquire);
        let avail = tail.wrapping_sub(head);
        let count = avail.min(buf.len());
        for (i, slot) in buf[..count].iter_mut().enumerate() {
            let idx = head.wrapping_add(i) % inner.buf.len();
            // SAFETY: sole consumer; the Acquire load of `tail` above
            // made these bytes visible.
            *slot = unsafe { *inner.buf[idx].get() };
        }
        inner.head.store(head.wrapping_add(count), Ordering::Release);

        Ok(count)
    }

    /// Empty the FIFO. Only valid while the producer is idle; called at
    /// session start before the decode thread runs.
    pub fn reset(&mut self) {
        let inner = &*self.inner;
        inner
            .head
            .store(inner.tail.load(Ordering::Acquire), Ordering::Release);
        inner.interrupted.store(false, Ordering::Release);
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handle for cancelling a blocking read from another context.
    pub fn interrupter(&self) -> ReadInterrupt {
        ReadInterrupt {
            inner: self.inner.clone(),
        }
    }
}

/// Cancels a pending (or the next) blocking read. The flag clears when
/// the failed read returns, so reads are restartable afterwards.
#[derive(Clone)]
pub struct ReadInterrupt {
    inner: Arc<Inner>,
}

impl ReadInterrupt {
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::Release);
        let _guard = self
            .inner
            .wait_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.readable.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_roundtrip_fifo_order() {
        let (producer, mut consumer) = bounded(64);
        assert!(producer.try_push(b"SYNC\n"));
        assert!(producer.try_push(b"0 600\n"));

        let mut buf = [0u8; 64];
        let n = consumer.read_blocking(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"SYNC\n0 600\n");
    }

    #[test]
    fn test_partial_read() {
        let (producer, mut consumer) = bounded(64);
        assert!(producer.try_push(b"ERR_LEVEL\n"));

        let mut buf = [0u8; 4];
        let n = consumer.read_blocking(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ERR_");
        let n = consumer.read_blocking(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"LEVE");
        let n = consumer.read_blocking(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"L\n");
    }

    #[test]
    fn test_overflow_drops_whole_record() {
        let (producer, mut consumer) = bounded(8);
        assert!(producer.try_push(b"END\n"));
        assert!(!producer.try_push(b"ERR_LEN\n"));
        assert_eq!(producer.dropped(), 1);

        // Queued bytes are untouched by the failed push.
        let mut buf = [0u8; 8];
        let n = consumer.read_blocking(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"END\n");

        // Room again once the reader drained.
        assert!(producer.try_push(b"ERR_LEN\n"));
    }

    #[test]
    fn test_wraparound() {
        let (producer, mut consumer) = bounded(8);
        let mut buf = [0u8; 8];

        assert!(producer.try_push(b"abcde"));
        let n = consumer.read_blocking(&mut buf).unwrap();
        assert_eq!(n, 5);

        // This write crosses the end of the ring.
        assert!(producer.try_push(b"fghij"));
        let n = consumer.read_blocking(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"fghij");
    }

    #[test]
    fn test_blocking_read_wakes_on_data() {
        let (producer, mut consumer) = bounded(64);

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            assert!(producer.try_push(b"SYNC\n"));
        });

        let mut buf = [0u8; 64];
        let n = consumer.read_blocking(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"SYNC\n");
        writer.join().unwrap();
    }

    #[test]
    fn test_interrupt_wakes_blocked_reader() {
        let (_producer, mut consumer) = bounded(64);
        let interrupt = consumer.interrupter();

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            interrupt.interrupt();
        });

        let mut buf = [0u8; 64];
        assert_eq!(consumer.read_blocking(&mut buf), Err(Interrupted));
        canceller.join().unwrap();
    }

    #[test]
    fn test_interrupt_is_restartable() {
        let (producer, mut consumer) = bounded(64);
        consumer.interrupter().interrupt();

        let mut buf = [0u8; 64];
        assert_eq!(consumer.read_blocking(&mut buf), Err(Interrupted));

        // The flag cleared on delivery; data flows again.
        assert!(producer.try_push(b"END\n"));
        let n = consumer.read_blocking(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"END\n");
    }

    #[test]
    fn test_data_wins_over_interrupt() {
        let (producer, mut consumer) = bounded(64);
        assert!(producer.try_push(b"SYNC\n"));
        consumer.interrupter().interrupt();

        // Queued data is delivered first; the interrupt hits the
        // following read.
        let mut buf = [0u8; 64];
        let n = consumer.read_blocking(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"SYNC\n");
        assert_eq!(consumer.read_blocking(&mut buf), Err(Interrupted));
    }

    #[test]
    fn test_reset_empties() {
        let (producer, mut consumer) = bounded(64);
        assert!(producer.try_push(b"stale"));
        consumer.reset();
        assert!(consumer.is_empty());

        assert!(producer.try_push(b"fresh"));
        let mut buf = [0u8; 64];
        let n = consumer.read_blocking(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"fresh");
    }

    #[test]
    fn test_many_records_across_threads() {
        let (producer, mut consumer) = bounded(4096);

        let writer = thread::spawn(move || {
            for i in 0..1000u32 {
                let line = format!("1 {}\n", i);
                while !producer.try_push(line.as_bytes()) {
                    thread::yield_now();
                }
            }
        });

        let mut collected = Vec::new();
        let mut buf = [0u8; 128];
        while collected.len() < 1000 {
            let n = consumer.read_blocking(&mut buf).unwrap();
            for &b in &buf[..n] {
                if b == b'\n' {
                    collected.push(());
                }
            }
        }
        writer.join().unwrap();
        assert_eq!(collected.len(), 1000);
    }
}
