//! Kernel logging backend for the `log` facade.
//!
//! All subsystems log through the standard `log` macros; this module owns
//! the sink. Records are formatted once, written to the console UART, and
//! copied into a fixed-size, heap-free circular buffer of structured
//! entries so recent history survives for post-mortem inspection. The
//! buffer silently overwrites the oldest entries once full.

use core::{fmt, fmt::Write, sync::atomic::{AtomicU64, Ordering}};

use log::{LevelFilter, Metadata, Record};
use spin::Mutex;

/// Maximum number of log entries the circular buffer can hold.
const LOG_RING_CAPACITY: usize = 256;

/// Maximum length (in bytes) of a formatted message stored in an entry.
const LOG_MESSAGE_MAX_LEN: usize = 128;

/// Maximum length (in bytes) of the target (module path) stored in an entry.
const LOG_TARGET_MAX_LEN: usize = 24;

/// Monotonic sequence number stamped on every record.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// A single structured log entry. All fields are inline fixed-size arrays
/// so the ring never allocates.
#[derive(Clone, Copy)]
pub struct LogEntry {
    pub seq: u64,
    pub level: log::Level,
    target: [u8; LOG_TARGET_MAX_LEN],
    target_len: usize,
    message: [u8; LOG_MESSAGE_MAX_LEN],
    message_len: usize,
}

impl LogEntry {
    fn new(seq: u64, level: log::Level, target: &str, message: &str) -> Self {
        let mut entry = Self {
            seq,
            level,
            target: [0; LOG_TARGET_MAX_LEN],
            target_len: 0,
            message: [0; LOG_MESSAGE_MAX_LEN],
            message_len: 0,
        };
        entry.target_len = copy_truncated(&mut entry.target, target.as_bytes());
        entry.message_len = copy_truncated(&mut entry.message, message.as_bytes());
        entry
    }

    pub fn target(&self) -> &str {
        // Truncation happens on UTF-8 byte boundaries only for ASCII input;
        // lossy fallback keeps this total.
        core::str::from_utf8(&self.target[..self.target_len]).unwrap_or("<bad-utf8>")
    }

    pub fn message(&self) -> &str {
        core::str::from_utf8(&self.message[..self.message_len]).unwrap_or("<bad-utf8>")
    }
}

fn copy_truncated(dst: &mut [u8], src: &[u8]) -> usize {
    let len = src.len().min(dst.len());
    dst[..len].copy_from_slice(&src[..len]);
    len
}

/// Fixed-capacity circular buffer of log entries.
pub struct LogRing {
    entries: [Option<LogEntry>; LOG_RING_CAPACITY],
    /// Index of the next slot to write.
    head: usize,
    /// Number of valid entries (saturates at capacity).
    len: usize,
    /// Total records ever pushed, including overwritten ones.
    total: u64,
}

impl LogRing {
    const fn new() -> Self {
        Self {
            entries: [None; LOG_RING_CAPACITY],
            head: 0,
            len: 0,
            total: 0,
        }
    }

    fn push(&mut self, entry: LogEntry) {
        self.entries[self.head] = Some(entry);
        self.head = (self.head + 1) % LOG_RING_CAPACITY;
        if self.len < LOG_RING_CAPACITY {
            self.len += 1;
        }
        self.total += 1;
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total records ever pushed (monotonic).
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Visit the retained entries oldest-first.
    pub fn for_each<F: FnMut(&LogEntry)>(&self, mut f: F) {
        let start = (self.head + LOG_RING_CAPACITY - self.len) % LOG_RING_CAPACITY;
        for i in 0..self.len {
            if let Some(ref entry) = self.entries[(start + i) % LOG_RING_CAPACITY] {
                f(entry);
            }
        }
    }
}

static LOG_RING: Mutex<LogRing> = Mutex::new(LogRing::new());

/// Borrowed access to the global ring, for diagnostics.
pub fn with_ring<R>(f: impl FnOnce(&LogRing) -> R) -> R {
    crate::arch::without_interrupts(|| f(&LOG_RING.lock()))
}

/// `fmt::Write` sink over a fixed stack buffer, truncating on overflow.
struct FixedWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl fmt::Write for FixedWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let copied = copy_truncated(&mut self.buf[self.len..], s.as_bytes());
        self.len += copied;
        Ok(())
    }
}

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut buf = [0u8; LOG_MESSAGE_MAX_LEN];
        let mut writer = FixedWriter {
            buf: &mut buf,
            len: 0,
        };
        // FixedWriter never reports errors; it truncates instead.
        let _ = write!(writer, "{}", record.args());
        let len = writer.len;
        let message = core::str::from_utf8(&buf[..len]).unwrap_or("<bad-utf8>");

        let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
        let entry = LogEntry::new(seq, record.level(), record.target(), message);
        // The ring is pushed from both task and interrupt context.
        crate::arch::without_interrupts(|| LOG_RING.lock().push(entry));

        crate::println!("[{:>5}] {}: {}", record.level(), record.target(), message);
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the kernel logger. Safe to call once during early boot; a
/// second call is a no-op.
pub fn init(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn ring_retains_in_order() {
        let mut ring = LogRing::new();
        for i in 0..10u64 {
            ring.push(LogEntry::new(i, log::Level::Info, "test", "hello"));
        }
        assert_eq!(ring.len(), 10);
        assert_eq!(ring.total(), 10);

        let mut seqs = alloc::vec::Vec::new();
        ring.for_each(|e| seqs.push(e.seq));
        assert_eq!(seqs, (0..10).collect::<alloc::vec::Vec<_>>());
    }

    #[test]
    fn ring_wraps_and_drops_oldest() {
        let mut ring = LogRing::new();
        let n = (LOG_RING_CAPACITY + 5) as u64;
        for i in 0..n {
            ring.push(LogEntry::new(i, log::Level::Debug, "wrap", "x"));
        }
        assert_eq!(ring.len(), LOG_RING_CAPACITY);
        assert_eq!(ring.total(), n);

        let mut first = None;
        let mut last = None;
        ring.for_each(|e| {
            if first.is_none() {
                first = Some(e.seq);
            }
            last = Some(e.seq);
        });
        assert_eq!(first, Some(5));
        assert_eq!(last, Some(n - 1));
    }

    #[test]
    fn entry_truncates_long_messages() {
        let long = "a".repeat(LOG_MESSAGE_MAX_LEN * 2);
        let entry = LogEntry::new(1, log::Level::Warn, "truncate", &long);
        assert_eq!(entry.message().len(), LOG_MESSAGE_MAX_LEN);
        assert!(entry.message().bytes().all(|b| b == b'a'));
    }
}
