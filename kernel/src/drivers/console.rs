//! Serial console: UART-backed byte stream for the shell and fds 0/1/2.
//!
//! Output goes through the bound UART device with `\n` expanded to
//! `\r\n`; before a UART binds, bytes fall back to the arch early
//! console. Input arrives from the UART RX interrupt into a lock-free
//! single-producer/single-consumer ring; a task blocked on console input
//! is woken when a byte lands.

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicUsize, Ordering},
};

use spin::Once;

/// Input ring capacity. Power of two; one slot stays unused to tell full
/// from empty.
const INPUT_RING_SIZE: usize = 256;

/// Lock-free SPSC byte ring. The producer is the UART RX interrupt, the
/// consumer the task-context reader; each side owns exactly one index.
pub struct ByteRing {
    buf: UnsafeCell<[u8; INPUT_RING_SIZE]>,
    /// Next slot the producer writes.
    head: AtomicUsize,
    /// Next slot the consumer reads.
    tail: AtomicUsize,
    dropped: AtomicUsize,
}

// SAFETY: head/tail are atomics and each byte slot is written only by the
// producer before the head release-store that publishes it.
unsafe impl Sync for ByteRing {}

impl ByteRing {
    pub const fn new() -> Self {
        Self {
            buf: UnsafeCell::new([0; INPUT_RING_SIZE]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Producer side. A full ring drops the byte (and counts it) rather
    /// than blocking interrupt context.
    pub fn push(&self, byte: u8) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) % INPUT_RING_SIZE;
        if next == self.tail.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        // SAFETY: slot `head` is outside the readable region until the
        // store below publishes it, and only this producer writes slots.
        unsafe {
            (*self.buf.get())[head] = byte;
        }
        self.head.store(next, Ordering::Release);
        true
    }

    /// Consumer side.
    pub fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the Acquire load above synchronizes with the producer's
        // Release store, so slot `tail` holds a published byte.
        let byte = unsafe { (*self.buf.get())[tail] };
        self.tail.store((tail + 1) % INPUT_RING_SIZE, Ordering::Release);
        Some(byte)
    }

    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

static INPUT: ByteRing = ByteRing::new();

/// Raw transmit hook installed by the bound UART driver.
pub type ConsoleTx = fn(&[u8]);

/// Name of the bound UART device, for diagnostics.
static CONSOLE_UART: Once<&'static str> = Once::new();

/// Direct transmit path. Deliberately not routed back through the
/// device registry: console output happens while arbitrary kernel locks
/// are held (including the registry's own, during binding), so the hot
/// path must take no lock beyond the UART's.
static CONSOLE_TX: Once<ConsoleTx> = Once::new();

/// Attach the console to a bound, active UART device. The log line goes
/// out first so it still uses the early-console fallback.
pub fn attach_uart(device_name: &'static str, tx: ConsoleTx) {
    log::info!("console attached to {}", device_name);
    CONSOLE_UART.call_once(|| device_name);
    CONSOLE_TX.call_once(|| tx);
}

/// Name of the UART backing the console, if one bound.
pub fn uart_name() -> Option<&'static str> {
    CONSOLE_UART.get().copied()
}

/// Expand `\n` to `\r\n` into `out`, returning the used length. `out`
/// must hold up to `2 * input.len()` bytes.
pub fn translate_newlines(input: &[u8], out: &mut [u8]) -> usize {
    let mut len = 0;
    for &byte in input {
        if byte == b'\n' {
            out[len] = b'\r';
            len += 1;
        }
        out[len] = byte;
        len += 1;
    }
    len
}

/// Write bytes to the console, translating newlines.
pub fn write_bytes(bytes: &[u8]) -> usize {
    let mut chunk = [0u8; 128];
    for piece in bytes.chunks(chunk.len() / 2) {
        let len = translate_newlines(piece, &mut chunk);
        emit(&chunk[..len]);
    }
    bytes.len()
}

#[cfg(target_os = "none")]
fn emit(raw: &[u8]) {
    // Masked so an interrupt handler logging mid-transmit cannot spin
    // on the UART lock the interrupted context holds.
    crate::arch::without_interrupts(|| match CONSOLE_TX.get() {
        Some(tx) => tx(raw),
        None => {
            for &b in raw {
                crate::arch::early_putb(b);
            }
        }
    });
}

#[cfg(not(target_os = "none"))]
fn emit(_raw: &[u8]) {}

/// Called from the UART RX interrupt with each received byte.
pub fn push_input(byte: u8) {
    INPUT.push(byte);
    crate::sched::wake_console_waiters();
}

/// Whether buffered input is available. The scheduler rechecks this
/// with interrupts masked before committing a task to the blocked
/// state, closing the window where a byte lands between poll and block.
pub fn has_input() -> bool {
    !INPUT.is_empty()
}

/// Non-blocking read of buffered input.
pub fn read_available(buf: &mut [u8]) -> usize {
    let mut n = 0;
    while n < buf.len() {
        match INPUT.pop() {
            Some(byte) => {
                buf[n] = byte;
                n += 1;
            }
            None => break,
        }
    }
    n
}

/// Blocking read: returns at least one byte, blocking the calling task
/// until input arrives.
#[cfg(target_os = "none")]
pub fn read_blocking(buf: &mut [u8]) -> usize {
    if buf.is_empty() {
        return 0;
    }
    loop {
        let n = read_available(buf);
        if n > 0 {
            return n;
        }
        crate::sched::block_current_on_console();
    }
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use core::fmt::Write;

    struct ConsoleWriter;

    impl Write for ConsoleWriter {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            write_bytes(s.as_bytes());
            Ok(())
        }
    }

    let _ = ConsoleWriter.write_fmt(args);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn ring_round_trips_in_order() {
        let ring = ByteRing::new();
        for b in 0..100u8 {
            assert!(ring.push(b));
        }
        for b in 0..100u8 {
            assert_eq!(ring.pop(), Some(b));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn full_ring_drops_and_counts() {
        let ring = ByteRing::new();
        let mut accepted = 0;
        for b in 0..=255u8 {
            if ring.push(b) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, INPUT_RING_SIZE - 1);
        assert_eq!(ring.dropped(), 256 - accepted);
        // Consuming one slot makes room for exactly one more.
        assert_eq!(ring.pop(), Some(0));
        assert!(ring.push(0xAA));
        assert!(!ring.push(0xBB));
    }

    #[test]
    fn newline_translation() {
        let mut out = [0u8; 16];
        let n = translate_newlines(b"ab\ncd\n", &mut out);
        assert_eq!(&out[..n], b"ab\r\ncd\r\n");

        let n = translate_newlines(b"plain", &mut out);
        assert_eq!(&out[..n], b"plain");
    }

    #[test]
    fn read_available_drains_pushed_input() {
        push_input(b'h');
        push_input(b'i');
        let mut buf = [0u8; 8];
        let n = read_available(&mut buf);
        assert!(n >= 2);
        let s = &buf[n - 2..n];
        assert_eq!(s, b"hi");
    }
}
