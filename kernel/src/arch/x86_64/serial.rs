//! COM1 serial port, the early console on x86-64.
//!
//! Uses the `uart_16550` crate against I/O port 0x3F8. The console driver
//! takes over RX/TX once the device model binds it; this path stays
//! available for panics and pre-driver logging.

use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

/// COM1 base I/O port.
pub const COM1_BASE: u16 = 0x3F8;

lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = {
        // SAFETY: 0x3F8 is the standard COM1 port block; nothing else in
        // the kernel drives it outside this mutex.
        let mut serial_port = unsafe { SerialPort::new(COM1_BASE) };
        serial_port.init();
        Mutex::new(serial_port)
    };
}

/// Write one raw byte, interrupt-safe.
pub fn putb(byte: u8) {
    #[cfg(target_os = "none")]
    x86_64::instructions::interrupts::without_interrupts(|| {
        SERIAL1.lock().send_raw(byte);
    });
    #[cfg(not(target_os = "none"))]
    let _ = byte;
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    #[cfg(target_os = "none")]
    {
        use core::fmt::Write;

        x86_64::instructions::interrupts::without_interrupts(|| {
            SERIAL1
                .lock()
                .write_fmt(args)
                .expect("printing to serial failed");
        });
    }
    #[cfg(not(target_os = "none"))]
    let _ = args;
}
