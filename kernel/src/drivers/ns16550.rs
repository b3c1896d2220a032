//! 16550 UART on COM1: the x86 console UART driver.
//!
//! TX rides the same `uart_16550` port the early console uses; RX is
//! interrupt-driven into the console input ring.

use crate::arch::x86_64::{inb, outb, serial};
use crate::devices::{names, Device, DeviceKind, Driver, DriverOps};
use crate::error::KernelResult;
use crate::irq::IrqNumber;

const COM1: u16 = serial::COM1_BASE;

/// Interrupt enable register: bit 0 = received-data-available.
const IER_OFFSET: u16 = 1;
/// Line status register: bit 0 = data ready.
const LSR_OFFSET: u16 = 5;
const LSR_DATA_READY: u8 = 1 << 0;

/// COM1 on PIC line 4.
const COM1_IRQ: IrqNumber = IrqNumber::new(4);

fn probe(_dev: &mut Device) -> KernelResult<()> {
    // Force the lazy port init so line configuration is done.
    lazy_static::initialize(&serial::SERIAL1);
    Ok(())
}

fn init(_dev: &mut Device) -> KernelResult<()> {
    // Enable the received-data interrupt; TX stays polled.
    outb(COM1 + IER_OFFSET, 0x01);
    Ok(())
}

fn start(_dev: &mut Device) -> KernelResult<()> {
    crate::irq::register_irq(COM1_IRQ, rx_handler)?;
    crate::drivers::enable_irq_line(COM1_IRQ);
    crate::drivers::console::attach_uart(names::NS16550, console_tx);
    Ok(())
}

fn console_tx(bytes: &[u8]) {
    let mut port = serial::SERIAL1.lock();
    for &byte in bytes {
        port.send_raw(byte);
    }
}

fn rx_handler(_irq: IrqNumber) {
    while inb(COM1 + LSR_OFFSET) & LSR_DATA_READY != 0 {
        crate::drivers::console::push_input(inb(COM1));
    }
}

fn write(_dev: &mut Device, buf: &[u8]) -> KernelResult<usize> {
    let mut port = serial::SERIAL1.lock();
    for &byte in buf {
        port.send_raw(byte);
    }
    Ok(buf.len())
}

fn read(_dev: &mut Device, buf: &mut [u8]) -> KernelResult<usize> {
    let mut n = 0;
    while n < buf.len() && inb(COM1 + LSR_OFFSET) & LSR_DATA_READY != 0 {
        buf[n] = inb(COM1);
        n += 1;
    }
    Ok(n)
}

pub static DRIVER: Driver = Driver {
    name: "uart16550",
    kind: DeviceKind::Uart,
    match_ids: &[names::NS16550],
    ops: DriverOps {
        probe: Some(probe),
        init: Some(init),
        start: Some(start),
        stop: None,
        cleanup: None,
        read: Some(read),
        write: Some(write),
        ioctl: None,
    },
};
