//! PL011 UART driver: the AArch64 console UART.

use core::ptr;

use spin::Mutex;

use crate::devices::{names, Device, DeviceKind, Driver, DriverOps};
use crate::error::{KernelError, KernelResult};
use crate::irq::IrqNumber;

const UARTDR: usize = 0x000;
const UARTFR: usize = 0x018;
const UARTIMSC: usize = 0x038;
const UARTMIS: usize = 0x040;
const UARTICR: usize = 0x044;
const UARTCR: usize = 0x030;

/// Flag register: RX FIFO empty / TX FIFO full.
const FR_RXFE: u32 = 1 << 4;
const FR_TXFF: u32 = 1 << 5;

/// Interrupt bits: receive.
const INT_RX: u32 = 1 << 4;

/// Control: UART enable, TX enable, RX enable.
const CR_UARTEN: u32 = 1 << 0;
const CR_TXE: u32 = 1 << 8;
const CR_RXE: u32 = 1 << 9;

static BASE: Mutex<usize> = Mutex::new(0);

fn base() -> usize {
    *BASE.lock()
}

fn reg_read(offset: usize) -> u32 {
    // SAFETY: the base was taken from the platform device tuple and the
    // window is mapped device-uncached.
    unsafe { ptr::read_volatile((base() + offset) as *const u32) }
}

fn reg_write(offset: usize, value: u32) {
    // SAFETY: as in `reg_read`.
    unsafe { ptr::write_volatile((base() + offset) as *mut u32, value) }
}

fn probe(dev: &mut Device) -> KernelResult<()> {
    let mmio = dev
        .mmio_base
        .ok_or(KernelError::invalid("PL011 device without MMIO base"))?;
    *BASE.lock() = mmio as usize;
    Ok(())
}

fn init(_dev: &mut Device) -> KernelResult<()> {
    // Firmware already set the baud divisors; take over interrupts and
    // enables only.
    reg_write(UARTICR, 0x7FF);
    reg_write(UARTIMSC, INT_RX);
    reg_write(UARTCR, CR_UARTEN | CR_TXE | CR_RXE);
    Ok(())
}

fn start(dev: &mut Device) -> KernelResult<()> {
    let irq = IrqNumber::new(dev.irq.ok_or(KernelError::invalid("PL011 device without IRQ"))?);
    crate::irq::register_irq(irq, rx_handler)?;
    crate::drivers::enable_irq_line(irq);
    crate::drivers::console::attach_uart(names::ARM_PL011, console_tx);
    Ok(())
}

fn console_tx(bytes: &[u8]) {
    for &byte in bytes {
        while reg_read(UARTFR) & FR_TXFF != 0 {
            core::hint::spin_loop();
        }
        reg_write(UARTDR, byte as u32);
    }
}

fn rx_handler(_irq: IrqNumber) {
    while reg_read(UARTFR) & FR_RXFE == 0 {
        crate::drivers::console::push_input(reg_read(UARTDR) as u8);
    }
    reg_write(UARTICR, INT_RX);
}

fn write(_dev: &mut Device, buf: &[u8]) -> KernelResult<usize> {
    for &byte in buf {
        while reg_read(UARTFR) & FR_TXFF != 0 {
            core::hint::spin_loop();
        }
        reg_write(UARTDR, byte as u32);
    }
    Ok(buf.len())
}

fn read(_dev: &mut Device, buf: &mut [u8]) -> KernelResult<usize> {
    let mut n = 0;
    while n < buf.len() && reg_read(UARTFR) & FR_RXFE == 0 {
        buf[n] = reg_read(UARTDR) as u8;
        n += 1;
    }
    Ok(n)
}

fn mis(_dev: &mut Device, _cmd: usize, _arg: usize) -> KernelResult<usize> {
    Ok(reg_read(UARTMIS) as usize)
}

pub static DRIVER: Driver = Driver {
    name: "pl011",
    kind: DeviceKind::Uart,
    match_ids: &[names::ARM_PL011],
    ops: DriverOps {
        probe: Some(probe),
        init: Some(init),
        start: Some(start),
        stop: None,
        cleanup: None,
        read: Some(read),
        write: Some(write),
        ioctl: Some(mis),
    },
};
