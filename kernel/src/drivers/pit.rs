//! 8253/8254 PIT channel 0: the x86 tick source.

use crate::arch::x86_64::outb;
use crate::devices::{names, DeviceKind, Driver, DriverOps};
use crate::drivers::TICK_HZ;
use crate::irq::IrqNumber;

const PIT_FREQUENCY: u32 = 1_193_182;
const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// Channel 0, lobyte/hibyte access, mode 2 (rate generator).
const PIT_MODE_RATE: u8 = 0x36;

/// PIT fires on PIC line 0.
const PIT_IRQ: IrqNumber = IrqNumber::new(0);

fn init(_dev: &mut crate::devices::Device) -> crate::error::KernelResult<()> {
    let divisor = (PIT_FREQUENCY / TICK_HZ as u32).clamp(1, u16::MAX as u32) as u16;
    outb(PIT_COMMAND, PIT_MODE_RATE);
    outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
    outb(PIT_CHANNEL0, (divisor >> 8) as u8);
    log::debug!("PIT programmed for {} Hz (divisor {})", TICK_HZ, divisor);
    Ok(())
}

fn start(_dev: &mut crate::devices::Device) -> crate::error::KernelResult<()> {
    crate::irq::register_irq(PIT_IRQ, tick_handler)?;
    crate::drivers::enable_irq_line(PIT_IRQ);
    Ok(())
}

fn tick_handler(_irq: IrqNumber) {
    crate::drivers::record_timer_tick();
}

pub static DRIVER: Driver = Driver {
    name: "i8253",
    kind: DeviceKind::Timer,
    match_ids: &[names::I8253_PIT],
    ops: DriverOps {
        probe: None,
        init: Some(init),
        start: Some(start),
        stop: None,
        cleanup: None,
        read: None,
        write: None,
        ioctl: None,
    },
};
