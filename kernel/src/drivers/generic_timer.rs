//! ARM generic timer (CNTP) driver: the AArch64 tick source.

use core::arch::asm;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::devices::{names, Device, DeviceKind, Driver, DriverOps};
use crate::drivers::TICK_HZ;
use crate::error::KernelResult;
use crate::irq::IrqNumber;

/// Physical timer PPI on the virt machine.
const TIMER_IRQ: IrqNumber = IrqNumber::new(crate::arch::aarch64::TIMER_PPI);

/// Counter ticks per scheduler tick, derived from CNTFRQ at probe.
static INTERVAL: AtomicU64 = AtomicU64::new(0);

fn counter_freq() -> u64 {
    let freq: u64;
    // SAFETY: CNTFRQ_EL0 is a read-only frequency register.
    unsafe {
        asm!("mrs {0}, cntfrq_el0", out(reg) freq);
    }
    freq
}

fn arm_next_tick() {
    let interval = INTERVAL.load(Ordering::Relaxed);
    // SAFETY: programs the EL1 physical timer compare-down register and
    // leaves the timer enabled with interrupts unmasked.
    unsafe {
        asm!(
            "msr cntp_tval_el0, {interval}",
            "mov {tmp}, #1",
            "msr cntp_ctl_el0, {tmp}",
            interval = in(reg) interval,
            tmp = out(reg) _,
        );
    }
}

fn probe(_dev: &mut Device) -> KernelResult<()> {
    let freq = counter_freq();
    INTERVAL.store(freq / TICK_HZ, Ordering::Relaxed);
    log::debug!("generic timer at {} Hz", freq);
    Ok(())
}

fn start(_dev: &mut Device) -> KernelResult<()> {
    crate::irq::register_irq(TIMER_IRQ, tick_handler)?;
    crate::drivers::enable_irq_line(TIMER_IRQ);
    arm_next_tick();
    Ok(())
}

fn stop(_dev: &mut Device) -> KernelResult<()> {
    // SAFETY: disables the EL1 physical timer.
    unsafe {
        asm!("msr cntp_ctl_el0, xzr");
    }
    Ok(())
}

fn tick_handler(_irq: IrqNumber) {
    arm_next_tick();
    crate::drivers::record_timer_tick();
}

pub static DRIVER: Driver = Driver {
    name: "armv8-timer",
    kind: DeviceKind::Timer,
    match_ids: &[names::ARM_GENERIC_TIMER],
    ops: DriverOps {
        probe: Some(probe),
        init: None,
        start: Some(start),
        stop: Some(stop),
        cleanup: None,
        read: None,
        write: None,
        ioctl: None,
    },
};
