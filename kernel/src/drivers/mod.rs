//! Concrete drivers and the glue between hardware interrupts and the
//! dispatch framework.
//!
//! Drivers bind to devices through the device model by canonical name.
//! The bound interrupt-controller driver installs an [`IrqChipOps`]
//! record here; the arch interrupt entry funnels through [`irq_entry`] /
//! [`irq_controller_entry`], which consult the chip, dispatch, send EOI,
//! and honor a pending reschedule on the way out.

pub mod console;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub mod generic_timer;
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub mod gic;
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub mod pl011;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod ns16550;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod pic;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod pit;

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Once;

use crate::irq::IrqNumber;

/// Scheduler tick rate. 100 Hz makes one tick 10 ms, so the default
/// quantum is a single tick.
pub const TICK_HZ: u64 = 100;

/// Milliseconds per tick.
pub const TICK_MS: u64 = 1000 / TICK_HZ;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Monotonic timer ticks since boot.
pub fn timer_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Called by the bound timer driver's interrupt handler, once per tick.
pub fn record_timer_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    crate::sched::timer_tick();
}

/// Interrupt-controller operations installed by the bound controller
/// driver. Written once before interrupts are enabled, then read-only,
/// so IRQ context reads race-free.
pub struct IrqChipOps {
    /// Report the active interrupt, acknowledging it at the controller.
    /// Controllers whose architecture encodes the line in the vector
    /// (8259) return `None` and the arch entry passes the line in.
    pub claim: fn() -> Option<IrqNumber>,
    /// Signal end-of-interrupt.
    pub complete: fn(IrqNumber),
    /// Unmask a line at the controller.
    pub enable_line: fn(IrqNumber),
    /// Mask a line at the controller.
    pub disable_line: fn(IrqNumber),
}

static IRQ_CHIP: Once<IrqChipOps> = Once::new();

/// Install the interrupt-controller operations. First caller wins; the
/// platform has exactly one controller.
pub fn set_irq_chip(ops: IrqChipOps) {
    IRQ_CHIP.call_once(|| ops);
}

/// Unmask an interrupt line at the controller.
pub fn enable_irq_line(irq: IrqNumber) {
    if let Some(chip) = IRQ_CHIP.get() {
        (chip.enable_line)(irq);
    }
}

/// Entry for architectures whose vector number names the IRQ (x86 PIC):
/// dispatch, EOI, then reschedule if the handler asked for it.
pub fn irq_entry(irq: IrqNumber) {
    crate::irq::dispatch(irq);
    if let Some(chip) = IRQ_CHIP.get() {
        (chip.complete)(irq);
    }
    if crate::irq::take_reschedule_request() {
        crate::sched::preempt();
    }
}

/// Entry for architectures where the controller reports the active IRQ
/// (GIC): claim lines until none is pending, then reschedule if asked.
pub fn irq_controller_entry() {
    if let Some(chip) = IRQ_CHIP.get() {
        while let Some(irq) = (chip.claim)() {
            crate::irq::dispatch(irq);
            (chip.complete)(irq);
        }
    }
    if crate::irq::take_reschedule_request() {
        crate::sched::preempt();
    }
}

/// Register every driver for the compiled architecture with the device
/// model, before platform devices are registered.
#[cfg(target_os = "none")]
pub fn register_all() -> crate::error::KernelResult<()> {
    #[cfg(target_arch = "aarch64")]
    {
        crate::devices::register_driver(&gic::DRIVER)?;
        crate::devices::register_driver(&generic_timer::DRIVER)?;
        crate::devices::register_driver(&pl011::DRIVER)?;
    }
    #[cfg(target_arch = "x86_64")]
    {
        crate::devices::register_driver(&pic::DRIVER)?;
        crate::devices::register_driver(&pit::DRIVER)?;
        crate::devices::register_driver(&ns16550::DRIVER)?;
    }
    Ok(())
}
