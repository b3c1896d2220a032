//! Legacy 8259 PIC pair: the x86 interrupt-controller driver.
//!
//! Remapped so IRQ 0 lands on vector 32. The vector number names the
//! line, so `claim` has nothing to report; EOI and line masking go
//! through the chained pair.

use pic8259::ChainedPics;
use spin::Mutex;

use crate::devices::{names, DeviceKind, Driver, DriverOps};
use crate::drivers::IrqChipOps;
use crate::irq::IrqNumber;

/// Vector base of the primary PIC after remap.
pub const PIC_1_OFFSET: u8 = 32;
/// Vector base of the secondary PIC after remap.
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

// SAFETY: the offsets do not collide with CPU exception vectors.
static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

fn init(_dev: &mut crate::devices::Device) -> crate::error::KernelResult<()> {
    crate::arch::without_interrupts(|| {
        let mut pics = PICS.lock();
        // SAFETY: remaps both PICs to the offsets above; masks preserved.
        unsafe {
            pics.initialize();
            // Everything starts masked; drivers unmask their own lines.
            pics.write_masks(0xFF, 0xFF);
        }
    });
    Ok(())
}

fn start(_dev: &mut crate::devices::Device) -> crate::error::KernelResult<()> {
    crate::drivers::set_irq_chip(IrqChipOps {
        claim: || None,
        complete: eoi,
        enable_line,
        disable_line,
    });
    Ok(())
}

fn eoi(irq: IrqNumber) {
    let mut pics = PICS.lock();
    // SAFETY: acknowledging the vector that just fired.
    unsafe {
        pics.notify_end_of_interrupt(PIC_1_OFFSET + irq.as_u32() as u8);
    }
}

fn enable_line(irq: IrqNumber) {
    set_line_masked(irq, false);
}

fn disable_line(irq: IrqNumber) {
    set_line_masked(irq, true);
}

fn set_line_masked(irq: IrqNumber, masked: bool) {
    let line = irq.as_u32();
    if line >= 16 {
        return;
    }
    crate::arch::without_interrupts(|| {
        let mut pics = PICS.lock();
        // SAFETY: read-modify-write of the interrupt mask registers.
        unsafe {
            let [mut mask1, mut mask2] = pics.read_masks();
            let bit = 1u8 << (line % 8);
            if line < 8 {
                if masked {
                    mask1 |= bit;
                } else {
                    mask1 &= !bit;
                }
                // Cascade line 2 must stay open for the secondary PIC.
                mask1 &= !(1 << 2);
            } else if masked {
                mask2 |= bit;
            } else {
                mask2 &= !bit;
            }
            pics.write_masks(mask1, mask2);
        }
    });
}

pub static DRIVER: Driver = Driver {
    name: "pic8259",
    kind: DeviceKind::InterruptController,
    match_ids: &[names::INTEL_8259],
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
