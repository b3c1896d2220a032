//! GICv2 interrupt controller driver (AArch64).
//!
//! Distributor (GICD) routes and masks lines; the CPU interface (GICC)
//! acknowledges them. `claim` reads IAR, so the arch IRQ entry does not
//! need to know which line fired.

use core::ptr;

use spin::Mutex;

use crate::devices::{names, Device, DeviceKind, Driver, DriverOps};
use crate::drivers::IrqChipOps;
use crate::error::{KernelError, KernelResult};
use crate::irq::IrqNumber;

// Distributor register offsets.
const GICD_CTLR: usize = 0x000;
const GICD_TYPER: usize = 0x004;
const GICD_ISENABLER: usize = 0x100;
const GICD_ICENABLER: usize = 0x180;
const GICD_IPRIORITYR: usize = 0x400;
const GICD_ITARGETSR: usize = 0x800;

// CPU interface register offsets.
const GICC_CTLR: usize = 0x000;
const GICC_PMR: usize = 0x004;
const GICC_IAR: usize = 0x00C;
const GICC_EOIR: usize = 0x010;

/// IAR value meaning "nothing pending".
const SPURIOUS_IRQ: u32 = 1023;

/// Default priority for every line (lower value = higher priority).
const DEFAULT_PRIORITY: u8 = 0xA0;

struct Gic {
    gicd: usize,
    gicc: usize,
    lines: u32,
}

static GIC: Mutex<Option<Gic>> = Mutex::new(None);

fn mmio_read(base: usize, offset: usize) -> u32 {
    // SAFETY: callers pass register offsets inside the GIC windows the
    // kernel mapped device-uncached.
    unsafe { ptr::read_volatile((base + offset) as *const u32) }
}

fn mmio_write(base: usize, offset: usize, value: u32) {
    // SAFETY: as in `mmio_read`.
    unsafe { ptr::write_volatile((base + offset) as *mut u32, value) }
}

impl Gic {
    fn new(gicd: usize, gicc: usize) -> Self {
        let typer = mmio_read(gicd, GICD_TYPER);
        let lines = ((typer & 0x1F) + 1) * 32;
        Self { gicd, gicc, lines }
    }

    fn init(&self) {
        mmio_write(self.gicd, GICD_CTLR, 0);

        // Mask everything, default priorities, target CPU 0 for SPIs.
        for i in 0..(self.lines / 32) as usize {
            mmio_write(self.gicd, GICD_ICENABLER + i * 4, 0xFFFF_FFFF);
        }
        let prio = u32::from_le_bytes([DEFAULT_PRIORITY; 4]);
        for i in 0..(self.lines / 4) as usize {
            mmio_write(self.gicd, GICD_IPRIORITYR + i * 4, prio);
        }
        for i in 8..(self.lines / 4) as usize {
            mmio_write(self.gicd, GICD_ITARGETSR + i * 4, 0x0101_0101);
        }

        mmio_write(self.gicd, GICD_CTLR, 1);
        mmio_write(self.gicc, GICC_PMR, 0xFF);
        mmio_write(self.gicc, GICC_CTLR, 1);
    }

    fn enable_line(&self, line: u32) {
        if line < self.lines {
            mmio_write(
                self.gicd,
                GICD_ISENABLER + (line / 32) as usize * 4,
                1 << (line % 32),
            );
        }
    }

    fn disable_line(&self, line: u32) {
        if line < self.lines {
            mmio_write(
                self.gicd,
                GICD_ICENABLER + (line / 32) as usize * 4,
                1 << (line % 32),
            );
        }
    }

    fn claim(&self) -> Option<u32> {
        let iar = mmio_read(self.gicc, GICC_IAR);
        let id = iar & 0x3FF;
        if id == SPURIOUS_IRQ {
            None
        } else {
            Some(id)
        }
    }

    fn complete(&self, line: u32) {
        mmio_write(self.gicc, GICC_EOIR, line);
    }
}

fn with_gic<R>(f: impl FnOnce(&Gic) -> R) -> Option<R> {
    GIC.lock().as_ref().map(f)
}

fn probe(dev: &mut Device) -> KernelResult<()> {
    let gicd = dev
        .mmio_base
        .ok_or(KernelError::invalid("GIC device without MMIO base"))? as usize;
    let gicc = crate::arch::aarch64::GICC_BASE as usize;
    *GIC.lock() = Some(Gic::new(gicd, gicc));
    Ok(())
}

fn init(_dev: &mut Device) -> KernelResult<()> {
    with_gic(|gic| {
        gic.init();
        log::debug!("GICv2: {} interrupt lines", gic.lines);
    })
    .ok_or(KernelError::NotReady)
}

fn start(_dev: &mut Device) -> KernelResult<()> {
    crate::drivers::set_irq_chip(IrqChipOps {
        claim: chip_claim,
        complete: chip_complete,
        enable_line: chip_enable,
        disable_line: chip_disable,
    });
    Ok(())
}

fn chip_claim() -> Option<IrqNumber> {
    with_gic(|gic| gic.claim()).flatten().map(IrqNumber::new)
}

fn chip_complete(irq: IrqNumber) {
    with_gic(|gic| gic.complete(irq.as_u32()));
}

fn chip_enable(irq: IrqNumber) {
    with_gic(|gic| gic.enable_line(irq.as_u32()));
}

fn chip_disable(irq: IrqNumber) {
    with_gic(|gic| gic.disable_line(irq.as_u32()));
}

pub static DRIVER: Driver = Driver {
    name: "gic-v2",
    kind: DeviceKind::InterruptController,
    match_ids: &[names::ARM_GIC_V2],
    ops: DriverOps {
        probe: Some(probe),
        init: Some(init),
        start: Some(start),
        stop: None,
        cleanup: None,
        read: None,
        write: None,
        ioctl: None,
    },
};
