//! AArch64 HAL: EL1 bring-up, privileged system-register wrappers, and
//! the QEMU virt platform description handed to the device model.

pub mod context;
pub mod serial;
pub mod vectors;

use core::arch::asm;

use cortex_a::asm as cpu;

use crate::arch::{MmioWindow, PlatformDevice};
use crate::devices::DeviceKind;

/// GICv2 distributor base on the QEMU virt machine.
pub const GICD_BASE: u64 = 0x0800_0000;
/// GICv2 CPU interface base on the QEMU virt machine.
pub const GICC_BASE: u64 = 0x0801_0000;
/// Physical generic-timer PPI (INTID 30).
pub const TIMER_PPI: u32 = 30;
/// PL011 SPI on the virt machine (INTID 33 = SPI 1).
pub const PL011_IRQ: u32 = 33;

/// DAIF.I mask bit as exposed through the `daif` register view.
const DAIF_IRQ: u64 = 1 << 7;

#[cfg(target_os = "none")]
pub fn init_early_impl() {
    vectors::install();
}

#[cfg(target_os = "none")]
pub fn irq_disable_impl() -> bool {
    let daif: u64;
    // SAFETY: reading DAIF and masking IRQs has no memory effects.
    unsafe {
        asm!("mrs {0}, daif", out(reg) daif);
        asm!("msr daifset, #2");
    }
    daif & DAIF_IRQ == 0
}

#[cfg(target_os = "none")]
pub fn irq_restore_impl(was_enabled: bool) {
    if was_enabled {
        // SAFETY: unmasking IRQs; the caller saw them enabled before.
        unsafe {
            asm!("msr daifclr, #2");
        }
    }
}

#[cfg(target_os = "none")]
pub fn early_putb_impl(byte: u8) {
    serial::putb(byte);
}

#[cfg(target_os = "none")]
pub fn halt_impl() -> ! {
    // SAFETY: masking all exceptions before parking the hart.
    unsafe {
        asm!("msr daifset, #0xf");
    }
    loop {
        cpu::wfe();
    }
}

#[cfg(target_os = "none")]
pub fn wait_for_interrupt_impl() {
    cpu::wfi();
}

#[cfg(target_os = "none")]
pub fn flush_tlb_page_impl(va: crate::mm::VirtAddr) {
    let page = va.as_u64() >> 12;
    // SAFETY: TLB maintenance for one page plus the barriers the
    // architecture requires around it.
    unsafe {
        asm!(
            "dsb ishst",
            "tlbi vaae1is, {page}",
            "dsb ish",
            "isb",
            page = in(reg) page,
        );
    }
}

/// MAIR_EL1: index 0 = Normal Write-Back, index 1 = Device-nGnRnE.
const MAIR_VALUE: u64 = 0xFF;

/// TCR_EL1: 48-bit VA both halves (T0SZ/T1SZ = 16), 4 KiB granules,
/// inner-shareable write-back walks, 48-bit IPA.
const TCR_VALUE: u64 = (16 << 0)        // T0SZ
    | (0b01 << 8)                        // IRGN0 WB
    | (0b01 << 10)                       // ORGN0 WB
    | (0b11 << 12)                       // SH0 inner
    | (16 << 16)                         // T1SZ
    | (0b01 << 24)                       // IRGN1 WB
    | (0b01 << 26)                       // ORGN1 WB
    | (0b11 << 28)                       // SH1 inner
    | (0b10 << 30)                       // TG1 4K
    | (0b101 << 32); // IPS 48-bit

/// # Safety
///
/// `root` must be a stage-1 table mapping the currently executing code,
/// the stack, and the UART window; the switch runs from identity-mapped
/// code so enabling translation cannot fault the switch itself.
#[cfg(target_os = "none")]
pub unsafe fn install_address_space_impl(root: crate::mm::PhysAddr) {
    let root = root.as_u64();
    // SAFETY: forwarded contract. MAIR/TCR are programmed before the
    // roots, and SCTLR.M is set last behind an ISB.
    unsafe {
        asm!(
            "msr mair_el1, {mair}",
            "msr tcr_el1, {tcr}",
            "msr ttbr0_el1, {root}",
            "msr ttbr1_el1, {root}",
            "dsb ish",
            "isb",
            "mrs {tmp}, sctlr_el1",
            "orr {tmp}, {tmp}, #0x1",        // M: enable translation
            "orr {tmp}, {tmp}, #0x4",        // C: data cache
            "orr {tmp}, {tmp}, #0x1000",     // I: instruction cache
            "msr sctlr_el1, {tmp}",
            "isb",
            mair = in(reg) MAIR_VALUE,
            tcr = in(reg) TCR_VALUE,
            root = in(reg) root,
            tmp = out(reg) _,
        );
    }
}

// Linker-script symbols bracketing the kernel text section.
#[cfg(target_os = "none")]
extern "C" {
    static __text_start: u8;
    static __text_end: u8;
}

#[cfg(target_os = "none")]
pub fn text_size_hint() -> Option<usize> {
    // SAFETY: zero-sized linker markers; only addresses are read.
    unsafe {
        let start = &__text_start as *const u8 as usize;
        let end = &__text_end as *const u8 as usize;
        end.checked_sub(start)
    }
}

#[cfg(target_os = "none")]
pub fn mmio_windows_impl() -> &'static [MmioWindow] {
    &[
        MmioWindow {
            base: GICD_BASE,
            length: 0x1_0000,
        },
        MmioWindow {
            base: GICC_BASE,
            length: 0x1_0000,
        },
        MmioWindow {
            base: serial::PL011_BASE as u64,
            length: 0x1000,
        },
    ]
}

/// Device tuples for the virt machine, in the layout the boot firmware
/// describes. The device model registers them as-is.
#[cfg(target_os = "none")]
pub fn platform_devices_impl() -> &'static [PlatformDevice] {
    &[
        PlatformDevice {
            name: crate::devices::names::ARM_GIC_V2,
            kind: DeviceKind::InterruptController,
            mmio_base: Some(GICD_BASE),
            irq: None,
        },
        PlatformDevice {
            name: crate::devices::names::ARM_GENERIC_TIMER,
            kind: DeviceKind::Timer,
            mmio_base: None,
            irq: Some(TIMER_PPI),
        },
        PlatformDevice {
            name: crate::devices::names::ARM_PL011,
            kind: DeviceKind::Uart,
            mmio_base: Some(serial::PL011_BASE as u64),
            irq: Some(PL011_IRQ),
        },
    ]
}
