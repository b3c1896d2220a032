//! x86-64 HAL: CPU bring-up, privileged-instruction wrappers, platform
//! discovery for the legacy PC devices the kernel drives.

pub mod context;
pub mod gdt;
pub mod idt;
pub mod serial;

#[cfg(target_os = "none")]
use crate::arch::{MmioWindow, PlatformDevice};
#[cfg(target_os = "none")]
use crate::devices::DeviceKind;

/// Install GDT/TSS (with the dedicated fault stack) and the IDT. A failure
/// to get vectors in place is unrecoverable, so this path may panic.
#[cfg(target_os = "none")]
pub fn init_early_impl() {
    gdt::init();
    idt::init();
    // NX is part of the page-attribute contract; turn it on before the
    // kernel tables are installed.
    use x86_64::registers::model_specific::{Efer, EferFlags};
    // SAFETY: enabling NXE only affects interpretation of PTE bit 63,
    // which the paging code sets consistently.
    unsafe {
        Efer::update(|flags| flags.insert(EferFlags::NO_EXECUTE_ENABLE));
    }
}

#[cfg(target_os = "none")]
pub fn irq_disable_impl() -> bool {
    use x86_64::instructions::interrupts;
    let was_enabled = interrupts::are_enabled();
    interrupts::disable();
    was_enabled
}

#[cfg(target_os = "none")]
pub fn irq_restore_impl(was_enabled: bool) {
    if was_enabled {
        x86_64::instructions::interrupts::enable();
    }
}

#[cfg(target_os = "none")]
pub fn early_putb_impl(byte: u8) {
    serial::putb(byte);
}

#[cfg(target_os = "none")]
pub fn halt_impl() -> ! {
    x86_64::instructions::interrupts::disable();
    loop {
        x86_64::instructions::hlt();
    }
}

#[cfg(target_os = "none")]
pub fn wait_for_interrupt_impl() {
    x86_64::instructions::hlt();
}

#[cfg(target_os = "none")]
pub fn flush_tlb_page_impl(va: crate::mm::VirtAddr) {
    x86_64::instructions::tlb::flush(x86_64::VirtAddr::new(va.as_u64()));
}

/// # Safety
///
/// `root` must be the frame of a PML4 that maps the currently executing
/// code and stack.
#[cfg(target_os = "none")]
pub unsafe fn install_address_space_impl(root: crate::mm::PhysAddr) {
    use x86_64::{
        registers::control::{Cr3, Cr3Flags},
        structures::paging::PhysFrame,
        PhysAddr,
    };
    let frame = PhysFrame::containing_address(PhysAddr::new(root.as_u64()));
    // SAFETY: forwarded contract; the caller built a PML4 covering the
    // kernel image and stacks.
    unsafe {
        Cr3::write(frame, Cr3Flags::empty());
    }
}

// Linker-script symbols bracketing the kernel text section. The boot link
// places text first in the image, so `__text_end - __text_start` is the
// executable prefix the W^X mapping keeps read-only.
#[cfg(target_os = "none")]
extern "C" {
    static __text_start: u8;
    static __text_end: u8;
}

#[cfg(target_os = "none")]
pub fn text_size_hint() -> Option<usize> {
    // SAFETY: the symbols are zero-sized markers emitted by the linker;
    // only their addresses are read.
    unsafe {
        let start = &__text_start as *const u8 as usize;
        let end = &__text_end as *const u8 as usize;
        end.checked_sub(start)
    }
}

/// x86 legacy devices sit behind port I/O, so the kernel page tables need
/// no extra MMIO windows.
#[cfg(target_os = "none")]
pub fn mmio_windows_impl() -> &'static [MmioWindow] {
    &[]
}

/// Well-known legacy PC hardware, synthesized rather than discovered.
#[cfg(target_os = "none")]
pub fn platform_devices_impl() -> &'static [PlatformDevice] {
    &[
        PlatformDevice {
            name: crate::devices::names::INTEL_8259,
            kind: DeviceKind::InterruptController,
            mmio_base: None,
            irq: None,
        },
        PlatformDevice {
            name: crate::devices::names::I8253_PIT,
            kind: DeviceKind::Timer,
            mmio_base: None,
            irq: Some(0),
        },
        PlatformDevice {
            name: crate::devices::names::NS16550,
            kind: DeviceKind::Uart,
            mmio_base: None,
            irq: Some(4),
        },
    ]
}

/// Read one byte from an I/O port.
#[cfg(target_os = "none")]
pub fn inb(port: u16) -> u8 {
    use x86_64::instructions::port::Port;
    let mut p: Port<u8> = Port::new(port);
    // SAFETY: callers name fixed legacy ports owned by their driver.
    unsafe { p.read() }
}

/// Write one byte to an I/O port.
#[cfg(target_os = "none")]
pub fn outb(port: u16, value: u8) {
    use x86_64::instructions::port::Port;
    let mut p: Port<u8> = Port::new(port);
    // SAFETY: callers name fixed legacy ports owned by their driver.
    unsafe { p.write(value) }
}
