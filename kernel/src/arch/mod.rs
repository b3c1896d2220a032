//! Architecture HAL.
//!
//! Exactly one of the submodules is compiled in; this module re-exports
//! the uniform surface the rest of the kernel programs against. On the
//! host target (unit tests) the interrupt-masking helpers degrade to
//! plain calls so architecture-independent code runs unchanged.

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use aarch64 as native;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
use x86_64 as native;

pub mod context;

use crate::bootinfo::MemoryRegion;
use crate::mm::FRAME_SIZE;

/// A physical MMIO range the kernel page tables must map uncached.
#[derive(Debug, Clone, Copy)]
pub struct MmioWindow {
    pub base: u64,
    pub length: u64,
}

/// A device tuple reported by platform discovery. The device model
/// registers these verbatim; how they are produced is arch business.
#[derive(Debug, Clone, Copy)]
pub struct PlatformDevice {
    pub name: &'static str,
    pub kind: crate::devices::DeviceKind,
    pub mmio_base: Option<u64>,
    pub irq: Option<u32>,
}

/// Run `f` with interrupts masked, restoring the prior mask state after.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    #[cfg(target_os = "none")]
    {
        let prev = irq_disable();
        let result = f();
        irq_restore(prev);
        result
    }
    #[cfg(not(target_os = "none"))]
    {
        f()
    }
}

/// Mask interrupts, returning whether they were previously enabled.
#[cfg(target_os = "none")]
pub fn irq_disable() -> bool {
    native::irq_disable_impl()
}

/// Restore the interrupt mask captured by [`irq_disable`].
#[cfg(target_os = "none")]
pub fn irq_restore(was_enabled: bool) {
    native::irq_restore_impl(was_enabled)
}

/// Unmask interrupts. Used once bring-up is far enough to take them.
#[cfg(target_os = "none")]
pub fn enable_interrupts() {
    native::irq_restore_impl(true)
}

/// Early, pre-driver console byte output for panics and the log backend
/// before the UART driver binds.
#[cfg(target_os = "none")]
pub fn early_putb(byte: u8) {
    native::early_putb_impl(byte)
}

/// Stop the hart permanently.
#[cfg(target_os = "none")]
pub fn halt() -> ! {
    native::halt_impl()
}

/// Idle until the next interrupt.
#[cfg(target_os = "none")]
pub fn wait_for_interrupt() {
    native::wait_for_interrupt_impl()
}

/// Install exception vectors and the early console. Must run before
/// anything can fault; panics are fatal here by design.
#[cfg(target_os = "none")]
pub fn init_early() {
    native::init_early_impl()
}

/// Invalidate the local TLB entry for `va`.
#[cfg(target_os = "none")]
pub fn flush_tlb_page(va: crate::mm::VirtAddr) {
    native::flush_tlb_page_impl(va)
}

/// Make `root` the active translation root.
///
/// # Safety
///
/// The instruction performing the switch must execute from a region the
/// new tables also map; the caller guarantees the new space covers the
/// kernel image and the current stack.
#[cfg(target_os = "none")]
pub unsafe fn install_address_space(root: crate::mm::PhysAddr) {
    // SAFETY: forwarded contract.
    unsafe { native::install_address_space_impl(root) }
}

/// Split of the kernel image into (text pages, total pages) for the W^X
/// mapping policy. Uses the linker-provided text end when the image was
/// linked with one; otherwise the whole image counts as text.
pub fn kernel_image_split(img: &MemoryRegion) -> (usize, usize) {
    let total = (img.length as usize).div_ceil(FRAME_SIZE);
    #[cfg(target_os = "none")]
    {
        let text = native::text_size_hint()
            .map(|bytes| bytes.div_ceil(FRAME_SIZE).min(total))
            .unwrap_or(total);
        (text, total)
    }
    #[cfg(not(target_os = "none"))]
    {
        (total, total)
    }
}

/// MMIO ranges the kernel address space must map device-uncached.
#[cfg(target_os = "none")]
pub fn mmio_windows() -> &'static [MmioWindow] {
    native::mmio_windows_impl()
}

/// Device tuples for the device model to register.
#[cfg(target_os = "none")]
pub fn platform_devices() -> &'static [PlatformDevice] {
    native::platform_devices_impl()
}
