//! MiniOS kernel library.
//!
//! A small educational kernel for AArch64 and x86-64. On bare metal
//! (`target_os = "none"`) this crate is the kernel; on the host target
//! the same sources compile against `std` so the architecture-neutral
//! core is testable with the standard harness.

#![no_std]
#![cfg_attr(target_arch = "x86_64", feature(abi_x86_interrupt))]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

extern crate alloc;

// Host target: the standard library provides the allocator and unwinder
// for unit tests.
#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod bootinfo;
pub mod devices;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod irq;
pub mod klog;
pub mod mm;
pub mod sched;
pub mod syscall;

#[cfg(target_os = "none")]
pub mod init;
#[cfg(target_os = "none")]
pub mod shell;

/// Format panic diagnostics straight through the early console, past
/// any lock the panicking context may hold.
#[cfg(target_os = "none")]
pub fn panic_print(info: &core::panic::PanicInfo) {
    #[cfg(target_arch = "x86_64")]
    arch::x86_64::serial::_print(format_args!("\n[PANIC] {}\n", info));
    #[cfg(target_arch = "aarch64")]
    arch::aarch64::serial::_print(format_args!("\n[PANIC] {}\n", info));
}

/// Heap exhaustion inside `alloc` has no recovery path in a kernel.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("kernel heap exhausted allocating {:?}", layout);
}
