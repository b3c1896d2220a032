//! Staged kernel bring-up.
//!
//! Ordering is load-bearing: each stage only uses services earlier
//! stages provided. Failures in the boot record, the kernel page
//! tables, or the exception vectors are fatal by policy; everything
//! else degrades with a logged error.

use alloc::sync::Arc;

use crate::bootinfo::{ArchTag, BootInfo};
use crate::devices::Device;
use crate::fs::blockdev::RamDisk;

/// RAM disk geometry: both parameters explicit, no hidden minimum.
const RAMDISK_BLOCKS: u64 = 1024;
const RAMDISK_BLOCK_SIZE: usize = 512;

/// Shell task priority (well above idle).
const SHELL_PRIORITY: u8 = 10;

/// Kernel entry, called from the boot stub with a pointer to the boot
/// record.
pub fn kernel_main(boot_info_ptr: *const u8) -> ! {
    // Stage 1: vectors and the early console. Faults are fatal before
    // this point anyway; after it they are at least diagnosable.
    crate::arch::init_early();
    crate::klog::init(log::LevelFilter::Info);
    log::info!("MiniOS kernel starting");

    // Stage 2: validate the boot record.
    // SAFETY: the boot stub contract delivers a valid record pointer in
    // the entry register.
    let boot = match unsafe { BootInfo::load(boot_info_ptr) } {
        Ok(boot) => boot,
        Err(err) => panic!("boot info rejected: {}", err),
    };
    if boot.arch_tag != ArchTag::native() {
        panic!("boot info arch tag {:?} does not match this kernel", boot.arch_tag);
    }
    log::info!("boot: {}", boot);

    // Stage 3: physical memory.
    // SAFETY: the record was validated and RAM is reachable at its
    // physical addresses until paging switches over.
    let frame_stats = match unsafe { crate::mm::frame::init(&boot) } {
        Ok(stats) => stats,
        Err(err) => panic!("frame allocator init failed: {}", err),
    };
    log::info!(
        "frames: {} total, {} used, {} free",
        frame_stats.total,
        frame_stats.used,
        frame_stats.free
    );

    // Stage 4: kernel address space. A failure here is unrecoverable by
    // policy.
    if let Err(err) = crate::mm::paging::init(&boot) {
        panic!("kernel page tables: {}", err);
    }
    log::info!("paging enabled");
    let heap = crate::mm::heap::stats();
    log::info!("heap arena: {} KiB", heap.capacity / 1024);

    // Stage 5: device model. Drivers first, then the platform tuples;
    // binding walks each device to Active.
    if let Err(err) = crate::drivers::register_all() {
        log::error!("driver registration: {}", err);
    }
    for tuple in crate::arch::platform_devices() {
        let mut device = Device::new(tuple.name, tuple.kind);
        if let Some(base) = tuple.mmio_base {
            device = device.with_mmio(base);
        }
        if let Some(irq) = tuple.irq {
            device = device.with_irq(irq);
        }
        if let Err(err) = crate::devices::register_device(device) {
            log::error!("device {}: {}", tuple.name, err);
        }
    }

    // Stage 6: scheduler; the boot flow of control becomes the idle
    // task.
    if let Err(err) = crate::sched::init() {
        panic!("scheduler init: {}", err);
    }

    // Stage 7: filesystems. Root is RAM-backed and needs no device.
    if let Err(err) = crate::fs::init() {
        log::error!("VFS init: {}", err);
    }

    // Stage 8: block layer. Registered unconditionally; the RAM disk
    // size is exactly blocks * block_size.
    if let Err(err) = crate::fs::blockdev::register(Arc::new(RamDisk::new(
        crate::devices::names::RAMDISK0,
        RAMDISK_BLOCKS,
        RAMDISK_BLOCK_SIZE,
    ))) {
        log::error!("ramdisk: {}", err);
    }

    // Stage 9: first user-facing task. Its fd table arrives pre-wired
    // to the console.
    match crate::sched::create_task(crate::shell::shell_entry, 0, "shell", SHELL_PRIORITY) {
        Ok(pid) => log::info!("shell task created, pid {}", pid),
        Err(err) => log::error!("shell task: {}", err),
    }

    // Stage 10: ticks start preempting as soon as interrupts unmask.
    crate::sched::run()
}
