//! EL1 exception vector table and the entry/exit paths behind it.
//!
//! The live vectors are the current-EL-with-SPx synchronous and IRQ
//! entries: they save the full interrupted context as an
//! [`ExceptionFrame`], call into Rust, then restore and `eret`. Syscalls
//! arrive here as SVC exceptions, so the frame doubles as the syscall
//! argument/return carrier.
//!
//! Unexpected vectors (lower-EL, SError, FIQ) switch to the dedicated
//! exception stack before logging state and halting, so diagnostics stay
//! trustworthy even when a task stack is what went wrong.

use core::arch::global_asm;

use crate::irq::FaultKind;

/// Dedicated stack for vectors that must not trust the interrupted stack.
const EXCEPTION_STACK_SIZE: usize = 16 * 1024;

#[repr(align(16))]
struct ExceptionStack([u8; EXCEPTION_STACK_SIZE]);

/// Referenced by name from the vector stubs, which run on its top.
#[no_mangle]
static mut EXCEPTION_STACK: ExceptionStack = ExceptionStack([0; EXCEPTION_STACK_SIZE]);

/// Full register state pushed on exception entry. Layout is load-bearing:
/// the vector stubs address it by offset (x0 at 0x00 .. x30 at 0xF0,
/// elr 0xF8, spsr 0x100, esr 0x108, far 0x110, padded to 0x120).
#[repr(C)]
#[derive(Debug, Clone)]
pub struct ExceptionFrame {
    pub x: [u64; 31],
    pub elr: u64,
    pub spsr: u64,
    pub esr: u64,
    pub far: u64,
}

const _: () = assert!(core::mem::size_of::<ExceptionFrame>() == 0x118);

// ESR_EL1 exception classes this kernel distinguishes.
const EC_UNKNOWN: u64 = 0x00;
const EC_SVC64: u64 = 0x15;
const EC_IABT_SAME_EL: u64 = 0x21;
const EC_PC_ALIGN: u64 = 0x22;
const EC_DABT_SAME_EL: u64 = 0x25;
const EC_SP_ALIGN: u64 = 0x26;
const EC_BRK64: u64 = 0x3C;

global_asm!(
    r#"
    .macro SAVE_FRAME
    sub sp, sp, #0x120
    stp x0, x1, [sp, #0x00]
    stp x2, x3, [sp, #0x10]
    stp x4, x5, [sp, #0x20]
    stp x6, x7, [sp, #0x30]
    stp x8, x9, [sp, #0x40]
    stp x10, x11, [sp, #0x50]
    stp x12, x13, [sp, #0x60]
    stp x14, x15, [sp, #0x70]
    stp x16, x17, [sp, #0x80]
    stp x18, x19, [sp, #0x90]
    stp x20, x21, [sp, #0xA0]
    stp x22, x23, [sp, #0xB0]
    stp x24, x25, [sp, #0xC0]
    stp x26, x27, [sp, #0xD0]
    stp x28, x29, [sp, #0xE0]
    str x30, [sp, #0xF0]
    mrs x0, elr_el1
    mrs x1, spsr_el1
    stp x0, x1, [sp, #0xF8]
    mrs x0, esr_el1
    mrs x1, far_el1
    stp x0, x1, [sp, #0x108]
    .endm

    .macro RESTORE_FRAME_ERET
    ldp x0, x1, [sp, #0xF8]
    msr elr_el1, x0
    msr spsr_el1, x1
    ldp x0, x1, [sp, #0x00]
    ldp x2, x3, [sp, #0x10]
    ldp x4, x5, [sp, #0x20]
    ldp x6, x7, [sp, #0x30]
    ldp x8, x9, [sp, #0x40]
    ldp x10, x11, [sp, #0x50]
    ldp x12, x13, [sp, #0x60]
    ldp x14, x15, [sp, #0x70]
    ldp x16, x17, [sp, #0x80]
    ldp x18, x19, [sp, #0x90]
    ldp x20, x21, [sp, #0xA0]
    ldp x22, x23, [sp, #0xB0]
    ldp x24, x25, [sp, #0xC0]
    ldp x26, x27, [sp, #0xD0]
    ldp x28, x29, [sp, #0xE0]
    ldr x30, [sp, #0xF0]
    add sp, sp, #0x120
    eret
    .endm

    // Each vector slot is 0x80 bytes; only a branch lives in the slot,
    // the save/restore bodies sit after the table.
    .macro VECTOR_SLOT target
    .balign 0x80
    b \target
    .endm

    .balign 0x800
    .global exception_vector_table
exception_vector_table:
    // Current EL with SP_EL0
    VECTOR_SLOT el1_unexpected_0
    VECTOR_SLOT el1_unexpected_1
    VECTOR_SLOT el1_unexpected_2
    VECTOR_SLOT el1_unexpected_3

    // Current EL with SP_ELx: the kernel's own vectors
    VECTOR_SLOT el1_sync_entry
    VECTOR_SLOT el1_irq_entry
    VECTOR_SLOT el1_unexpected_6
    VECTOR_SLOT el1_unexpected_7

    // Lower EL, AArch64
    VECTOR_SLOT el1_unexpected_8
    VECTOR_SLOT el1_unexpected_9
    VECTOR_SLOT el1_unexpected_10
    VECTOR_SLOT el1_unexpected_11

    // Lower EL, AArch32
    VECTOR_SLOT el1_unexpected_12
    VECTOR_SLOT el1_unexpected_13
    VECTOR_SLOT el1_unexpected_14
    VECTOR_SLOT el1_unexpected_15

el1_sync_entry:
    SAVE_FRAME
    mov x0, sp
    bl aarch64_sync_handler
    RESTORE_FRAME_ERET

el1_irq_entry:
    SAVE_FRAME
    bl aarch64_irq_handler
    RESTORE_FRAME_ERET

    // Unexpected vectors run on the dedicated exception stack; the
    // interrupted stack is not trusted on these paths.
    .macro UNEXPECTED_BODY name, code
el1_unexpected_\name:
    adrp x0, EXCEPTION_STACK
    add x0, x0, :lo12:EXCEPTION_STACK
    add x0, x0, #0x4000
    mov sp, x0
    mov x0, #\code
    mrs x1, elr_el1
    mrs x2, esr_el1
    mrs x3, far_el1
    b aarch64_unexpected_vector
    .endm

    UNEXPECTED_BODY 0, 0
    UNEXPECTED_BODY 1, 1
    UNEXPECTED_BODY 2, 2
    UNEXPECTED_BODY 3, 3
    UNEXPECTED_BODY 6, 6
    UNEXPECTED_BODY 7, 7
    UNEXPECTED_BODY 8, 8
    UNEXPECTED_BODY 9, 9
    UNEXPECTED_BODY 10, 10
    UNEXPECTED_BODY 11, 11
    UNEXPECTED_BODY 12, 12
    UNEXPECTED_BODY 13, 13
    UNEXPECTED_BODY 14, 14
    UNEXPECTED_BODY 15, 15
"#
);

extern "C" {
    static exception_vector_table: u8;
}

/// Install VBAR_EL1.
pub fn install() {
    // SAFETY: the table above is 2 KiB-aligned and fully populated.
    unsafe {
        let base = core::ptr::addr_of!(exception_vector_table) as u64;
        core::arch::asm!(
            "msr vbar_el1, {base}",
            "isb",
            base = in(reg) base,
        );
    }
}

/// Synchronous exception entry: SVC traps dispatch as syscalls, everything
/// else is a fault.
#[no_mangle]
extern "C" fn aarch64_sync_handler(frame: &mut ExceptionFrame) {
    let ec = (frame.esr >> 26) & 0x3F;
    match ec {
        EC_SVC64 => {
            let nr = frame.x[8] as usize;
            let args = [
                frame.x[0] as usize,
                frame.x[1] as usize,
                frame.x[2] as usize,
                frame.x[3] as usize,
                frame.x[4] as usize,
                frame.x[5] as usize,
            ];
            frame.x[0] = crate::syscall::dispatch(nr, &args) as u64;
        }
        EC_BRK64 => {
            log::warn!("breakpoint at {:#x}", frame.elr);
            frame.elr += 4;
        }
        EC_IABT_SAME_EL | EC_DABT_SAME_EL => {
            let write = frame.esr & (1 << 6) != 0;
            crate::irq::handle_fatal_fault(
                FaultKind::PageFault {
                    addr: frame.far,
                    write,
                },
                frame.elr,
                frame_sp(frame),
                frame.esr,
            );
        }
        EC_PC_ALIGN | EC_SP_ALIGN => {
            crate::irq::handle_fatal_fault(
                FaultKind::Alignment,
                frame.elr,
                frame_sp(frame),
                frame.esr,
            );
        }
        EC_UNKNOWN => {
            crate::irq::handle_fatal_fault(
                FaultKind::UndefinedInstruction,
                frame.elr,
                frame_sp(frame),
                frame.esr,
            );
        }
        _ => {
            crate::irq::handle_fatal_fault(FaultKind::Other, frame.elr, frame_sp(frame), frame.esr);
        }
    }
}

/// SP at the time of the exception: the frame sits right below it.
fn frame_sp(frame: &ExceptionFrame) -> u64 {
    (frame as *const ExceptionFrame as u64) + 0x120
}

/// IRQ entry: the interrupt-controller driver reports the active line,
/// the registry dispatches it, then EOI and an optional reschedule.
#[no_mangle]
extern "C" fn aarch64_irq_handler() {
    crate::drivers::irq_controller_entry();
}

/// Terminal path for vectors the kernel never expects. Logs through the
/// early UART and halts; running on the dedicated exception stack.
#[no_mangle]
extern "C" fn aarch64_unexpected_vector(code: u64, elr: u64, esr: u64, far: u64) -> ! {
    log::error!(
        "unexpected vector {}: elr={:#x} esr={:#x} far={:#x}",
        code,
        elr,
        esr,
        far
    );
    crate::arch::halt()
}
