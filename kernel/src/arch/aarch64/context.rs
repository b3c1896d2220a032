//! AArch64 task context and context switch.
//!
//! Callee-saved registers x19-x29 plus SP, the resume address, and DAIF
//! are spilled on switch. A `dmb ish` between save and load makes every
//! write of the outgoing task visible before the incoming one runs.

use core::arch::global_asm;

/// Saved execution state of a task that is not running. Field order is
/// load-bearing: the assembly below addresses the struct by offset.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Context {
    pub x19: u64,  // 0x00
    pub x20: u64,  // 0x08
    pub x21: u64,  // 0x10
    pub x22: u64,  // 0x18
    pub x23: u64,  // 0x20
    pub x24: u64,  // 0x28
    pub x25: u64,  // 0x30
    pub x26: u64,  // 0x38
    pub x27: u64,  // 0x40
    pub x28: u64,  // 0x48
    pub x29: u64,  // 0x50
    pub sp: u64,   // 0x58
    pub pc: u64,   // 0x60
    pub daif: u64, // 0x68
}

impl Context {
    /// Context that resumes nowhere; placeholder until the first switch
    /// saves real state into it.
    pub const fn empty() -> Self {
        Self {
            x19: 0,
            x20: 0,
            x21: 0,
            x22: 0,
            x23: 0,
            x24: 0,
            x25: 0,
            x26: 0,
            x27: 0,
            x28: 0,
            x29: 0,
            sp: 0,
            pc: 0,
            daif: 0,
        }
    }

    /// Context that launches `entry(arg)` on `stack_top` when restored,
    /// with IRQs unmasked.
    pub fn launching(entry: usize, arg: usize, stack_top: usize) -> Self {
        debug_assert_eq!(stack_top % 16, 0, "kernel stacks are 16-byte aligned");
        Self {
            x19: entry as u64,
            x20: arg as u64,
            x21: 0,
            x22: 0,
            x23: 0,
            x24: 0,
            x25: 0,
            x26: 0,
            x27: 0,
            x28: 0,
            x29: 0,
            sp: stack_top as u64,
            pc: task_entry_trampoline as usize as u64,
            daif: 0,
        }
    }
}

global_asm!(
    r#"
    .global context_switch
context_switch:
    // x0 = from (saved), x1 = to (loaded)
    stp x19, x20, [x0, #0x00]
    stp x21, x22, [x0, #0x10]
    stp x23, x24, [x0, #0x20]
    stp x25, x26, [x0, #0x30]
    stp x27, x28, [x0, #0x40]
    str x29, [x0, #0x50]
    mov x9, sp
    str x9, [x0, #0x58]
    str x30, [x0, #0x60]
    mrs x9, daif
    str x9, [x0, #0x68]

    // The outgoing task's writes must be visible to the incoming task.
    dmb ish

    ldp x19, x20, [x1, #0x00]
    ldp x21, x22, [x1, #0x10]
    ldp x23, x24, [x1, #0x20]
    ldp x25, x26, [x1, #0x30]
    ldp x27, x28, [x1, #0x40]
    ldr x29, [x1, #0x50]
    ldr x9, [x1, #0x58]
    mov sp, x9
    ldr x9, [x1, #0x68]
    msr daif, x9
    ldr x30, [x1, #0x60]
    ret

    .global task_entry_trampoline
task_entry_trampoline:
    mov x0, x19
    mov x1, x20
    b task_bootstrap
"#
);

extern "C" {
    /// Save the running state into `from` and resume `to`.
    ///
    /// Must be called with interrupts masked; the incoming DAIF decides
    /// whether they come back on.
    pub fn context_switch(from: *mut Context, to: *const Context);
    fn task_entry_trampoline();
}
