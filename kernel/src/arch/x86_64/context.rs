//! x86-64 task context and context switch.
//!
//! The switch is a plain function call at the ABI level: callee-saved
//! registers plus stack pointer, resume address, and RFLAGS are spilled to
//! the outgoing context and loaded from the incoming one. Everything
//! caller-saved is dead across the call by convention, so nothing else
//! needs to move.

use core::arch::global_asm;

/// Saved execution state of a task that is not running. Field order is
/// load-bearing: the assembly below addresses the struct by offset.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Context {
    pub rsp: u64,    // 0x00
    pub rbp: u64,    // 0x08
    pub rbx: u64,    // 0x10
    pub r12: u64,    // 0x18
    pub r13: u64,    // 0x20
    pub r14: u64,    // 0x28
    pub r15: u64,    // 0x30
    pub rip: u64,    // 0x38
    pub rflags: u64, // 0x40
}

/// RFLAGS with IF set: new tasks start with interrupts enabled.
const RFLAGS_IF: u64 = 0x202;

impl Context {
    /// Context that resumes nowhere; placeholder until the first switch
    /// saves real state into it.
    pub const fn empty() -> Self {
        Self {
            rsp: 0,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            rflags: RFLAGS_IF,
        }
    }

    /// Context that launches `entry(arg)` on `stack_top` when restored.
    ///
    /// The entry trampoline moves rbx/r12 into argument registers and
    /// jumps to the shared bootstrap, which runs the entry function and
    /// exits the task if it returns.
    pub fn launching(entry: usize, arg: usize, stack_top: usize) -> Self {
        debug_assert_eq!(stack_top % 16, 0, "kernel stacks are 16-byte aligned");
        Self {
            // Entered by `jmp`, so mimic the post-call alignment state.
            rsp: (stack_top - 8) as u64,
            rbp: 0,
            rbx: entry as u64,
            r12: arg as u64,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: task_entry_trampoline as usize as u64,
            rflags: RFLAGS_IF,
        }
    }
}

global_asm!(
    r#"
    .global context_switch
context_switch:
    // rdi = from (saved), rsi = to (loaded)
    mov rax, [rsp]
    mov [rdi + 0x38], rax       // resume rip = our return address
    lea rax, [rsp + 8]
    mov [rdi + 0x00], rax       // rsp as it will be after ret
    mov [rdi + 0x08], rbp
    mov [rdi + 0x10], rbx
    mov [rdi + 0x18], r12
    mov [rdi + 0x20], r13
    mov [rdi + 0x28], r14
    mov [rdi + 0x30], r15
    pushfq
    pop rax
    mov [rdi + 0x40], rax

    mov rsp, [rsi + 0x00]
    mov rbp, [rsi + 0x08]
    mov rbx, [rsi + 0x10]
    mov r12, [rsi + 0x18]
    mov r13, [rsi + 0x20]
    mov r14, [rsi + 0x28]
    mov r15, [rsi + 0x30]
    push qword ptr [rsi + 0x40]
    popfq
    push qword ptr [rsi + 0x38]
    ret

    .global task_entry_trampoline
task_entry_trampoline:
    mov rdi, rbx
    mov rsi, r12
    jmp task_bootstrap
"#
);

extern "C" {
    /// Save the running state into `from` and resume `to`.
    ///
    /// Must be called with the scheduler lock dropped and interrupts
    /// masked; the incoming RFLAGS decides whether they come back on.
    pub fn context_switch(from: *mut Context, to: *const Context);
    fn task_entry_trampoline();
}
