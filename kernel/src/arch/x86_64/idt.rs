// Interrupt Descriptor Table: fault vectors, legacy IRQ vectors, syscall gate

use core::arch::global_asm;

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::irq::{FaultKind, IrqNumber};

/// Vector base the PIC pair is remapped to; IRQ n arrives at vector 32 + n.
pub const IRQ_VECTOR_BASE: u8 = 32;

/// Software-interrupt vector used for system calls.
pub const SYSCALL_VECTOR: u8 = 0x80;

global_asm!(
    r#"
    .global syscall_entry_stub
syscall_entry_stub:
    // Args per the syscall ABI: number in rax, arguments in
    // rdi, rsi, rdx, r10, r8, r9. Spill them as a contiguous vector and
    // hand the dispatcher (number, &args).
    push r9
    push r8
    push r10
    push rdx
    push rsi
    push rdi
    mov rdi, rax
    mov rsi, rsp
    sub rsp, 8
    call x86_syscall_dispatch
    add rsp, 56
    iretq
"#
);

extern "C" {
    fn syscall_entry_stub();
}

/// C-ABI landing point for the syscall stub. Return value travels back in
/// rax through the iretq.
#[no_mangle]
extern "C" fn x86_syscall_dispatch(nr: usize, args: *const usize) -> isize {
    // SAFETY: the stub pushed exactly six argument words at `args`.
    let args = unsafe { core::slice::from_raw_parts(args, 6) };
    let vector = [args[0], args[1], args[2], args[3], args[4], args[5]];
    crate::syscall::dispatch(nr, &vector)
}

macro_rules! hw_irq_handler {
    ($name:ident, $irq:expr) => {
        extern "x86-interrupt" fn $name(_frame: InterruptStackFrame) {
            crate::drivers::irq_entry(IrqNumber::new($irq));
        }
    };
}

hw_irq_handler!(irq0_handler, 0);
hw_irq_handler!(irq1_handler, 1);
hw_irq_handler!(irq2_handler, 2);
hw_irq_handler!(irq3_handler, 3);
hw_irq_handler!(irq4_handler, 4);
hw_irq_handler!(irq5_handler, 5);
hw_irq_handler!(irq6_handler, 6);
hw_irq_handler!(irq7_handler, 7);
hw_irq_handler!(irq8_handler, 8);
hw_irq_handler!(irq9_handler, 9);
hw_irq_handler!(irq10_handler, 10);
hw_irq_handler!(irq11_handler, 11);
hw_irq_handler!(irq12_handler, 12);
hw_irq_handler!(irq13_handler, 13);
hw_irq_handler!(irq14_handler, 14);
hw_irq_handler!(irq15_handler, 15);

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        // SAFETY: FAULT_IST_INDEX names a stack installed in the TSS by
        // gdt::init before the IDT is loaded.
        unsafe {
            idt.page_fault
                .set_handler_fn(page_fault_handler)
                .set_stack_index(super::gdt::FAULT_IST_INDEX);
            idt.general_protection_fault
                .set_handler_fn(general_protection_fault_handler)
                .set_stack_index(super::gdt::FAULT_IST_INDEX);
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(super::gdt::FAULT_IST_INDEX);
        }

        let hw: [extern "x86-interrupt" fn(InterruptStackFrame); 16] = [
            irq0_handler, irq1_handler, irq2_handler, irq3_handler,
            irq4_handler, irq5_handler, irq6_handler, irq7_handler,
            irq8_handler, irq9_handler, irq10_handler, irq11_handler,
            irq12_handler, irq13_handler, irq14_handler, irq15_handler,
        ];
        for (n, handler) in hw.iter().enumerate() {
            idt[IRQ_VECTOR_BASE + n as u8].set_handler_fn(*handler);
        }

        // SAFETY: the stub symbol is defined by the global_asm block above
        // and follows the interrupt-gate entry/exit protocol.
        unsafe {
            idt[SYSCALL_VECTOR]
                .set_handler_addr(x86_64::VirtAddr::new(syscall_entry_stub as usize as u64));
        }
        idt
    };
}

pub fn init() {
    IDT.load();
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    log::warn!("breakpoint at {:#x}", stack_frame.instruction_pointer.as_u64());
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    crate::irq::handle_fatal_fault(
        FaultKind::UndefinedInstruction,
        stack_frame.instruction_pointer.as_u64(),
        stack_frame.stack_pointer.as_u64(),
        0,
    );
}

extern "x86-interrupt" fn alignment_check_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    crate::irq::handle_fatal_fault(
        FaultKind::Alignment,
        stack_frame.instruction_pointer.as_u64(),
        stack_frame.stack_pointer.as_u64(),
        error_code,
    );
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    let addr = x86_64::registers::control::Cr2::read_raw();
    crate::irq::handle_fatal_fault(
        FaultKind::PageFault {
            addr,
            write: error_code.contains(PageFaultErrorCode::CAUSED_BY_WRITE),
        },
        stack_frame.instruction_pointer.as_u64(),
        stack_frame.stack_pointer.as_u64(),
        error_code.bits(),
    );
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    crate::irq::handle_fatal_fault(
        FaultKind::Other,
        stack_frame.instruction_pointer.as_u64(),
        stack_frame.stack_pointer.as_u64(),
        error_code,
    );
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    panic!(
        "double fault (error {:#x})\n{:#?}",
        error_code, stack_frame
    );
}
