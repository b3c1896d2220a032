// Global Descriptor Table and TSS with the dedicated fault stack

use lazy_static::lazy_static;
use x86_64::{
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector},
        tss::TaskStateSegment,
    },
    VirtAddr,
};

/// IST slot used by fault vectors (page fault, GP, double fault). Running
/// them on their own stack keeps the faulting task's stack intact for
/// diagnostics even when the fault was a stack overflow.
pub const FAULT_IST_INDEX: u16 = 0;

/// Dedicated exception stack size.
const EXCEPTION_STACK_SIZE: usize = 16 * 1024;

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();
        tss.interrupt_stack_table[FAULT_IST_INDEX as usize] = {
            #[repr(align(16))]
            #[allow(dead_code)] // Alignment wrapper -- accessed via raw pointer
            struct AlignedStack([u8; EXCEPTION_STACK_SIZE]);
            static mut EXCEPTION_STACK: AlignedStack = AlignedStack([0; EXCEPTION_STACK_SIZE]);

            let stack_ptr = &raw const EXCEPTION_STACK;
            let stack_start = VirtAddr::from_ptr(stack_ptr);
            stack_start + EXCEPTION_STACK_SIZE as u64
        };
        tss
    };
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.append(Descriptor::kernel_code_segment()); // 0x08
        let data_selector = gdt.append(Descriptor::kernel_data_segment()); // 0x10
        let tss_selector = gdt.append(Descriptor::tss_segment(&TSS)); // 0x18 (2 entries)
        (
            gdt,
            Selectors {
                code_selector,
                data_selector,
                tss_selector,
            },
        )
    };
}

/// GDT layout: null, kernel code (0x08), kernel data (0x10), TSS (0x18).
/// User segments come with ring transitions, which are out of scope.
pub struct Selectors {
    pub code_selector: SegmentSelector,
    pub data_selector: SegmentSelector,
    pub tss_selector: SegmentSelector,
}

pub fn init() {
    use x86_64::instructions::{
        segmentation::{Segment, CS, DS},
        tables::load_tss,
    };

    GDT.0.load();
    // SAFETY: the selectors were computed from the GDT loaded on the line
    // above, so CS/DS/TSS all reference live descriptors.
    unsafe {
        CS::set_reg(GDT.1.code_selector);
        DS::set_reg(GDT.1.data_selector);
        load_tss(GDT.1.tss_selector);
    }
}
