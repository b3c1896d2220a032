//! Exception and interrupt dispatch framework.
//!
//! The architecture layer owns the vector table and the raw entry/exit
//! paths; this module owns everything after decode: the fixed-size IRQ
//! handler registry, the reschedule request flag, and the policy for
//! synchronous faults. Handlers run on the dedicated per-CPU exception
//! stack the arch entry switched to, never on a task's kernel stack.

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

/// Architecture-independent IRQ number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqNumber(pub u32);

impl IrqNumber {
    pub const fn new(irq: u32) -> Self {
        Self(irq)
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for IrqNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "IRQ#{}", self.0)
    }
}

/// Handler invoked with the IRQ number that fired.
pub type IrqHandler = fn(IrqNumber);

/// Number of IRQ lines the fixed dispatch table covers.
pub const MAX_IRQ: usize = 256;

/// Fixed-size registry: at most one handler per line.
struct HandlerTable {
    handlers: [Option<IrqHandler>; MAX_IRQ],
    dispatched: u64,
    spurious: u64,
}

impl HandlerTable {
    const fn new() -> Self {
        Self {
            handlers: [None; MAX_IRQ],
            dispatched: 0,
            spurious: 0,
        }
    }
}

static HANDLERS: Mutex<HandlerTable> = Mutex::new(HandlerTable::new());

/// Set by handlers (the timer) to request that exception exit routes
/// through the scheduler instead of a direct context restore.
static RESCHEDULE_PENDING: AtomicBool = AtomicBool::new(false);

/// Register `handler` for line `irq`. Fails if the line is out of range or
/// already taken; the prior handler must be unregistered first.
pub fn register_irq(irq: IrqNumber, handler: IrqHandler) -> KernelResult<()> {
    let index = irq.as_u32() as usize;
    if index >= MAX_IRQ {
        return Err(KernelError::invalid("IRQ number out of range"));
    }
    crate::arch::without_interrupts(|| {
        let mut table = HANDLERS.lock();
        if table.handlers[index].is_some() {
            return Err(KernelError::AlreadyExists);
        }
        table.handlers[index] = Some(handler);
        Ok(())
    })
}

/// Remove the handler for line `irq`, if any.
pub fn unregister_irq(irq: IrqNumber) -> KernelResult<()> {
    let index = irq.as_u32() as usize;
    if index >= MAX_IRQ {
        return Err(KernelError::invalid("IRQ number out of range"));
    }
    crate::arch::without_interrupts(|| {
        let mut table = HANDLERS.lock();
        if table.handlers[index].take().is_none() {
            return Err(KernelError::NoSuchDevice);
        }
        Ok(())
    })
}

/// Dispatch an interrupt reported by the interrupt-controller driver.
/// Called from the arch IRQ entry with interrupts masked; EOI is the
/// caller's responsibility after this returns.
pub fn dispatch(irq: IrqNumber) {
    let index = irq.as_u32() as usize;
    let handler = {
        let mut table = HANDLERS.lock();
        if index >= MAX_IRQ {
            table.spurious += 1;
            None
        } else {
            match table.handlers[index] {
                Some(h) => {
                    table.dispatched += 1;
                    Some(h)
                }
                None => {
                    table.spurious += 1;
                    None
                }
            }
        }
    };
    match handler {
        Some(h) => h(irq),
        None => log::warn!("unhandled {}", irq),
    }
}

/// (dispatched, spurious) counters.
pub fn counters() -> (u64, u64) {
    let table = HANDLERS.lock();
    (table.dispatched, table.spurious)
}

/// Request a reschedule on exception exit.
pub fn request_reschedule() {
    RESCHEDULE_PENDING.store(true, Ordering::Release);
}

/// Consume the pending reschedule request, if any. The arch exception
/// exit calls this exactly once per return.
pub fn take_reschedule_request() -> bool {
    RESCHEDULE_PENDING.swap(false, Ordering::AcqRel)
}

/// Classification of a synchronous exception, decoded by the arch layer
/// from its syndrome/error-code registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    PageFault { addr: u64, write: bool },
    Alignment,
    UndefinedInstruction,
    Breakpoint,
    Other,
}

/// Policy for a synchronous fault that is not a syscall trap: log the
/// interrupted context and kill the faulting task; halt if it was the
/// init or idle task. The arch fault path calls this and, when it
/// returns, resumes via the scheduler (the faulting task is gone).
pub fn handle_fatal_fault(kind: FaultKind, pc: u64, sp: u64, syndrome: u64) -> ! {
    log::error!(
        "fatal fault {:?}: pc={:#x} sp={:#x} syndrome={:#x}",
        kind,
        pc,
        sp,
        syndrome
    );
    crate::sched::terminate_current_on_fault();
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;

    static FIRED: AtomicU32 = AtomicU32::new(0);

    fn count_handler(_irq: IrqNumber) {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }

    fn other_handler(_irq: IrqNumber) {}

    #[test]
    fn register_dispatch_unregister_cycle() {
        let irq = IrqNumber::new(200);
        register_irq(irq, count_handler).expect("line free");

        // Second registration fails until the first is removed.
        assert_eq!(
            register_irq(irq, other_handler),
            Err(KernelError::AlreadyExists)
        );

        let before = FIRED.load(Ordering::Relaxed);
        dispatch(irq);
        assert_eq!(FIRED.load(Ordering::Relaxed), before + 1);

        unregister_irq(irq).expect("registered");
        assert!(unregister_irq(irq).is_err());
        register_irq(irq, other_handler).expect("line free again");
        unregister_irq(irq).expect("cleanup");
    }

    #[test]
    fn out_of_range_lines_are_rejected() {
        assert!(register_irq(IrqNumber::new(MAX_IRQ as u32), count_handler).is_err());
        assert!(unregister_irq(IrqNumber::new(u32::MAX)).is_err());
    }

    #[test]
    fn unhandled_dispatch_counts_spurious() {
        let (_, spurious_before) = counters();
        dispatch(IrqNumber::new(201));
        let (_, spurious_after) = counters();
        assert_eq!(spurious_after, spurious_before + 1);
    }

    #[test]
    fn reschedule_flag_is_consumed_once() {
        request_reschedule();
        assert!(take_reschedule_request());
    }
}
