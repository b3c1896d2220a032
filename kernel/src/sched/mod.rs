//! Process model and preemptive round-robin scheduling.
//!
//! [`scheduler::Scheduler`] holds the pure state machine; this module
//! owns the global instance, the interrupt-masked locking discipline,
//! and the glue to the architecture context switch. The lock is never
//! held across a switch: decisions are taken under it, raw context
//! pointers are extracted, and the switch runs lock-free.

pub mod queue;
pub mod scheduler;
pub mod task;

use spin::Mutex;

use crate::arch::context::Context;
use crate::error::{KernelError, KernelResult};
use crate::fs::FdTable;
use scheduler::Scheduler;
pub use task::{Pid, Task, TaskState, WaitReason, IDLE_PRIORITY, KERNEL_STACK_SIZE, N_TASKS_MAX};

/// Entry signature for kernel tasks.
pub type TaskEntry = extern "C" fn(usize);

static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    crate::arch::without_interrupts(|| f(&mut SCHEDULER.lock()))
}

/// Initialize the scheduler by adopting the boot flow of control as the
/// idle task (priority 31, always runnable).
pub fn init() -> KernelResult<Pid> {
    with_scheduler(|sched| {
        let pid = sched.allocate_pid();
        let idle = Task::new(
            pid,
            None,
            "idle",
            IDLE_PRIORITY,
            (0, KERNEL_STACK_SIZE),
            Context::empty(),
            FdTable::empty(),
        );
        sched.adopt_boot_task(idle)
    })
}

fn alloc_kernel_stack() -> KernelResult<(usize, usize)> {
    #[cfg(target_os = "none")]
    {
        let frames = KERNEL_STACK_SIZE / crate::mm::FRAME_SIZE;
        let base = crate::mm::frame::alloc_contiguous(frames)?;
        Ok((base.as_usize(), KERNEL_STACK_SIZE))
    }
    #[cfg(not(target_os = "none"))]
    {
        // Host tests: leak a 16-byte-aligned buffer.
        let backing = alloc::vec::Vec::leak(alloc::vec![0u128; KERNEL_STACK_SIZE / 16]);
        Ok((backing.as_ptr() as usize, KERNEL_STACK_SIZE))
    }
}

/// Create a kernel task in the Ready state.
pub fn create_task(entry: TaskEntry, arg: usize, name: &str, priority: u8) -> KernelResult<Pid> {
    let kernel_stack = alloc_kernel_stack()?;
    let fd_table = FdTable::with_console(crate::fs::devconsole::console_vnode());
    with_scheduler(|sched| {
        let pid = sched.allocate_pid();
        let parent = sched.current;
        let stack_top = kernel_stack.0 + kernel_stack.1;
        let context = Context::launching(entry as usize, arg, stack_top);
        let task = Task::new(pid, parent, name, priority, kernel_stack, context, fd_table);
        sched.admit(task)
    })
}

/// Perform a pending switch decision, if any. Interrupts are masked for
/// the duration; the scheduler lock is dropped before the switch.
fn reschedule_now() {
    #[cfg(target_os = "none")]
    {
        let was_enabled = crate::arch::irq_disable();
        let switch = {
            let mut sched = SCHEDULER.lock();
            sched.take_switch_decision().map(|(from, to)| {
                let from_ctx = sched
                    .table
                    .get_mut(from)
                    .map(|t| &mut t.context as *mut Context)
                    .expect("outgoing task has a table slot");
                let to_ctx = sched
                    .table
                    .get_mut(to)
                    .map(|t| &t.context as *const Context)
                    .expect("incoming task has a table slot");
                (from_ctx, to_ctx)
            })
        };
        if let Some((from, to)) = switch {
            // SAFETY: both pointers reference boxed task contexts that
            // stay pinned until the task is reaped, and the dying-task
            // case only ever saves into (never resumes from) `from`.
            unsafe {
                crate::arch::context::context_switch(from, to);
            }
        }
        crate::arch::irq_restore(was_enabled);
    }
    #[cfg(not(target_os = "none"))]
    {
        // Host tests drive the state machine directly; no real switch.
        with_scheduler(|sched| {
            sched.take_switch_decision();
        });
    }
}

/// Voluntarily give up the CPU, keeping the task runnable.
pub fn yield_now() {
    with_scheduler(Scheduler::rotate_current);
    reschedule_now();
}

/// Preemption point taken on interrupt exit when the timer handler
/// requested a reschedule.
pub fn preempt() {
    with_scheduler(Scheduler::rotate_current);
    reschedule_now();
}

/// One timer tick: charge the running task and wake due sleepers. Runs
/// in interrupt context; requests (never performs) the reschedule.
pub fn timer_tick() {
    let now = crate::drivers::timer_ticks();
    let expired = with_scheduler(|sched| sched.tick(now));
    if expired {
        crate::irq::request_reschedule();
    }
}

/// Block the running task until console input arrives. The input check
/// repeats under the interrupt-masked scheduler lock so a byte arriving
/// between the caller's poll and this call cannot be missed.
pub fn block_current_on_console() {
    let blocked = with_scheduler(|sched| {
        if crate::drivers::console::has_input() {
            false
        } else {
            sched.block_current(WaitReason::ConsoleInput);
            true
        }
    });
    if blocked {
        reschedule_now();
    }
}

/// Wake tasks blocked on console input. Called from the UART RX
/// interrupt; the switch happens on interrupt exit.
pub fn wake_console_waiters() {
    with_scheduler(Scheduler::wake_console_waiters);
    crate::irq::request_reschedule();
}

/// Block the running task for at least `ms` milliseconds. No spurious
/// early wake: the deadline is a tick count the wake check compares
/// against the cumulative ticks.
pub fn sleep_current(ms: u64) {
    if ms == 0 {
        yield_now();
        return;
    }
    let ticks = ms.div_ceil(crate::drivers::TICK_MS);
    let deadline = crate::drivers::timer_ticks() + ticks;
    with_scheduler(|sched| sched.block_current(WaitReason::SleepUntil(deadline)));
    reschedule_now();
}

/// Terminate the running task with `code`. Never returns; the slot stays
/// as a zombie until the parent collects it.
pub fn exit_current(code: i32) -> ! {
    with_scheduler(|sched| sched.kill_current(code));
    reschedule_now();
    #[cfg(target_os = "none")]
    {
        unreachable!("terminated task was resumed");
    }
    #[cfg(not(target_os = "none"))]
    {
        panic!("exit_current on host");
    }
}

/// Reap one zombie child of the calling task.
pub fn collect_child() -> Option<(Pid, i32)> {
    with_scheduler(|sched| {
        let parent = sched.current?;
        sched.collect_child(parent)
    })
}

/// Pid of the running task (0 before the scheduler is initialized).
pub fn current_pid() -> Pid {
    with_scheduler(|sched| sched.current.unwrap_or(0))
}

/// Run `f` against the current task's TCB. The closure must not block or
/// reschedule: the scheduler lock is held.
pub fn with_current_task<R>(f: impl FnOnce(&mut Task) -> R) -> KernelResult<R> {
    with_scheduler(|sched| {
        let pid = sched.current.ok_or(KernelError::NotReady)?;
        let task = sched.table.get_mut(pid).ok_or(KernelError::NotReady)?;
        Ok(f(task))
    })
}

/// Fatal-fault policy: kill the faulting task, or halt when it is the
/// idle/boot task. Diverges either way.
pub fn terminate_current_on_fault() -> ! {
    #[cfg(target_os = "none")]
    {
        let is_essential = with_scheduler(|sched| {
            sched.current.is_none() || sched.current == sched.idle_pid
        });
        if is_essential {
            log::error!("fault in boot or idle context, halting");
            crate::arch::halt();
        }
        exit_current(KernelError::Fault.errno() as i32)
    }
    #[cfg(not(target_os = "none"))]
    {
        panic!("fatal fault");
    }
}

/// Scheduler main loop for the idle task: sleep until interrupts deliver
/// work; preemption on interrupt exit moves to ready tasks.
#[cfg(target_os = "none")]
pub fn run() -> ! {
    log::info!("entering scheduler loop");
    crate::arch::enable_interrupts();
    loop {
        crate::arch::wait_for_interrupt();
    }
}

/// Shared landing point of the per-architecture task entry trampolines.
/// New tasks begin here with interrupts enabled.
#[no_mangle]
extern "C" fn task_bootstrap(entry: usize, arg: usize) -> ! {
    // SAFETY: `entry` was produced from a `TaskEntry` in create_task and
    // round-tripped through the saved context unchanged.
    let entry: TaskEntry = unsafe { core::mem::transmute(entry) };
    entry(arg);
    exit_current(0)
}
