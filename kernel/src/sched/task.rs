//! Task control block.

use alloc::string::String;

use crate::arch::context::Context;
use crate::fs::FdTable;

/// Process identifier. Monotonic within a run; never reused.
pub type Pid = u64;

/// Priorities run 0 (highest) through 31 (lowest).
pub const PRIORITY_LEVELS: usize = 32;

/// The idle task's priority, only chosen when nothing else is ready.
pub const IDLE_PRIORITY: u8 = 31;

/// Task table capacity.
pub const N_TASKS_MAX: usize = 64;

/// Task name cap in bytes.
pub const TASK_NAME_MAX: usize = 32;

/// Kernel stack span per task: 16 KiB.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Default quantum: 10 ms expressed in timer ticks.
pub const DEFAULT_QUANTUM_TICKS: u32 = {
    let ticks = 10 / crate::drivers::TICK_MS as u32;
    if ticks == 0 {
        1
    } else {
        ticks
    }
};

/// Task lifecycle states. At most one task is `Running` at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    New,
    Ready,
    Running,
    Blocked,
    Zombie,
    Terminated,
}

/// What a blocked task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Console input byte available.
    ConsoleInput,
    /// Tick counter reaching the stored value.
    SleepUntil(u64),
}

/// Per-task accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStats {
    /// Timer ticks observed while running.
    pub ticks_run: u64,
    /// Times this task was switched in.
    pub switches: u64,
}

/// Task control block.
pub struct Task {
    pub pid: Pid,
    pub parent_pid: Option<Pid>,
    pub name: String,
    pub state: TaskState,
    pub priority: u8,
    pub time_slice_remaining_ticks: u32,
    /// Base and size of the kernel stack.
    pub kernel_stack: (usize, usize),
    pub context: Context,
    pub fd_table: FdTable,
    /// Canonical working directory.
    pub cwd: String,
    pub wait_reason: Option<WaitReason>,
    pub exit_code: Option<i32>,
    pub stats: TaskStats,
}

impl Task {
    /// Build a TCB in the `New` state. The caller transitions it to
    /// `Ready` once it is enqueued.
    pub fn new(
        pid: Pid,
        parent_pid: Option<Pid>,
        name: &str,
        priority: u8,
        kernel_stack: (usize, usize),
        context: Context,
        fd_table: FdTable,
    ) -> Self {
        let mut bounded = String::from(name);
        bounded.truncate(TASK_NAME_MAX);
        Self {
            pid,
            parent_pid,
            name: bounded,
            state: TaskState::New,
            priority: priority.min(IDLE_PRIORITY),
            time_slice_remaining_ticks: DEFAULT_QUANTUM_TICKS,
            kernel_stack,
            context,
            fd_table,
            cwd: String::from("/"),
            wait_reason: None,
            exit_code: None,
            stats: TaskStats::default(),
        }
    }

    /// Top of the kernel stack (stacks grow down).
    pub fn stack_top(&self) -> usize {
        self.kernel_stack.0 + self.kernel_stack.1
    }

    pub fn reset_quantum(&mut self) {
        self.time_slice_remaining_ticks = DEFAULT_QUANTUM_TICKS;
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::fs::FdTable;

    #[test]
    fn name_is_bounded() {
        let long = "x".repeat(100);
        let task = Task::new(
            1,
            None,
            &long,
            10,
            (0, KERNEL_STACK_SIZE),
            Context::empty(),
            FdTable::empty(),
        );
        assert_eq!(task.name.len(), TASK_NAME_MAX);
        assert_eq!(task.state, TaskState::New);
        assert_eq!(task.cwd, "/");
    }

    #[test]
    fn priority_clamps_to_idle() {
        let task = Task::new(
            2,
            None,
            "clamped",
            200,
            (0, KERNEL_STACK_SIZE),
            Context::empty(),
            FdTable::empty(),
        );
        assert_eq!(task.priority, IDLE_PRIORITY);
    }
}
