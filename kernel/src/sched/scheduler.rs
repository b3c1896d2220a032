//! Task table and the round-robin scheduler core.
//!
//! The scheduler state lives behind one spin mutex taken with interrupts
//! masked; the mutex is always dropped before the context switch itself
//! so the incoming task can take it again immediately.

use alloc::boxed::Box;

use super::queue::ReadyQueues;
use super::task::{Pid, Task, TaskState, WaitReason, N_TASKS_MAX};
use crate::error::{KernelError, KernelResult};

/// Fixed-capacity task table. Slots are reused after a task is reaped;
/// pids never are.
pub struct TaskTable {
    slots: [Option<Box<Task>>; N_TASKS_MAX],
}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; N_TASKS_MAX],
        }
    }

    pub fn insert(&mut self, task: Task) -> KernelResult<()> {
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(Box::new(task));
                Ok(())
            }
            None => Err(KernelError::OutOfTasks),
        }
    }

    pub fn get(&self, pid: Pid) -> Option<&Task> {
        self.slots
            .iter()
            .flatten()
            .find(|task| task.pid == pid)
            .map(|boxed| &**boxed)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|task| task.pid == pid)
            .map(|boxed| &mut **boxed)
    }

    /// Drop the slot holding `pid`.
    pub fn remove(&mut self, pid: Pid) -> Option<Box<Task>> {
        self.slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|t| t.pid == pid))
            .and_then(Option::take)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<Task>> {
        self.slots.iter_mut().flatten()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler state: table, ready queues, and the single running task.
pub struct Scheduler {
    pub table: TaskTable,
    pub ready: ReadyQueues,
    pub current: Option<Pid>,
    next_pid: Pid,
    /// The pre-created idle task; also the halt target for fatal faults
    /// in the boot path.
    pub idle_pid: Option<Pid>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            table: TaskTable::new(),
            ready: ReadyQueues::new(),
            current: None,
            next_pid: 1,
            idle_pid: None,
        }
    }

    pub fn allocate_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// Admit a `New` task: transition to `Ready` and enqueue.
    pub fn admit(&mut self, mut task: Task) -> KernelResult<Pid> {
        let pid = task.pid;
        task.state = TaskState::Ready;
        let priority = task.priority;
        self.table.insert(task)?;
        self.ready.enqueue(pid, priority);
        Ok(pid)
    }

    /// Adopt the boot flow of control as a task (the idle task). It is
    /// `Running` and owns the boot stack; its context gets filled by the
    /// first switch away from it.
    pub fn adopt_boot_task(&mut self, task: Task) -> KernelResult<Pid> {
        let pid = task.pid;
        self.table.insert(task)?;
        if let Some(t) = self.table.get_mut(pid) {
            t.state = TaskState::Running;
        }
        self.current = Some(pid);
        self.idle_pid = Some(pid);
        Ok(pid)
    }

    /// Put the running task back at the tail of its priority level with a
    /// fresh quantum (quantum expiry and voluntary yield).
    pub fn rotate_current(&mut self) {
        let Some(pid) = self.current else {
            return;
        };
        if let Some(task) = self.table.get_mut(pid) {
            if task.state == TaskState::Running {
                task.state = TaskState::Ready;
                task.reset_quantum();
                let priority = task.priority;
                self.ready.enqueue(pid, priority);
            }
        }
    }

    /// Block the running task on `reason`; it is not requeued.
    pub fn block_current(&mut self, reason: WaitReason) {
        let Some(pid) = self.current else {
            return;
        };
        if let Some(task) = self.table.get_mut(pid) {
            task.state = TaskState::Blocked;
            task.wait_reason = Some(reason);
        }
    }

    /// Mark the running task a zombie carrying `code`.
    pub fn kill_current(&mut self, code: i32) {
        let Some(pid) = self.current else {
            return;
        };
        if let Some(task) = self.table.get_mut(pid) {
            task.state = TaskState::Zombie;
            task.exit_code = Some(code);
            task.wait_reason = None;
        }
    }

    /// Wake every task blocked on console input.
    pub fn wake_console_waiters(&mut self) {
        let mut woken = [0 as Pid; N_TASKS_MAX];
        let mut count = 0;
        for task in self.table.iter_mut() {
            if task.state == TaskState::Blocked
                && task.wait_reason == Some(WaitReason::ConsoleInput)
            {
                task.state = TaskState::Ready;
                task.wait_reason = None;
                woken[count] = task.pid;
                count += 1;
            }
        }
        for &pid in &woken[..count] {
            let priority = self.table.get(pid).map(|t| t.priority).unwrap_or(0);
            self.ready.enqueue(pid, priority);
        }
    }

    /// Wake sleepers whose deadline has passed. Deadlines are compared
    /// against the cumulative tick count, so a task never wakes early.
    pub fn wake_sleepers(&mut self, now_ticks: u64) {
        let mut woken = [0 as Pid; N_TASKS_MAX];
        let mut count = 0;
        for task in self.table.iter_mut() {
            if task.state == TaskState::Blocked {
                if let Some(WaitReason::SleepUntil(deadline)) = task.wait_reason {
                    if now_ticks >= deadline {
                        task.state = TaskState::Ready;
                        task.wait_reason = None;
                        woken[count] = task.pid;
                        count += 1;
                    }
                }
            }
        }
        for &pid in &woken[..count] {
            let priority = self.table.get(pid).map(|t| t.priority).unwrap_or(0);
            self.ready.enqueue(pid, priority);
        }
    }

    /// One timer tick: wake due sleepers, charge the running task.
    /// Returns whether the quantum expired and a reschedule is due.
    pub fn tick(&mut self, now_ticks: u64) -> bool {
        self.wake_sleepers(now_ticks);
        let Some(pid) = self.current else {
            return !self.ready.is_empty();
        };
        if let Some(task) = self.table.get_mut(pid) {
            if task.state == TaskState::Running {
                task.stats.ticks_run += 1;
                task.time_slice_remaining_ticks =
                    task.time_slice_remaining_ticks.saturating_sub(1);
                return task.time_slice_remaining_ticks == 0;
            }
        }
        !self.ready.is_empty()
    }

    /// Choose the next task to run and mark it `Running`. Returns the
    /// outgoing and incoming pids when a switch is required.
    pub fn take_switch_decision(&mut self) -> Option<(Pid, Pid)> {
        let current = self.current?;
        // A still-Running current means nobody rotated, blocked, or
        // killed it; nothing to do.
        if self
            .table
            .get(current)
            .is_some_and(|t| t.state == TaskState::Running)
        {
            return None;
        }
        let next = self.ready.pick_next()?;
        if next == current {
            if let Some(task) = self.table.get_mut(next) {
                task.state = TaskState::Running;
            }
            return None;
        }
        if let Some(task) = self.table.get_mut(next) {
            task.state = TaskState::Running;
            task.stats.switches += 1;
        }
        self.current = Some(next);
        Some((current, next))
    }

    /// Reap one zombie child of `parent`: Zombie -> Terminated, slot
    /// freed, exit code returned.
    pub fn collect_child(&mut self, parent: Pid) -> Option<(Pid, i32)> {
        let child = self
            .table
            .iter_mut()
            .find(|t| t.parent_pid == Some(parent) && t.state == TaskState::Zombie)
            .map(|t| t.pid)?;
        let mut task = self.table.remove(child)?;
        task.state = TaskState::Terminated;
        self.ready.remove(child);
        Some((child, task.exit_code.unwrap_or(0)))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::arch::context::Context;
    use crate::fs::FdTable;
    use crate::sched::task::{IDLE_PRIORITY, KERNEL_STACK_SIZE};

    fn spawn(sched: &mut Scheduler, name: &str, priority: u8) -> Pid {
        let pid = sched.allocate_pid();
        let task = Task::new(
            pid,
            Some(1),
            name,
            priority,
            (0x1000, KERNEL_STACK_SIZE),
            Context::empty(),
            FdTable::empty(),
        );
        sched.admit(task).expect("table has room")
    }

    fn boot(sched: &mut Scheduler) -> Pid {
        let pid = sched.allocate_pid();
        let idle = Task::new(
            pid,
            None,
            "idle",
            IDLE_PRIORITY,
            (0x2000, KERNEL_STACK_SIZE),
            Context::empty(),
            FdTable::empty(),
        );
        sched.adopt_boot_task(idle).expect("adopt")
    }

    #[test]
    fn round_robin_order_over_six_quanta() {
        let mut sched = Scheduler::new();
        boot(&mut sched);
        let a = spawn(&mut sched, "A", 10);
        let b = spawn(&mut sched, "B", 10);
        let c = spawn(&mut sched, "C", 10);

        let mut order = alloc::vec::Vec::new();
        for _ in 0..6 {
            sched.rotate_current();
            let (_, next) = sched.take_switch_decision().expect("switch");
            order.push(next);
        }
        assert_eq!(order, [a, b, c, a, b, c]);
    }

    #[test]
    fn idle_runs_only_when_nothing_else_is_ready() {
        let mut sched = Scheduler::new();
        let idle = boot(&mut sched);
        let worker = spawn(&mut sched, "w", 10);

        sched.rotate_current();
        let (_, next) = sched.take_switch_decision().expect("switch");
        assert_eq!(next, worker);

        // Worker blocks; only idle remains.
        sched.block_current(WaitReason::ConsoleInput);
        let (_, next) = sched.take_switch_decision().expect("switch");
        assert_eq!(next, idle);

        // Input arrives; worker preempts idle at the next rotation.
        sched.wake_console_waiters();
        sched.rotate_current();
        let (_, next) = sched.take_switch_decision().expect("switch");
        assert_eq!(next, worker);
    }

    #[test]
    fn quantum_expiry_is_tick_driven() {
        let mut sched = Scheduler::new();
        boot(&mut sched);
        let w = spawn(&mut sched, "w", 10);
        sched.rotate_current();
        sched.take_switch_decision().expect("switch to worker");
        assert_eq!(sched.current, Some(w));

        let quantum = sched.table.get(w).expect("task").time_slice_remaining_ticks;
        for tick in 1..=quantum {
            let expired = sched.tick(tick as u64);
            assert_eq!(expired, tick == quantum, "tick {}", tick);
        }
        assert_eq!(
            sched.table.get(w).expect("task").stats.ticks_run,
            quantum as u64
        );
    }

    #[test]
    fn sleepers_never_wake_early() {
        let mut sched = Scheduler::new();
        boot(&mut sched);
        let w = spawn(&mut sched, "sleeper", 10);
        sched.rotate_current();
        sched.take_switch_decision().expect("switch");

        sched.block_current(WaitReason::SleepUntil(50));
        sched.take_switch_decision().expect("switch to idle");

        sched.wake_sleepers(49);
        assert_eq!(sched.table.get(w).expect("task").state, TaskState::Blocked);
        sched.wake_sleepers(50);
        assert_eq!(sched.table.get(w).expect("task").state, TaskState::Ready);
    }

    #[test]
    fn zombie_collection_frees_the_slot() {
        let mut sched = Scheduler::new();
        let parent = boot(&mut sched);
        let child = spawn(&mut sched, "child", 10);
        sched.rotate_current();
        sched.take_switch_decision().expect("switch to child");

        sched.kill_current(7);
        assert_eq!(
            sched.table.get(child).expect("zombie stays").state,
            TaskState::Zombie
        );
        sched.take_switch_decision().expect("switch to idle");

        assert_eq!(sched.collect_child(parent), Some((child, 7)));
        assert!(sched.table.get(child).is_none());
        assert_eq!(sched.collect_child(parent), None);
    }

    #[test]
    fn pids_are_never_reused() {
        let mut sched = Scheduler::new();
        let parent = boot(&mut sched);
        let first = spawn(&mut sched, "one", 10);
        sched.rotate_current();
        sched.take_switch_decision().expect("switch");
        sched.kill_current(0);
        sched.take_switch_decision().expect("switch to idle");
        sched.collect_child(parent).expect("reaped");

        let second = spawn(&mut sched, "two", 10);
        assert!(second > first);
    }

    #[test]
    fn table_exhaustion_is_out_of_tasks() {
        let mut sched = Scheduler::new();
        boot(&mut sched);
        for i in 0..(N_TASKS_MAX - 1) {
            spawn(&mut sched, "filler", (i % 31) as u8);
        }
        let pid = sched.allocate_pid();
        let overflow = Task::new(
            pid,
            None,
            "overflow",
            10,
            (0x1000, KERNEL_STACK_SIZE),
            Context::empty(),
            FdTable::empty(),
        );
        assert!(matches!(sched.admit(overflow), Err(KernelError::OutOfTasks)));
    }
}
