//! Process system calls.

use crate::error::KernelResult;

/// `exit(code)`: terminates the calling task; does not return to it.
pub fn sys_exit(code: usize) -> KernelResult<usize> {
    crate::sched::exit_current(code as i32)
}

/// `getpid()`.
pub fn sys_getpid() -> KernelResult<usize> {
    crate::sched::with_current_task(|task| task.pid as usize)
}

/// `sleep(ms)`: blocks until the tick counter has advanced far enough;
/// never wakes early.
pub fn sys_sleep(ms: usize) -> KernelResult<usize> {
    crate::sched::sleep_current(ms as u64);
    Ok(0)
}
