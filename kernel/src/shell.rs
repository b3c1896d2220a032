//! Shell task stub.
//!
//! The command set and line editor live in user land; the kernel's part
//! is creating the task and giving it working blocking console I/O over
//! the syscall boundary, which this loop exercises: prompt, block on
//! read(0), echo the bytes back through write(1).

use crate::syscall::{self, Syscall, SYSCALL_ARGS};

fn args(a0: usize, a1: usize, a2: usize) -> [usize; SYSCALL_ARGS] {
    [a0, a1, a2, 0, 0, 0]
}

fn sys_write(fd: usize, bytes: &[u8]) -> isize {
    syscall::invoke(
        Syscall::Write as usize,
        args(fd, bytes.as_ptr() as usize, bytes.len()),
    )
}

fn sys_read(fd: usize, buf: &mut [u8]) -> isize {
    syscall::invoke(
        Syscall::Read as usize,
        args(fd, buf.as_mut_ptr() as usize, buf.len()),
    )
}

fn sys_getpid() -> isize {
    syscall::invoke(Syscall::GetPid as usize, args(0, 0, 0))
}

/// Entry point of the shell task.
pub extern "C" fn shell_entry(_arg: usize) {
    let pid = sys_getpid();
    log::info!("shell task running as pid {}", pid);
    sys_write(1, b"MiniOS shell ready\n");

    let mut buf = [0u8; 64];
    loop {
        sys_write(1, b"> ");
        let n = sys_read(0, &mut buf);
        if n > 0 {
            sys_write(1, &buf[..n as usize]);
        }
    }
}
