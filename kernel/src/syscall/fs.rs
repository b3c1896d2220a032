//! Filesystem and console system calls.

use alloc::{string::String, sync::Arc};

use super::{user_slice, user_slice_mut, user_str};
use crate::error::{KernelError, KernelResult};
use crate::fs::{self, file::Fd, OpenFile, OpenFlags, VnodeKind};

/// Resolve a user path against the calling task's working directory.
fn absolute_path(ptr: usize, len: usize) -> KernelResult<String> {
    let raw = user_str(ptr, len)?;
    let cwd = crate::sched::with_current_task(|task| task.cwd.clone())
        .unwrap_or_else(|_| String::from("/"));
    fs::path::absolutize(&cwd, raw)
}

fn fd_file(fd: Fd) -> KernelResult<Arc<OpenFile>> {
    crate::sched::with_current_task(|task| task.fd_table.get(fd))?
}

/// `print(ptr, len)`: write raw bytes to the console.
pub fn sys_print(ptr: usize, len: usize) -> KernelResult<usize> {
    let bytes = user_slice(ptr, len)?;
    Ok(crate::drivers::console::write_bytes(bytes))
}

/// `read(fd, ptr, len)`: may block on console input.
pub fn sys_read(fd: usize, ptr: usize, len: usize) -> KernelResult<usize> {
    let buf = user_slice_mut(ptr, len)?;
    // The Arc is cloned out of the fd table before the read so a
    // blocking read never holds the scheduler lock.
    fd_file(fd)?.read(buf)
}

/// `write(fd, ptr, len)`.
pub fn sys_write(fd: usize, ptr: usize, len: usize) -> KernelResult<usize> {
    let buf = user_slice(ptr, len)?;
    fd_file(fd)?.write(buf)
}

/// `getcwd(ptr, cap)`: copies the NUL-terminated working directory.
pub fn sys_getcwd(ptr: usize, cap: usize) -> KernelResult<usize> {
    let cwd = crate::sched::with_current_task(|task| task.cwd.clone())?;
    let buf = user_slice_mut(ptr, cap)?;
    if cwd.len() + 1 > buf.len() {
        return Err(KernelError::invalid("buffer too small for cwd"));
    }
    buf[..cwd.len()].copy_from_slice(cwd.as_bytes());
    buf[cwd.len()] = 0;
    Ok(cwd.len())
}

/// `chdir(ptr, len)`: target must resolve to a directory.
pub fn sys_chdir(ptr: usize, len: usize) -> KernelResult<usize> {
    let target = absolute_path(ptr, len)?;
    let node = fs::vfs_resolve(&target)?;
    if node.kind() != VnodeKind::Directory {
        return Err(KernelError::invalid("chdir target is not a directory"));
    }
    crate::sched::with_current_task(|task| task.cwd = target)?;
    Ok(0)
}

/// `open(ptr, len, flags)` -> fd.
pub fn sys_open(ptr: usize, len: usize, flags: usize) -> KernelResult<usize> {
    let path = absolute_path(ptr, len)?;
    let flags =
        OpenFlags::from_bits(flags as u32).ok_or(KernelError::invalid("unknown open flags"))?;
    let file = fs::vfs_open(&path, flags)?;
    crate::sched::with_current_task(|task| task.fd_table.alloc(file))?
}

/// `close(fd)`.
pub fn sys_close(fd: usize) -> KernelResult<usize> {
    crate::sched::with_current_task(|task| task.fd_table.close(fd))??;
    Ok(0)
}

/// `mkdir(ptr, len)`.
pub fn sys_mkdir(ptr: usize, len: usize) -> KernelResult<usize> {
    let path = absolute_path(ptr, len)?;
    fs::vfs_mkdir(&path)?;
    Ok(0)
}

/// `readdir(path_ptr, path_len, cursor, name_ptr, name_cap)`: writes the
/// entry name NUL-terminated and returns the next cursor, or 0 at the
/// end of the directory.
pub fn sys_readdir(
    path_ptr: usize,
    path_len: usize,
    cursor: usize,
    name_ptr: usize,
    name_cap: usize,
) -> KernelResult<usize> {
    let path = absolute_path(path_ptr, path_len)?;
    let out = user_slice_mut(name_ptr, name_cap)?;
    match fs::vfs_readdir(&path, cursor)? {
        Some((name, next)) => {
            if name.len() + 1 > out.len() {
                return Err(KernelError::invalid("buffer too small for entry name"));
            }
            out[..name.len()].copy_from_slice(name.as_bytes());
            out[name.len()] = 0;
            Ok(next)
        }
        None => Ok(0),
    }
}

/// Raw stat record written by `sys_stat`. Layout is part of the syscall
/// ABI.
#[repr(C)]
pub struct RawStat {
    pub kind: u32,
    pub reserved: u32,
    pub size: u64,
}

/// `stat(path_ptr, path_len, stat_ptr)`.
pub fn sys_stat(path_ptr: usize, path_len: usize, stat_ptr: usize) -> KernelResult<usize> {
    let path = absolute_path(path_ptr, path_len)?;
    let stat = fs::vfs_stat(&path)?;
    let out = user_slice_mut(stat_ptr, core::mem::size_of::<RawStat>())?;
    let raw = RawStat {
        kind: match stat.kind {
            VnodeKind::File => 1,
            VnodeKind::Directory => 2,
            VnodeKind::CharDevice => 3,
            VnodeKind::BlockDevice => 4,
        },
        reserved: 0,
        size: stat.size as u64,
    };
    // SAFETY: `out` spans exactly one RawStat; RawStat is plain old data.
    unsafe {
        core::ptr::write_unaligned(out.as_mut_ptr() as *mut RawStat, raw);
    }
    Ok(0)
}
