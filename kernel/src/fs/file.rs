//! Open files and per-task file-descriptor tables.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use bitflags::bitflags;
use spin::Mutex;

use super::Vnode;
use crate::error::{KernelError, KernelResult};

/// File descriptors are small integers below [`FD_MAX`].
pub type Fd = usize;

/// Per-task file-descriptor table size.
pub const FD_MAX: usize = 32;

pub const STDIN_FD: Fd = 0;
pub const STDOUT_FD: Fd = 1;
pub const STDERR_FD: Fd = 2;

bitflags! {
    /// Open flags carried by an [`OpenFile`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ     = 1 << 0;
        const WRITE    = 1 << 1;
        const CREATE   = 1 << 2;
        const APPEND   = 1 << 3;
        const TRUNCATE = 1 << 4;
    }
}

/// An open file: a vnode plus a byte position, shared by every fd that
/// refers to it.
pub struct OpenFile {
    pub vnode: Arc<dyn Vnode>,
    pub flags: OpenFlags,
    pos: Mutex<usize>,
    refcount: AtomicUsize,
}

impl OpenFile {
    pub fn new(vnode: Arc<dyn Vnode>, flags: OpenFlags) -> Self {
        Self {
            vnode,
            flags,
            pos: Mutex::new(0),
            refcount: AtomicUsize::new(1),
        }
    }

    /// Read from the current position, advancing it.
    pub fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(KernelError::invalid("file not open for reading"));
        }
        let mut pos = self.pos.lock();
        let n = self.vnode.read(*pos, buf)?;
        *pos += n;
        Ok(n)
    }

    /// Write at the current position (or end-of-file in append mode),
    /// advancing it.
    pub fn write(&self, data: &[u8]) -> KernelResult<usize> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(KernelError::invalid("file not open for writing"));
        }
        let mut pos = self.pos.lock();
        if self.flags.contains(OpenFlags::APPEND) {
            *pos = self.vnode.size();
        }
        let n = self.vnode.write(*pos, data)?;
        *pos += n;
        Ok(n)
    }

    pub fn seek_to(&self, offset: usize) {
        *self.pos.lock() = offset;
    }

    pub fn position(&self) -> usize {
        *self.pos.lock()
    }

    /// Take a reference for a new fd sharing this file.
    pub fn retain(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one reference; releases the vnode on the last one.
    pub fn put(&self) {
        if self.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.vnode.release();
        }
    }
}

/// Fixed-size fd table. Slots 0-2 are wired to the console at creation.
pub struct FdTable {
    slots: [Option<Arc<OpenFile>>; FD_MAX],
}

impl FdTable {
    /// Build a table with fds 0/1/2 bound to `console` for read, write,
    /// and write respectively.
    pub fn with_console(console: Arc<dyn Vnode>) -> Self {
        let mut table = Self {
            slots: [const { None }; FD_MAX],
        };
        table.slots[STDIN_FD] = Some(Arc::new(OpenFile::new(console.clone(), OpenFlags::READ)));
        table.slots[STDOUT_FD] = Some(Arc::new(OpenFile::new(console.clone(), OpenFlags::WRITE)));
        table.slots[STDERR_FD] = Some(Arc::new(OpenFile::new(console, OpenFlags::WRITE)));
        table
    }

    /// Empty table with no console wiring (kernel-internal tasks).
    pub fn empty() -> Self {
        Self {
            slots: [const { None }; FD_MAX],
        }
    }

    /// Install `file` in the lowest free slot.
    pub fn alloc(&mut self, file: Arc<OpenFile>) -> KernelResult<Fd> {
        for (fd, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(fd);
            }
        }
        Err(KernelError::OutOfFds)
    }

    pub fn get(&self, fd: Fd) -> KernelResult<Arc<OpenFile>> {
        self.slots
            .get(fd)
            .and_then(|slot| slot.clone())
            .ok_or(KernelError::invalid("bad file descriptor"))
    }

    /// Invalidate `fd`. Only this slot is affected; the open file is
    /// released when its last reference drops.
    pub fn close(&mut self, fd: Fd) -> KernelResult<()> {
        let file = self
            .slots
            .get_mut(fd)
            .and_then(|slot| slot.take())
            .ok_or(KernelError::invalid("bad file descriptor"))?;
        file.put();
        Ok(())
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::string::String;

    use super::*;
    use crate::fs::VnodeKind;

    /// Vnode double tracking released count.
    struct StubNode {
        kind: VnodeKind,
        released: AtomicUsize,
    }

    impl StubNode {
        fn console() -> Arc<Self> {
            Arc::new(Self {
                kind: VnodeKind::CharDevice,
                released: AtomicUsize::new(0),
            })
        }
    }

    impl Vnode for StubNode {
        fn kind(&self) -> VnodeKind {
            self.kind
        }

        fn read(&self, _offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
            buf.fill(b'x');
            Ok(buf.len())
        }

        fn write(&self, _offset: usize, data: &[u8]) -> KernelResult<usize> {
            Ok(data.len())
        }

        fn release(&self) {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn std_fds_are_prewired() {
        let table = FdTable::with_console(StubNode::console());
        assert_eq!(table.open_count(), 3);
        assert!(table.get(STDIN_FD).expect("stdin").flags.contains(OpenFlags::READ));
        assert!(table.get(STDOUT_FD).expect("stdout").flags.contains(OpenFlags::WRITE));
        assert!(table.get(STDERR_FD).expect("stderr").flags.contains(OpenFlags::WRITE));
    }

    #[test]
    fn alloc_returns_lowest_free_slot() {
        let console = StubNode::console();
        let mut table = FdTable::with_console(console.clone());
        let file = || Arc::new(OpenFile::new(console.clone() as Arc<dyn Vnode>, OpenFlags::READ));
        assert_eq!(table.alloc(file()).expect("fd"), 3);
        assert_eq!(table.alloc(file()).expect("fd"), 4);
        table.close(3).expect("close");
        assert_eq!(table.alloc(file()).expect("fd"), 3);
    }

    #[test]
    fn close_invalidates_only_that_fd() {
        let console = StubNode::console();
        let mut table = FdTable::with_console(console);
        table.close(STDOUT_FD).expect("close");
        assert!(table.close(STDOUT_FD).is_err());
        assert!(table.get(STDOUT_FD).is_err());
        // Neighbors unaffected.
        assert!(table.get(STDIN_FD).is_ok());
        assert!(table.get(STDERR_FD).is_ok());
    }

    #[test]
    fn table_exhaustion_reports_out_of_fds() {
        let console = StubNode::console();
        let mut table = FdTable::with_console(console.clone());
        let file = || Arc::new(OpenFile::new(console.clone() as Arc<dyn Vnode>, OpenFlags::READ));
        for _ in 3..FD_MAX {
            table.alloc(file()).expect("fd");
        }
        assert!(matches!(table.alloc(file()), Err(KernelError::OutOfFds)));
    }

    #[test]
    fn release_fires_when_last_reference_drops() {
        let node = StubNode::console();
        let file = Arc::new(OpenFile::new(node.clone() as Arc<dyn Vnode>, OpenFlags::READ));
        file.retain();
        file.put();
        assert_eq!(node.released.load(Ordering::Relaxed), 0);
        file.put();
        assert_eq!(node.released.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn append_mode_writes_at_end() {
        struct Grower {
            data: Mutex<alloc::vec::Vec<u8>>,
        }
        impl Vnode for Grower {
            fn kind(&self) -> VnodeKind {
                VnodeKind::File
            }
            fn size(&self) -> usize {
                self.data.lock().len()
            }
            fn write(&self, offset: usize, data: &[u8]) -> KernelResult<usize> {
                let mut vec = self.data.lock();
                if vec.len() < offset + data.len() {
                    vec.resize(offset + data.len(), 0);
                }
                vec[offset..offset + data.len()].copy_from_slice(data);
                Ok(data.len())
            }
        }

        let node = Arc::new(Grower {
            data: Mutex::new(alloc::vec::Vec::new()),
        });
        let file = OpenFile::new(node.clone(), OpenFlags::WRITE | OpenFlags::APPEND);
        file.write(b"ab").expect("write");
        file.seek_to(0);
        file.write(b"cd").expect("write");
        assert_eq!(String::from_utf8_lossy(&node.data.lock()), "abcd");
    }
}
