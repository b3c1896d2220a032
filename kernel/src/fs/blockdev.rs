//! Block-device layer and the RAM disk.
//!
//! Devices register by name in a flat list; `find` is exact-match.
//! Reads and writes are validated against `num_blocks` before they touch
//! the device.

use alloc::{string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use spin::{Mutex, RwLock};

use crate::error::{KernelError, KernelResult};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockDevFlags: u32 {
        const READABLE  = 1 << 0;
        const WRITABLE  = 1 << 1;
        const REMOVABLE = 1 << 2;
    }
}

/// Per-device I/O counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub reads: u64,
    pub writes: u64,
}

/// A block-addressable device.
pub trait BlockDevice: Send + Sync {
    fn name(&self) -> &str;
    fn block_size(&self) -> usize;
    fn num_blocks(&self) -> u64;
    fn flags(&self) -> BlockDevFlags;

    /// Read block `index` into `buf` (exactly one block).
    fn read_block(&self, index: u64, buf: &mut [u8]) -> KernelResult<()>;

    /// Write block `index` from `buf` (exactly one block).
    fn write_block(&self, index: u64, buf: &[u8]) -> KernelResult<()>;

    /// Read consecutive blocks starting at `start`.
    fn read_blocks(&self, start: u64, buf: &mut [u8]) -> KernelResult<()> {
        let bs = self.block_size();
        if buf.len() % bs != 0 {
            return Err(KernelError::invalid("buffer not block-sized"));
        }
        for (i, chunk) in buf.chunks_mut(bs).enumerate() {
            self.read_block(start + i as u64, chunk)?;
        }
        Ok(())
    }

    /// Write consecutive blocks starting at `start`.
    fn write_blocks(&self, start: u64, buf: &[u8]) -> KernelResult<()> {
        let bs = self.block_size();
        if buf.len() % bs != 0 {
            return Err(KernelError::invalid("buffer not block-sized"));
        }
        for (i, chunk) in buf.chunks(bs).enumerate() {
            self.write_block(start + i as u64, chunk)?;
        }
        Ok(())
    }

    /// Flush caches to the medium.
    fn sync(&self) -> KernelResult<()> {
        Ok(())
    }

    fn stats(&self) -> BlockStats {
        BlockStats::default()
    }
}

static DEVICES: RwLock<Vec<Arc<dyn BlockDevice>>> = RwLock::new(Vec::new());

/// Register a block device. Names are unique.
pub fn register(device: Arc<dyn BlockDevice>) -> KernelResult<()> {
    let mut devices = DEVICES.write();
    if devices.iter().any(|d| d.name() == device.name()) {
        return Err(KernelError::AlreadyExists);
    }
    log::info!(
        "block device {}: {} blocks of {} bytes",
        device.name(),
        device.num_blocks(),
        device.block_size()
    );
    devices.push(device);
    Ok(())
}

/// Exact-match lookup by name.
pub fn find(name: &str) -> Option<Arc<dyn BlockDevice>> {
    DEVICES.read().iter().find(|d| d.name() == name).cloned()
}

/// Memory-backed block device. The backing store is a single contiguous
/// heap allocation of exactly `num_blocks * block_size` bytes.
pub struct RamDisk {
    name: String,
    block_size: usize,
    num_blocks: u64,
    data: Mutex<Vec<u8>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl RamDisk {
    pub fn new(name: &str, num_blocks: u64, block_size: usize) -> Self {
        Self {
            name: String::from(name),
            block_size,
            num_blocks,
            data: Mutex::new(alloc::vec![0u8; num_blocks as usize * block_size]),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    fn check(&self, index: u64, len: usize) -> KernelResult<usize> {
        if index >= self.num_blocks {
            return Err(KernelError::invalid("block index out of range"));
        }
        if len != self.block_size {
            return Err(KernelError::invalid("buffer is not one block"));
        }
        Ok(index as usize * self.block_size)
    }
}

impl BlockDevice for RamDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    fn flags(&self) -> BlockDevFlags {
        BlockDevFlags::READABLE | BlockDevFlags::WRITABLE
    }

    fn read_block(&self, index: u64, buf: &mut [u8]) -> KernelResult<()> {
        let offset = self.check(index, buf.len())?;
        let data = self.data.lock();
        buf.copy_from_slice(&data[offset..offset + self.block_size]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, index: u64, buf: &[u8]) -> KernelResult<()> {
        let offset = self.check(index, buf.len())?;
        let mut data = self.data.lock();
        data[offset..offset + self.block_size].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stats(&self) -> BlockStats {
        BlockStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn round_trip_one_block() {
        let disk = RamDisk::new("rt0", 100, 512);
        let block = [0x42u8; 512];
        disk.write_block(7, &block).expect("write");
        let mut back = [0u8; 512];
        disk.read_block(7, &mut back).expect("read");
        assert_eq!(back, block);
        assert_eq!(disk.stats(), BlockStats { reads: 1, writes: 1 });
    }

    #[test]
    fn out_of_range_index_is_invalid() {
        let disk = RamDisk::new("oob0", 4, 512);
        let mut buf = [0u8; 512];
        assert!(matches!(
            disk.read_block(4, &mut buf),
            Err(KernelError::InvalidArgument { .. })
        ));
        assert!(matches!(
            disk.write_block(u64::MAX, &buf),
            Err(KernelError::InvalidArgument { .. })
        ));
        disk.read_block(3, &mut buf).expect("last block is valid");
    }

    #[test]
    fn size_is_exactly_blocks_times_block_size() {
        let disk = RamDisk::new("sz0", 64, 512);
        assert_eq!(disk.data.lock().len(), 64 * 512);
        assert_eq!(disk.num_blocks(), 64);
        assert_eq!(disk.block_size(), 512);
    }

    #[test]
    fn multi_block_helpers() {
        let disk = RamDisk::new("mb0", 8, 16);
        let data: Vec<u8> = (0..48).collect();
        disk.write_blocks(2, &data).expect("write");
        let mut back = alloc::vec![0u8; 48];
        disk.read_blocks(2, &mut back).expect("read");
        assert_eq!(back, data);

        assert!(disk.write_blocks(0, &data[..20]).is_err(), "ragged buffer");
    }

    #[test]
    fn registry_find_is_exact_match() {
        register(Arc::new(RamDisk::new("findme", 2, 512))).expect("register");
        assert!(find("findme").is_some());
        assert!(find("findm").is_none());
        assert!(find("findme0").is_none());
        assert!(matches!(
            register(Arc::new(RamDisk::new("findme", 2, 512))),
            Err(KernelError::AlreadyExists)
        ));
    }

    #[test]
    fn sync_is_a_no_op() {
        let disk = RamDisk::new("sync0", 1, 512);
        disk.sync().expect("sync");
    }
}
