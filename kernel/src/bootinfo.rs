//! Boot-information record handed over by the boot stub.
//!
//! The stub (UEFI on AArch64, Multiboot2 on x86-64) delivers a single
//! 344-byte record with a fixed layout; the memory map lives out-of-band
//! behind a kernel-virtual pointer stored in the record. This module
//! decodes and validates the record and re-encodes it byte-exactly.
//!
//! Record layout (all fields little-endian):
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 8    | magic |
//! | 8      | 4    | arch tag (1 = ARM64, 2 = X86_64) |
//! | 12     | 4    | version (currently 1) |
//! | 16     | 8    | memory-map pointer |
//! | 24     | 4    | memory-map entry count |
//! | 28     | 4    | memory-map entry size (32) |
//! | 32     | 40   | framebuffer descriptor (all zero if absent) |
//! | 72     | 8    | kernel load base (physical) |
//! | 80     | 8    | kernel size |
//! | 88     | 256  | command line, NUL-terminated UTF-8 |

use crate::error::{KernelError, KernelResult};

/// Size of the boot record in bytes.
pub const BOOT_INFO_SIZE: usize = 344;

/// Size of one memory-map entry in bytes.
pub const MEMORY_MAP_ENTRY_SIZE: usize = 32;

/// Upper bound on memory-map entries the kernel will accept. Real firmware
/// maps on the supported machines are far below this.
pub const MAX_MEMORY_REGIONS: usize = 64;

/// Command-line capacity including the terminating NUL.
pub const COMMAND_LINE_CAP: usize = 256;

/// Boot record magic: the ASCII pack "MiniOSV1".
pub const BOOT_MAGIC: u64 = u64::from_le_bytes(*b"MiniOSV1");

/// Boot record version this kernel understands.
pub const BOOT_VERSION: u32 = 1;

/// Architecture discriminator carried in the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ArchTag {
    Arm64 = 1,
    X86_64 = 2,
}

impl ArchTag {
    fn from_u32(value: u32) -> KernelResult<Self> {
        match value {
            1 => Ok(Self::Arm64),
            2 => Ok(Self::X86_64),
            _ => Err(KernelError::invalid("boot-info arch tag")),
        }
    }

    /// The tag matching the architecture this kernel was compiled for.
    pub fn native() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            Self::Arm64
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            Self::X86_64
        }
    }
}

/// Classification of a physical memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegionKind {
    Usable = 1,
    Reserved = 2,
    BootloaderReclaimable = 3,
    AcpiReclaimable = 4,
    AcpiNvs = 5,
    BadMemory = 6,
    KernelImage = 7,
}

impl RegionKind {
    fn from_u32(value: u32) -> KernelResult<Self> {
        Ok(match value {
            1 => Self::Usable,
            2 => Self::Reserved,
            3 => Self::BootloaderReclaimable,
            4 => Self::AcpiReclaimable,
            5 => Self::AcpiNvs,
            6 => Self::BadMemory,
            7 => Self::KernelImage,
            _ => return Err(KernelError::invalid("memory-map region kind")),
        })
    }
}

/// One entry of the physical memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: RegionKind,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.base + self.length
    }

    fn overlaps(&self, other: &MemoryRegion) -> bool {
        self.base < other.end() && other.base < self.end()
    }

    /// Decode from one 32-byte map entry.
    pub fn decode(bytes: &[u8]) -> KernelResult<Self> {
        if bytes.len() < MEMORY_MAP_ENTRY_SIZE {
            return Err(KernelError::invalid("memory-map entry size"));
        }
        Ok(Self {
            base: read_u64(bytes, 0),
            length: read_u64(bytes, 8),
            kind: RegionKind::from_u32(read_u32(bytes, 16))?,
        })
    }

    /// Encode to the 32-byte map entry layout.
    pub fn encode(&self) -> [u8; MEMORY_MAP_ENTRY_SIZE] {
        let mut out = [0u8; MEMORY_MAP_ENTRY_SIZE];
        write_u64(&mut out, 0, self.base);
        write_u64(&mut out, 8, self.length);
        write_u32(&mut out, 16, self.kind as u32);
        out
    }
}

/// Framebuffer descriptor, present when any field is non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Framebuffer {
    pub base: u64,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub bpp: u32,
    pub format: u32,
}

impl Framebuffer {
    fn decode(bytes: &[u8]) -> Option<Self> {
        let fb = Self {
            base: read_u64(bytes, 0),
            width: read_u32(bytes, 8),
            height: read_u32(bytes, 12),
            pitch: read_u32(bytes, 16),
            bpp: read_u32(bytes, 20),
            format: read_u32(bytes, 24),
        };
        if fb == Self::default() {
            None
        } else {
            Some(fb)
        }
    }

    fn encode_into(&self, bytes: &mut [u8]) {
        write_u64(bytes, 0, self.base);
        write_u32(bytes, 8, self.width);
        write_u32(bytes, 12, self.height);
        write_u32(bytes, 16, self.pitch);
        write_u32(bytes, 20, self.bpp);
        write_u32(bytes, 24, self.format);
    }
}

/// Decoded boot record plus the memory map it references.
///
/// The map is copied inline at parse time so the kernel never touches the
/// stub's buffer again after validation.
#[derive(Clone)]
pub struct BootInfo {
    pub arch_tag: ArchTag,
    pub memory_map_ptr: u64,
    pub framebuffer: Option<Framebuffer>,
    pub kernel_load_base: u64,
    pub kernel_size: u64,
    regions: [MemoryRegion; MAX_MEMORY_REGIONS],
    region_count: usize,
    command_line: [u8; COMMAND_LINE_CAP],
    command_line_len: usize,
}

impl BootInfo {
    /// Parse and validate the 344-byte record together with its memory map.
    ///
    /// `map_bytes` is the slice behind the record's memory-map pointer;
    /// callers on bare metal materialize it from the pointer, tests pass it
    /// directly.
    pub fn parse(record: &[u8], map_bytes: &[u8]) -> KernelResult<Self> {
        if record.len() != BOOT_INFO_SIZE {
            return Err(KernelError::invalid("boot record length"));
        }
        if read_u64(record, 0) != BOOT_MAGIC {
            return Err(KernelError::invalid("boot record magic"));
        }
        let arch_tag = ArchTag::from_u32(read_u32(record, 8))?;
        if read_u32(record, 12) != BOOT_VERSION {
            return Err(KernelError::invalid("boot record version"));
        }
        let region_count = read_u32(record, 24) as usize;
        if region_count == 0 || region_count > MAX_MEMORY_REGIONS {
            return Err(KernelError::invalid("memory-map entry count"));
        }
        if read_u32(record, 28) as usize != MEMORY_MAP_ENTRY_SIZE {
            return Err(KernelError::invalid("memory-map entry size"));
        }
        if map_bytes.len() < region_count * MEMORY_MAP_ENTRY_SIZE {
            return Err(KernelError::invalid("memory-map buffer length"));
        }

        let mut regions = [MemoryRegion {
            base: 0,
            length: 0,
            kind: RegionKind::Reserved,
        }; MAX_MEMORY_REGIONS];
        for (i, slot) in regions.iter_mut().take(region_count).enumerate() {
            *slot = MemoryRegion::decode(&map_bytes[i * MEMORY_MAP_ENTRY_SIZE..])?;
        }

        let mut command_line = [0u8; COMMAND_LINE_CAP];
        command_line.copy_from_slice(&record[88..88 + COMMAND_LINE_CAP]);
        let command_line_len = command_line
            .iter()
            .position(|&b| b == 0)
            .ok_or(KernelError::invalid("command line not NUL-terminated"))?;
        if core::str::from_utf8(&command_line[..command_line_len]).is_err() {
            return Err(KernelError::invalid("command line not UTF-8"));
        }

        let info = Self {
            arch_tag,
            memory_map_ptr: read_u64(record, 16),
            framebuffer: Framebuffer::decode(&record[32..72]),
            kernel_load_base: read_u64(record, 72),
            kernel_size: read_u64(record, 80),
            regions,
            region_count,
            command_line,
            command_line_len,
        };
        info.validate_regions()?;
        Ok(info)
    }

    /// Copy the record from the stub's pointer and parse it.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a valid 344-byte boot record whose memory-map
    /// pointer references at least `entry count * 32` readable bytes.
    #[cfg(target_os = "none")]
    pub unsafe fn load(ptr: *const u8) -> KernelResult<Self> {
        if ptr.is_null() {
            return Err(KernelError::invalid("boot record pointer"));
        }
        // SAFETY: caller guarantees `ptr` references a full record.
        let record = unsafe { core::slice::from_raw_parts(ptr, BOOT_INFO_SIZE) };
        let count = read_u32(record, 24) as usize;
        let map_ptr = read_u64(record, 16) as *const u8;
        if map_ptr.is_null() || count == 0 || count > MAX_MEMORY_REGIONS {
            return Err(KernelError::invalid("memory-map pointer"));
        }
        // SAFETY: caller guarantees the map buffer is readable for `count`
        // entries.
        let map_bytes =
            unsafe { core::slice::from_raw_parts(map_ptr, count * MEMORY_MAP_ENTRY_SIZE) };
        Self::parse(record, map_bytes)
    }

    fn validate_regions(&self) -> KernelResult<()> {
        let regions = self.regions();
        for pair in regions.windows(2) {
            if pair[1].base < pair[0].base {
                return Err(KernelError::invalid("memory map not sorted"));
            }
        }
        // KernelImage entries are an overlay marking where the image sits
        // inside RAM; every other kind must be disjoint.
        for (i, a) in regions.iter().enumerate() {
            if a.kind == RegionKind::KernelImage {
                continue;
            }
            for b in regions.iter().skip(i + 1) {
                if b.kind != RegionKind::KernelImage && a.overlaps(b) {
                    return Err(KernelError::invalid("memory map regions overlap"));
                }
            }
        }
        // The kernel image must sit inside RAM the map also advertises as
        // usable, otherwise the frame allocator cannot protect it.
        let kernel_in_ram = regions.iter().filter(|r| r.kind == RegionKind::KernelImage).all(
            |img| {
                regions
                    .iter()
                    .any(|r| r.kind == RegionKind::Usable && img.overlaps(r))
            },
        );
        if !kernel_in_ram {
            return Err(KernelError::invalid("kernel image outside usable RAM"));
        }
        Ok(())
    }

    /// Re-encode to the exact 344-byte record layout.
    pub fn encode(&self) -> [u8; BOOT_INFO_SIZE] {
        let mut out = [0u8; BOOT_INFO_SIZE];
        write_u64(&mut out, 0, BOOT_MAGIC);
        write_u32(&mut out, 8, self.arch_tag as u32);
        write_u32(&mut out, 12, BOOT_VERSION);
        write_u64(&mut out, 16, self.memory_map_ptr);
        write_u32(&mut out, 24, self.region_count as u32);
        write_u32(&mut out, 28, MEMORY_MAP_ENTRY_SIZE as u32);
        if let Some(fb) = self.framebuffer {
            fb.encode_into(&mut out[32..72]);
        }
        write_u64(&mut out, 72, self.kernel_load_base);
        write_u64(&mut out, 80, self.kernel_size);
        out[88..88 + COMMAND_LINE_CAP].copy_from_slice(&self.command_line);
        out
    }

    /// The validated memory map, ascending by base.
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions[..self.region_count]
    }

    /// Regions the frame allocator may hand out.
    pub fn usable_regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions().iter().filter(|r| r.kind == RegionKind::Usable)
    }

    pub fn total_usable_bytes(&self) -> u64 {
        self.usable_regions().map(|r| r.length).sum()
    }

    pub fn command_line(&self) -> &str {
        // Validated UTF-8 at parse time.
        core::str::from_utf8(&self.command_line[..self.command_line_len]).unwrap_or("")
    }
}

impl core::fmt::Display for BootInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "arch={:?} regions={} usable={} KiB kernel={:#x}+{:#x} cmdline={:?}",
            self.arch_tag,
            self.region_count,
            self.total_usable_bytes() / 1024,
            self.kernel_load_base,
            self.kernel_size,
            self.command_line()
        )
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn sample_map() -> alloc::vec::Vec<u8> {
        let regions = [
            MemoryRegion {
                base: 0x4000_0000,
                length: 0x0400_0000,
                kind: RegionKind::Usable,
            },
            MemoryRegion {
                base: 0x4000_0000,
                length: 256 * 1024,
                kind: RegionKind::KernelImage,
            },
        ];
        let regions = [
            MemoryRegion {
                base: 0x0900_0000,
                length: 0x1000,
                kind: RegionKind::Reserved,
            },
            regions[0],
            regions[1],
        ];
        let mut bytes = alloc::vec::Vec::new();
        for r in &regions {
            bytes.extend_from_slice(&r.encode());
        }
        bytes
    }

    fn sample_record(map_ptr: u64, count: u32) -> [u8; BOOT_INFO_SIZE] {
        let mut rec = [0u8; BOOT_INFO_SIZE];
        write_u64(&mut rec, 0, BOOT_MAGIC);
        write_u32(&mut rec, 8, ArchTag::X86_64 as u32);
        write_u32(&mut rec, 12, BOOT_VERSION);
        write_u64(&mut rec, 16, map_ptr);
        write_u32(&mut rec, 24, count);
        write_u32(&mut rec, 28, MEMORY_MAP_ENTRY_SIZE as u32);
        write_u64(&mut rec, 72, 0x4000_0000);
        write_u64(&mut rec, 80, 256 * 1024);
        rec[88..88 + 7].copy_from_slice(b"console");
        rec
    }

    #[test]
    fn parse_then_encode_is_identity() {
        let map = sample_map();
        let record = sample_record(0xFFFF_0000_1000_0000, 3);
        let info =
            BootInfo::parse(&record, &map).expect("valid record should parse");
        assert_eq!(info.encode(), record);
    }

    #[test]
    fn rejects_bad_magic() {
        let map = sample_map();
        let mut record = sample_record(0x1000, 3);
        record[0] ^= 0xFF;
        assert!(BootInfo::parse(&record, &map).is_err());
    }

    #[test]
    fn rejects_bad_version_and_entry_size() {
        let map = sample_map();
        let mut record = sample_record(0x1000, 3);
        write_u32(&mut record, 12, 2);
        assert!(BootInfo::parse(&record, &map).is_err());

        let mut record = sample_record(0x1000, 3);
        write_u32(&mut record, 28, 24);
        assert!(BootInfo::parse(&record, &map).is_err());
    }

    #[test]
    fn rejects_unsorted_and_overlapping_maps() {
        let regions = [
            MemoryRegion {
                base: 0x8000_0000,
                length: 0x1000,
                kind: RegionKind::Usable,
            },
            MemoryRegion {
                base: 0x4000_0000,
                length: 0x1000,
                kind: RegionKind::KernelImage,
            },
        ];
        let mut map = alloc::vec::Vec::new();
        for r in &regions {
            map.extend_from_slice(&r.encode());
        }
        let record = sample_record(0x1000, 2);
        assert!(BootInfo::parse(&record, &map).is_err());

        let regions = [
            MemoryRegion {
                base: 0x4000_0000,
                length: 0x2000_0000,
                kind: RegionKind::Reserved,
            },
            MemoryRegion {
                base: 0x5000_0000,
                length: 0x2000_0000,
                kind: RegionKind::Usable,
            },
        ];
        let mut map = alloc::vec::Vec::new();
        for r in &regions {
            map.extend_from_slice(&r.encode());
        }
        assert!(BootInfo::parse(&record, &map).is_err());
    }

    #[test]
    fn rejects_kernel_image_outside_usable_ram() {
        let regions = [
            MemoryRegion {
                base: 0x1000_0000,
                length: 0x1000,
                kind: RegionKind::KernelImage,
            },
            MemoryRegion {
                base: 0x4000_0000,
                length: 0x1000_0000,
                kind: RegionKind::Usable,
            },
        ];
        let mut map = alloc::vec::Vec::new();
        for r in &regions {
            map.extend_from_slice(&r.encode());
        }
        let record = sample_record(0x1000, 2);
        assert!(BootInfo::parse(&record, &map).is_err());
    }

    #[test]
    fn command_line_and_usable_accounting() {
        let map = sample_map();
        let record = sample_record(0x1000, 3);
        let info = BootInfo::parse(&record, &map).expect("valid record");
        assert_eq!(info.command_line(), "console");
        assert_eq!(info.total_usable_bytes(), 0x0400_0000);
        assert_eq!(info.usable_regions().count(), 1);
        assert!(info.framebuffer.is_none());
    }

    #[test]
    fn framebuffer_round_trips_when_present() {
        let map = sample_map();
        let mut record = sample_record(0x1000, 3);
        let fb = Framebuffer {
            base: 0x8000_0000,
            width: 1024,
            height: 768,
            pitch: 4096,
            bpp: 32,
            format: 1,
        };
        fb.encode_into(&mut record[32..72]);
        let info = BootInfo::parse(&record, &map).expect("valid record");
        assert_eq!(info.framebuffer, Some(fb));
        assert_eq!(info.encode(), record);
    }
}
