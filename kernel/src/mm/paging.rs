//! Virtual memory: architecture-independent 4-level page mapping.
//!
//! Both supported architectures translate 48-bit virtual addresses through
//! four levels of 512-entry tables, so one walker serves them: only the
//! descriptor encoding and the canonical-form rule differ, and those are
//! pure bit functions selected by [`PageFormat`]. Table frames are reached
//! through the [`TableMemory`] trait; the kernel backs it with the frame
//! allocator and the identity-mapped RAM window, host tests back it with
//! plain vectors.

use bitflags::bitflags;

use crate::{
    error::{KernelError, KernelResult},
    mm::{PhysAddr, VirtAddr, FRAME_SIZE},
};

bitflags! {
    /// Architecture-independent page attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageAttrs: u8 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXECUTE = 1 << 2;
        const USER    = 1 << 3;
        const CACHED  = 1 << 4;
    }
}

impl PageAttrs {
    /// Kernel code: read + execute, cacheable.
    pub fn kernel_code() -> Self {
        Self::READ | Self::EXECUTE | Self::CACHED
    }

    /// Kernel data: read + write, cacheable, never executable.
    pub fn kernel_data() -> Self {
        Self::READ | Self::WRITE | Self::CACHED
    }

    /// Device MMIO: read + write, uncached.
    pub fn device() -> Self {
        Self::READ | Self::WRITE
    }

    /// A remap may keep or drop capability bits but never add one.
    fn weakens_or_equals(self, prior: Self) -> bool {
        let caps = Self::WRITE | Self::EXECUTE | Self::USER;
        (self & caps) & !(prior & caps) == Self::empty()
    }
}

/// Page-table entry encoding selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    /// AArch64 stage-1, 4 KiB granule, 48-bit, TTBR0/TTBR1 split.
    Aarch64,
    /// x86-64 4-level paging with NX (EFER.NXE assumed set).
    X86_64,
}

const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

// x86-64 descriptor bits.
const X86_PRESENT: u64 = 1 << 0;
const X86_WRITABLE: u64 = 1 << 1;
const X86_USER: u64 = 1 << 2;
const X86_WRITE_THROUGH: u64 = 1 << 3;
const X86_NO_CACHE: u64 = 1 << 4;
const X86_NO_EXECUTE: u64 = 1 << 63;

// AArch64 stage-1 descriptor bits.
const A64_VALID: u64 = 1 << 0;
/// Table at levels 0-2, page at level 3.
const A64_TYPE: u64 = 1 << 1;
/// MAIR index 0 = Normal Write-Back, index 1 = Device-nGnRnE.
const A64_ATTR_DEVICE: u64 = 1 << 2;
const A64_AP_EL0: u64 = 1 << 6;
const A64_AP_RO: u64 = 1 << 7;
/// Inner shareable.
const A64_SH_INNER: u64 = 0b11 << 8;
const A64_ACCESSED: u64 = 1 << 10;
const A64_PXN: u64 = 1 << 53;
const A64_UXN: u64 = 1 << 54;

impl PageFormat {
    /// Native format for the architecture this kernel was built for.
    pub fn native() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            Self::Aarch64
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            Self::X86_64
        }
    }

    /// Canonical-form check.
    ///
    /// x86-64 requires bits 63:48 sign-extended from bit 47. AArch64 with
    /// 48-bit translation requires bits 63:48 all zero (TTBR0 half) or all
    /// one (TTBR1 half, addresses from `0xFFFF_0000_0000_0000` up).
    pub fn is_canonical(&self, va: VirtAddr) -> bool {
        let top = va.as_u64() >> 48;
        match self {
            Self::X86_64 => {
                let sign_extended = ((va.as_u64() as i64) << 16 >> 16) as u64;
                sign_extended == va.as_u64()
            }
            Self::Aarch64 => top == 0 || top == 0xFFFF,
        }
    }

    fn encode_leaf(&self, pa: PhysAddr, attrs: PageAttrs) -> u64 {
        let addr = pa.as_u64() & ADDR_MASK;
        match self {
            Self::X86_64 => {
                let mut entry = addr | X86_PRESENT;
                if attrs.contains(PageAttrs::WRITE) {
                    entry |= X86_WRITABLE;
                }
                if attrs.contains(PageAttrs::USER) {
                    entry |= X86_USER;
                }
                if !attrs.contains(PageAttrs::CACHED) {
                    entry |= X86_NO_CACHE | X86_WRITE_THROUGH;
                }
                if !attrs.contains(PageAttrs::EXECUTE) {
                    entry |= X86_NO_EXECUTE;
                }
                entry
            }
            Self::Aarch64 => {
                let mut entry = addr | A64_VALID | A64_TYPE | A64_ACCESSED;
                if attrs.contains(PageAttrs::CACHED) {
                    entry |= A64_SH_INNER;
                } else {
                    entry |= A64_ATTR_DEVICE;
                }
                if !attrs.contains(PageAttrs::WRITE) {
                    entry |= A64_AP_RO;
                }
                if attrs.contains(PageAttrs::USER) {
                    entry |= A64_AP_EL0;
                }
                if !attrs.contains(PageAttrs::EXECUTE) {
                    entry |= A64_PXN | A64_UXN;
                } else if !attrs.contains(PageAttrs::USER) {
                    // Kernel-executable pages stay non-executable at EL0.
                    entry |= A64_UXN;
                }
                entry
            }
        }
    }

    fn encode_table(&self, pa: PhysAddr) -> u64 {
        let addr = pa.as_u64() & ADDR_MASK;
        match self {
            Self::X86_64 => addr | X86_PRESENT | X86_WRITABLE,
            Self::Aarch64 => addr | A64_VALID | A64_TYPE,
        }
    }

    fn is_present(&self, entry: u64) -> bool {
        match self {
            Self::X86_64 => entry & X86_PRESENT != 0,
            Self::Aarch64 => entry & A64_VALID != 0,
        }
    }

    fn entry_addr(&self, entry: u64) -> PhysAddr {
        PhysAddr::new(entry & ADDR_MASK)
    }

    fn decode_attrs(&self, entry: u64) -> PageAttrs {
        let mut attrs = PageAttrs::READ;
        match self {
            Self::X86_64 => {
                if entry & X86_WRITABLE != 0 {
                    attrs |= PageAttrs::WRITE;
                }
                if entry & X86_USER != 0 {
                    attrs |= PageAttrs::USER;
                }
                if entry & X86_NO_CACHE == 0 {
                    attrs |= PageAttrs::CACHED;
                }
                if entry & X86_NO_EXECUTE == 0 {
                    attrs |= PageAttrs::EXECUTE;
                }
            }
            Self::Aarch64 => {
                if entry & A64_AP_RO == 0 {
                    attrs |= PageAttrs::WRITE;
                }
                if entry & A64_AP_EL0 != 0 {
                    attrs |= PageAttrs::USER;
                }
                if entry & A64_ATTR_DEVICE == 0 {
                    attrs |= PageAttrs::CACHED;
                }
                if entry & A64_PXN == 0 || entry & A64_UXN == 0 {
                    attrs |= PageAttrs::EXECUTE;
                }
            }
        }
        attrs
    }
}

/// Access to page-table frames by physical address.
pub trait TableMemory {
    /// Allocate one zeroed 4 KiB table frame.
    fn alloc_table(&mut self) -> KernelResult<PhysAddr>;

    /// Read entry `index` of the table at `table`.
    fn read(&self, table: PhysAddr, index: usize) -> u64;

    /// Write entry `index` of the table at `table`.
    fn write(&mut self, table: PhysAddr, index: usize, value: u64);

    /// Invalidate any cached translation for `va` (TLB shootdown on the
    /// local hart). No-op for table backings without a TLB.
    fn flush(&mut self, _va: VirtAddr) {}
}

/// Table index of `va` at `level` (0 = root).
fn table_index(va: VirtAddr, level: usize) -> usize {
    let shift = 39 - level * 9;
    ((va.as_u64() >> shift) & 0x1FF) as usize
}

/// One address space: a root table frame and the subordinate tables
/// reachable from it.
pub struct AddressSpace<M: TableMemory> {
    root: PhysAddr,
    format: PageFormat,
    mem: M,
}

impl<M: TableMemory> AddressSpace<M> {
    /// Create an empty address space, allocating its root table.
    pub fn new(mut mem: M, format: PageFormat) -> KernelResult<Self> {
        let root = mem.alloc_table()?;
        Ok(Self { root, format, mem })
    }

    pub fn root(&self) -> PhysAddr {
        self.root
    }

    pub fn format(&self) -> PageFormat {
        self.format
    }

    fn check_page_args(&self, va: VirtAddr, pa: Option<PhysAddr>) -> KernelResult<()> {
        if !self.format.is_canonical(va) {
            return Err(KernelError::invalid("non-canonical virtual address"));
        }
        if va.page_offset() != 0 {
            return Err(KernelError::invalid("unaligned virtual page"));
        }
        if let Some(pa) = pa {
            if !pa.is_frame_aligned() {
                return Err(KernelError::invalid("unaligned physical frame"));
            }
        }
        Ok(())
    }

    /// Walk to the level-3 table of `va`, optionally creating intermediate
    /// tables.
    fn leaf_table(&mut self, va: VirtAddr, create: bool) -> KernelResult<PhysAddr> {
        let mut table = self.root;
        for level in 0..3 {
            let index = table_index(va, level);
            let entry = self.mem.read(table, index);
            table = if self.format.is_present(entry) {
                self.format.entry_addr(entry)
            } else if create {
                let next = self.mem.alloc_table()?;
                let descriptor = self.format.encode_table(next);
                self.mem.write(table, index, descriptor);
                next
            } else {
                return Err(KernelError::NotMapped);
            };
        }
        Ok(table)
    }

    /// Map the 4 KiB page at `va` to the frame at `pa`.
    ///
    /// Remapping an already-mapped page is allowed only when the new
    /// attributes equal or strictly weaken the existing ones and the frame
    /// is unchanged.
    pub fn map(&mut self, va: VirtAddr, pa: PhysAddr, attrs: PageAttrs) -> KernelResult<()> {
        self.check_page_args(va, Some(pa))?;
        let table = self.leaf_table(va, true)?;
        let index = table_index(va, 3);
        let existing = self.mem.read(table, index);
        if self.format.is_present(existing) {
            if self.format.entry_addr(existing) != pa {
                return Err(KernelError::invalid("remap to a different frame"));
            }
            let prior = self.format.decode_attrs(existing);
            if !attrs.weakens_or_equals(prior) {
                return Err(KernelError::invalid("remap strengthens attributes"));
            }
        }
        let entry = self.format.encode_leaf(pa, attrs);
        self.mem.write(table, index, entry);
        if self.format.is_present(existing) {
            self.mem.flush(va);
        }
        Ok(())
    }

    /// Map `count` consecutive pages starting at `va` to consecutive
    /// frames starting at `pa`.
    pub fn map_range(
        &mut self,
        va: VirtAddr,
        pa: PhysAddr,
        count: usize,
        attrs: PageAttrs,
    ) -> KernelResult<()> {
        for i in 0..count as u64 {
            self.map(
                VirtAddr::new(va.as_u64() + i * FRAME_SIZE as u64),
                PhysAddr::new(pa.as_u64() + i * FRAME_SIZE as u64),
                attrs,
            )?;
        }
        Ok(())
    }

    /// Clear the leaf entry for `va` and invalidate its translation. The
    /// underlying frame stays owned by the caller.
    pub fn unmap(&mut self, va: VirtAddr) -> KernelResult<()> {
        self.check_page_args(va, None)?;
        let table = self.leaf_table(va, false)?;
        let index = table_index(va, 3);
        let entry = self.mem.read(table, index);
        if !self.format.is_present(entry) {
            return Err(KernelError::NotMapped);
        }
        self.mem.write(table, index, 0);
        self.mem.flush(va);
        Ok(())
    }

    /// Resolve `va` to the physical address it currently translates to.
    pub fn translate(&mut self, va: VirtAddr) -> KernelResult<PhysAddr> {
        if !self.format.is_canonical(va) {
            return Err(KernelError::invalid("non-canonical virtual address"));
        }
        let table = self.leaf_table(va.page_base(), false)?;
        let entry = self.mem.read(table, table_index(va, 3));
        if !self.format.is_present(entry) {
            return Err(KernelError::NotMapped);
        }
        Ok(self.format.entry_addr(entry).offset(va.page_offset()))
    }

    /// Attributes of the leaf entry for `va`, if mapped.
    pub fn attrs_of(&mut self, va: VirtAddr) -> KernelResult<PageAttrs> {
        let table = self.leaf_table(va.page_base(), false)?;
        let entry = self.mem.read(table, table_index(va, 3));
        if !self.format.is_present(entry) {
            return Err(KernelError::NotMapped);
        }
        Ok(self.format.decode_attrs(entry))
    }
}

/// Table backing on bare metal: frames from the frame allocator, reached
/// through the identity-mapped RAM window.
#[cfg(target_os = "none")]
pub struct KernelTableMemory;

#[cfg(target_os = "none")]
impl TableMemory for KernelTableMemory {
    fn alloc_table(&mut self) -> KernelResult<PhysAddr> {
        let pa = crate::mm::frame::alloc_frame()?;
        // SAFETY: the frame allocator vends RAM frames; RAM is identity
        // mapped, and the frame is exclusively ours until freed.
        unsafe {
            core::ptr::write_bytes(pa.as_usize() as *mut u8, 0, FRAME_SIZE);
        }
        Ok(pa)
    }

    fn read(&self, table: PhysAddr, index: usize) -> u64 {
        // SAFETY: `table` was produced by alloc_table or read from a
        // descriptor we wrote; identity mapping makes it dereferencable.
        unsafe { core::ptr::read_volatile((table.as_usize() as *const u64).add(index)) }
    }

    fn write(&mut self, table: PhysAddr, index: usize, value: u64) {
        // SAFETY: as in `read`; the walker only writes in-bounds indices.
        unsafe {
            core::ptr::write_volatile((table.as_usize() as *mut u64).add(index), value);
        }
    }

    fn flush(&mut self, va: VirtAddr) {
        crate::arch::flush_tlb_page(va);
    }
}

#[cfg(target_os = "none")]
mod kernel_space {
    use spin::Mutex;

    use super::{AddressSpace, KernelTableMemory, PageAttrs, PageFormat};
    use crate::{
        error::{KernelError, KernelResult},
        mm::{PhysAddr, VirtAddr},
    };

    static KERNEL_SPACE: Mutex<Option<AddressSpace<KernelTableMemory>>> = Mutex::new(None);

    fn with_space<R>(
        f: impl FnOnce(&mut AddressSpace<KernelTableMemory>) -> KernelResult<R>,
    ) -> KernelResult<R> {
        crate::arch::without_interrupts(|| match KERNEL_SPACE.lock().as_mut() {
            Some(space) => f(space),
            None => Err(KernelError::NotReady),
        })
    }

    /// Build the kernel address space from the boot memory map and install
    /// it: RAM identity-mapped (image code R+X, image data and the rest
    /// R+W), device windows uncached.
    pub fn init(boot: &crate::bootinfo::BootInfo) -> KernelResult<()> {
        use crate::bootinfo::RegionKind;
        use crate::mm::FRAME_SIZE;

        let mut space = AddressSpace::new(KernelTableMemory, PageFormat::native())?;

        // The image span gets its own W^X mapping below; RAM mapping
        // skips it so the R+X text pages are never pre-mapped writable.
        let image_span = boot
            .regions()
            .iter()
            .find(|r| r.kind == RegionKind::KernelImage)
            .map(|img| {
                let start = img.base & !(FRAME_SIZE as u64 - 1);
                let end = img.end().div_ceil(FRAME_SIZE as u64) * FRAME_SIZE as u64;
                (start, end)
            });

        for region in boot.regions() {
            match region.kind {
                RegionKind::Usable
                | RegionKind::BootloaderReclaimable
                | RegionKind::AcpiReclaimable => {}
                _ => continue,
            }
            let mut pieces = [(region.base, region.end()); 2];
            let mut n = 1;
            if let Some((img_start, img_end)) = image_span {
                if img_start < region.end() && region.base < img_end {
                    pieces[0] = (region.base, img_start.max(region.base));
                    pieces[1] = (img_end.min(region.end()), region.end());
                    n = 2;
                }
            }
            for &(start, end) in pieces.iter().take(n) {
                // Map whole pages only; firmware regions are page-sized
                // on the supported machines, ragged edges are dropped.
                let start = start.div_ceil(FRAME_SIZE as u64) * FRAME_SIZE as u64;
                let end = end & !(FRAME_SIZE as u64 - 1);
                if end <= start {
                    continue;
                }
                let pages = ((end - start) / FRAME_SIZE as u64) as usize;
                space.map_range(
                    VirtAddr::new(start),
                    PhysAddr::new(start),
                    pages,
                    PageAttrs::kernel_data(),
                )?;
            }
        }

        // The image gets its W^X split: the text span stays R+X, the
        // remainder R+W. The boot link places text first, so the split
        // point comes from the linker-provided text-end symbol.
        if let Some(img) = boot
            .regions()
            .iter()
            .find(|r| r.kind == RegionKind::KernelImage)
        {
            let (img_start, img_end) = image_span.expect("image span computed above");
            let total_pages = ((img_end - img_start) as usize) / FRAME_SIZE;
            let (text_pages, _) = crate::arch::kernel_image_split(img);
            let text_pages = text_pages.min(total_pages);
            space.map_range(
                VirtAddr::new(img_start),
                PhysAddr::new(img_start),
                text_pages,
                PageAttrs::kernel_code(),
            )?;
            if total_pages > text_pages {
                let data_base = img_start + (text_pages * FRAME_SIZE) as u64;
                space.map_range(
                    VirtAddr::new(data_base),
                    PhysAddr::new(data_base),
                    total_pages - text_pages,
                    PageAttrs::kernel_data(),
                )?;
            }
        }

        for window in crate::arch::mmio_windows() {
            let pages = (window.length as usize).div_ceil(FRAME_SIZE);
            space.map_range(
                VirtAddr::new(window.base),
                PhysAddr::new(window.base),
                pages,
                PageAttrs::device(),
            )?;
        }

        let root = space.root();
        *KERNEL_SPACE.lock() = Some(space);

        // SAFETY: every region this code executes from is mapped above;
        // the switch instruction runs from an identity-mapped page.
        unsafe { crate::arch::install_address_space(root) };
        Ok(())
    }

    pub fn map(va: VirtAddr, pa: PhysAddr, attrs: PageAttrs) -> KernelResult<()> {
        with_space(|s| s.map(va, pa, attrs))
    }

    pub fn unmap(va: VirtAddr) -> KernelResult<()> {
        with_space(|s| s.unmap(va))
    }

    pub fn translate(va: VirtAddr) -> KernelResult<PhysAddr> {
        with_space(|s| s.translate(va))
    }
}

#[cfg(target_os = "none")]
pub use kernel_space::{init, map, translate, unmap};

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    /// Vec-backed physical memory for the walker.
    struct FakeTableMemory {
        tables: alloc::vec::Vec<[u64; 512]>,
        flushes: usize,
        fail_alloc: bool,
    }

    impl FakeTableMemory {
        fn new() -> Self {
            Self {
                tables: alloc::vec::Vec::new(),
                flushes: 0,
                fail_alloc: false,
            }
        }

        fn index_of(pa: PhysAddr) -> usize {
            (pa.as_u64() as usize - 0x10_0000) / FRAME_SIZE
        }
    }

    impl TableMemory for FakeTableMemory {
        fn alloc_table(&mut self) -> KernelResult<PhysAddr> {
            if self.fail_alloc {
                return Err(KernelError::out_of_memory(FRAME_SIZE));
            }
            self.tables.push([0; 512]);
            Ok(PhysAddr::new(
                (0x10_0000 + (self.tables.len() - 1) * FRAME_SIZE) as u64,
            ))
        }

        fn read(&self, table: PhysAddr, index: usize) -> u64 {
            self.tables[Self::index_of(table)][index]
        }

        fn write(&mut self, table: PhysAddr, index: usize, value: u64) {
            self.tables[Self::index_of(table)][index] = value;
        }

        fn flush(&mut self, _va: VirtAddr) {
            self.flushes += 1;
        }
    }

    fn space(format: PageFormat) -> AddressSpace<FakeTableMemory> {
        AddressSpace::new(FakeTableMemory::new(), format).expect("root table")
    }

    #[test]
    fn map_then_translate_round_trips_on_both_formats() {
        for format in [PageFormat::X86_64, PageFormat::Aarch64] {
            let mut s = space(format);
            let va = VirtAddr::new(0xFFFF_8000_0040_0000u64);
            let pa = PhysAddr::new(0x4000_0000);
            s.map(va, pa, PageAttrs::kernel_data()).expect("map");
            assert_eq!(s.translate(va).expect("mapped"), pa, "{:?}", format);
            // Offsets within the page carry through.
            let off = VirtAddr::new(va.as_u64() + 0x123);
            assert_eq!(
                s.translate(off).expect("mapped"),
                PhysAddr::new(pa.as_u64() + 0x123)
            );
        }
    }

    #[test]
    fn translate_unmapped_reports_not_mapped() {
        let mut s = space(PageFormat::X86_64);
        assert_eq!(
            s.translate(VirtAddr::new(0xFFFF_9000_0000_0000)),
            Err(KernelError::NotMapped)
        );
        // A sibling page of a mapped one is still unmapped.
        s.map(
            VirtAddr::new(0x1000),
            PhysAddr::new(0x2000),
            PageAttrs::kernel_data(),
        )
        .expect("map");
        assert_eq!(
            s.translate(VirtAddr::new(0x2000)),
            Err(KernelError::NotMapped)
        );
    }

    #[test]
    fn unmap_clears_and_flushes() {
        let mut s = space(PageFormat::Aarch64);
        let va = VirtAddr::new(0x40_0000);
        s.map(va, PhysAddr::new(0x8000_0000), PageAttrs::kernel_data())
            .expect("map");
        s.unmap(va).expect("unmap");
        assert_eq!(s.translate(va), Err(KernelError::NotMapped));
        assert_eq!(s.mem.flushes, 1);
        assert_eq!(s.unmap(va), Err(KernelError::NotMapped));
    }

    #[test]
    fn non_canonical_addresses_are_rejected() {
        // x86-64: bit 47 set without sign extension.
        // AArch64: top 16 bits neither all-zero nor all-one.
        let cases = [
            (PageFormat::X86_64, 0x0000_8000_0000_0000u64),
            (PageFormat::Aarch64, 0x00FF_0000_0000_0000u64),
        ];
        for (format, raw) in cases {
            let mut s = space(format);
            let va = VirtAddr::new(raw);
            assert!(matches!(
                s.map(va, PhysAddr::new(0x1000), PageAttrs::kernel_data()),
                Err(KernelError::InvalidArgument { .. })
            ));
            assert!(matches!(
                s.translate(va),
                Err(KernelError::InvalidArgument { .. })
            ));
        }
    }

    #[test]
    fn remap_may_weaken_but_not_strengthen() {
        let mut s = space(PageFormat::X86_64);
        let va = VirtAddr::new(0x7000);
        let pa = PhysAddr::new(0x9000);
        s.map(va, pa, PageAttrs::kernel_data()).expect("map");
        // Equal attrs: allowed.
        s.map(va, pa, PageAttrs::kernel_data()).expect("equal remap");
        // Dropping WRITE: allowed.
        s.map(va, pa, PageAttrs::READ | PageAttrs::CACHED)
            .expect("weakening remap");
        // Re-adding WRITE now strengthens: rejected.
        assert!(matches!(
            s.map(va, pa, PageAttrs::kernel_data()),
            Err(KernelError::InvalidArgument { .. })
        ));
        // Changing the frame requires an unmap first.
        assert!(matches!(
            s.map(va, PhysAddr::new(0xA000), PageAttrs::READ | PageAttrs::CACHED),
            Err(KernelError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn intermediate_allocation_failure_propagates() {
        let mut s = space(PageFormat::X86_64);
        s.mem.fail_alloc = true;
        assert!(matches!(
            s.map(
                VirtAddr::new(0x1000),
                PhysAddr::new(0x2000),
                PageAttrs::kernel_data()
            ),
            Err(KernelError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn x86_lowering_sets_documented_bits() {
        let f = PageFormat::X86_64;
        let pa = PhysAddr::new(0x1234_5000);
        let code = f.encode_leaf(pa, PageAttrs::kernel_code());
        assert_eq!(code & ADDR_MASK, 0x1234_5000);
        assert_ne!(code & X86_PRESENT, 0);
        assert_eq!(code & X86_WRITABLE, 0);
        assert_eq!(code & X86_NO_EXECUTE, 0);

        let data = f.encode_leaf(pa, PageAttrs::kernel_data());
        assert_ne!(data & X86_WRITABLE, 0);
        assert_ne!(data & X86_NO_EXECUTE, 0);

        let mmio = f.encode_leaf(pa, PageAttrs::device());
        assert_ne!(mmio & X86_NO_CACHE, 0);

        let user = f.encode_leaf(pa, PageAttrs::kernel_data() | PageAttrs::USER);
        assert_ne!(user & X86_USER, 0);
    }

    #[test]
    fn aarch64_lowering_sets_documented_bits() {
        let f = PageFormat::Aarch64;
        let pa = PhysAddr::new(0x4000_1000);
        let code = f.encode_leaf(pa, PageAttrs::kernel_code());
        assert_ne!(code & A64_VALID, 0);
        assert_ne!(code & A64_TYPE, 0);
        assert_ne!(code & A64_ACCESSED, 0);
        assert_ne!(code & A64_AP_RO, 0, "code pages are not writable");
        assert_eq!(code & A64_PXN, 0, "kernel code is privileged-executable");
        assert_ne!(code & A64_UXN, 0, "kernel code is not EL0-executable");

        let data = f.encode_leaf(pa, PageAttrs::kernel_data());
        assert_eq!(data & A64_AP_RO, 0);
        assert_ne!(data & A64_PXN, 0);
        assert_ne!(data & A64_UXN, 0);

        let mmio = f.encode_leaf(pa, PageAttrs::device());
        assert_ne!(mmio & A64_ATTR_DEVICE, 0, "device memory uses MAIR index 1");

        // Decode inverts encode on the capability bits.
        assert_eq!(f.decode_attrs(code), PageAttrs::kernel_code());
        assert_eq!(f.decode_attrs(data), PageAttrs::kernel_data());
    }

    #[test]
    fn canonical_rule_matches_architecture() {
        let f = PageFormat::X86_64;
        assert!(f.is_canonical(VirtAddr::new(0x0000_7FFF_FFFF_F000)));
        assert!(f.is_canonical(VirtAddr::new(0xFFFF_8000_0000_0000)));
        assert!(!f.is_canonical(VirtAddr::new(0x0001_0000_0000_0000)));
        assert!(!f.is_canonical(VirtAddr::new(0xFFFE_0000_0000_0000)));

        let a = PageFormat::Aarch64;
        assert!(a.is_canonical(VirtAddr::new(0xFFFF_0000_0000_0000)));
        assert!(!a.is_canonical(VirtAddr::new(0xFF00_0000_0000_0000)));
    }
}
