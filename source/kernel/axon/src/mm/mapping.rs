// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Address-space page-table trees built segment by segment.
//!
//! A [`Mapping`] owns its root table, every intermediate table allocated on
//! demand beneath it, and every frame it allocated for framed segments. All of
//! them go back to the frame allocator when the mapping is dropped.


use alloc::{vec, vec::Vec};

use super::frame::{FrameAllocator, PhysWindow};
use super::page_table::{
    is_canonical_sv39, vpn_indices, PageTable, PageTableEntry, PhysPageNum, PteFlags, PteKind,
    LEAF_PERMS, LEVELS, PPN_MASK,
};
use super::walk::{self, TranslateError};
use super::{KERNEL_MAP_OFFSET, PAGE_SIZE};

/// `satp.MODE` value selecting Sv39.
const SATP_MODE_SV39: usize = 8;

/// Error returned when building mappings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// Virtual or physical address was not aligned to the page size in use.
    Unaligned,
    /// Address is not canonical Sv39 or the PPN does not fit in 44 bits.
    OutOfRange,
    /// Range collides with an existing valid entry.
    Overlap,
    /// Flags grant none of R/W/X and would encode a table pointer.
    InvalidFlags,
    /// The frame allocator ran dry.
    OutOfMemory,
    /// Segment start is not below its end.
    EmptySegment,
}

/// Leaf sizes Sv39 can install.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageSize {
    Size4K,
    Size2M,
    Size1G,
}

impl PageSize {
    /// Level at which the leaf lives.
    pub const fn level(self) -> usize {
        match self {
            PageSize::Size4K => 0,
            PageSize::Size2M => 1,
            PageSize::Size1G => 2,
        }
    }

    pub const fn bytes(self) -> usize {
        PAGE_SIZE << (9 * self.level())
    }
}

/// Half-open virtual range whose pages all carry the same flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub start_vaddr: usize,
    pub end_vaddr: usize,
    pub flags: PteFlags,
}

impl Segment {
    pub const fn new(start_vaddr: usize, end_vaddr: usize, flags: PteFlags) -> Self {
        Self { start_vaddr, end_vaddr, flags }
    }

    /// Checks alignment, ordering, canonical form and leaf permissions.
    pub fn validate(&self) -> Result<(), MapError> {
        if self.start_vaddr % PAGE_SIZE != 0 || self.end_vaddr % PAGE_SIZE != 0 {
            return Err(MapError::Unaligned);
        }
        if self.start_vaddr >= self.end_vaddr {
            return Err(MapError::EmptySegment);
        }
        if !is_canonical_sv39(self.start_vaddr) || !is_canonical_sv39(self.end_vaddr - 1) {
            return Err(MapError::OutOfRange);
        }
        if self.flags.intersection(LEAF_PERMS).is_empty() {
            return Err(MapError::InvalidFlags);
        }
        Ok(())
    }

    pub fn page_count(&self) -> usize {
        (self.end_vaddr - self.start_vaddr) / PAGE_SIZE
    }

    /// Page-aligned virtual addresses covered by the segment.
    pub fn pages(&self) -> impl Iterator<Item = usize> {
        (self.start_vaddr..self.end_vaddr).step_by(PAGE_SIZE)
    }

    fn leaf_flags(&self) -> PteFlags {
        self.flags | PteFlags::VALID
    }
}

/// One address space's Sv39 tree, identified by its root PPN.
pub struct Mapping<'f> {
    root: PhysPageNum,
    tables: Vec<PhysPageNum>,
    frames: Vec<PhysPageNum>,
    allocator: &'f dyn FrameAllocator,
    window: PhysWindow,
    linear_offset: usize,
}

/// Allocates the root table for a fresh address space reached through the
/// kernel's linear window.
pub fn new_kernel_mapping(allocator: &dyn FrameAllocator) -> Result<Mapping<'_>, MapError> {
    Mapping::new(allocator, PhysWindow::KERNEL)
}

impl<'f> Mapping<'f> {
    /// Allocates and zeroes a root table; every entry starts invalid.
    pub fn new(allocator: &'f dyn FrameAllocator, window: PhysWindow) -> Result<Self, MapError> {
        let root = allocator.alloc_frame().ok_or(MapError::OutOfMemory)?;
        let mapping = Self {
            root,
            tables: vec![root],
            frames: Vec::new(),
            allocator,
            window,
            linear_offset: KERNEL_MAP_OFFSET,
        };
        mapping.zero_table(root);
        log_debug!(target: "mm", "mapping: root ppn={:#x}", root.0);
        Ok(mapping)
    }

    /// Overrides `va - pa` used by [`Mapping::map_linear_segment`].
    pub fn with_linear_offset(mut self, offset: usize) -> Self {
        self.linear_offset = offset;
        self
    }

    pub fn root_ppn(&self) -> PhysPageNum {
        self.root
    }

    pub fn window(&self) -> PhysWindow {
        self.window
    }

    /// Table pages owned by this mapping, root included.
    pub fn table_pages(&self) -> usize {
        self.tables.len()
    }

    /// Data frames allocated for framed segments.
    pub fn framed_pages(&self) -> usize {
        self.frames.len()
    }

    /// `satp` value selecting this tree under Sv39 with ASID 0.
    pub fn satp(&self) -> usize {
        (SATP_MODE_SV39 << 60) | self.root.0
    }

    /// Switches the hart to this address space and flushes the TLB.
    ///
    /// # Safety
    ///
    /// The code, stack and data the caller runs on must be mapped identically
    /// in this tree.
    pub unsafe fn activate(&self) {
        crate::arch::riscv::write_satp(self.satp());
        log_info!(target: "mm", "satp <- {:#x}", self.satp());
    }

    /// Maps every page of `segment` to `va - linear_offset`.
    pub fn map_linear_segment(&mut self, segment: Segment) -> Result<(), MapError> {
        segment.validate()?;
        self.check_range_free(&segment)?;
        let offset = self.linear_offset;
        for va in segment.pages() {
            self.install(va, va.wrapping_sub(offset), PageSize::Size4K, segment.leaf_flags())?;
        }
        self.verify(&segment, |va| va.wrapping_sub(offset));
        log_debug!(target: "mm", "linear {:#x}..{:#x}", segment.start_vaddr, segment.end_vaddr);
        Ok(())
    }

    /// Backs every page of `segment` with a freshly allocated, zeroed frame.
    pub fn map_framed_segment(&mut self, segment: Segment) -> Result<(), MapError> {
        self.map_framed_with(segment, |_, _| {})
    }

    /// As [`Mapping::map_framed_segment`], then copies `data` into the frames
    /// in virtual-address order. Bytes past the segment are ignored; the rest
    /// of the last page stays zero.
    pub fn map_framed_and_copy(&mut self, segment: Segment, data: &[u8]) -> Result<(), MapError> {
        self.map_framed_with(segment, |page, frame| {
            let start = page * PAGE_SIZE;
            if start < data.len() {
                let chunk = &data[start..data.len().min(start + PAGE_SIZE)];
                frame[..chunk.len()].copy_from_slice(chunk);
            }
        })
    }

    /// Installs one leaf of `size` mapping `va` to `pa`.
    pub fn map_page(
        &mut self,
        va: usize,
        pa: usize,
        size: PageSize,
        flags: PteFlags,
    ) -> Result<(), MapError> {
        if va % size.bytes() != 0 || pa % size.bytes() != 0 {
            return Err(MapError::Unaligned);
        }
        if !is_canonical_sv39(va) {
            return Err(MapError::OutOfRange);
        }
        if flags.intersection(LEAF_PERMS).is_empty() {
            return Err(MapError::InvalidFlags);
        }
        self.check_free(va, size.level())?;
        self.install(va, pa, size, flags | PteFlags::VALID)
    }

    /// Runs the software walker over this tree.
    pub fn translate(&self, va: usize) -> Result<usize, TranslateError> {
        walk::translate(va, self.root, &self.window)
    }

    fn map_framed_with(
        &mut self,
        segment: Segment,
        mut fill: impl FnMut(usize, &mut [u8; PAGE_SIZE]),
    ) -> Result<(), MapError> {
        segment.validate()?;
        self.check_range_free(&segment)?;
        let first = self.frames.len();
        for (page, va) in segment.pages().enumerate() {
            let frame = self.allocator.alloc_frame().ok_or(MapError::OutOfMemory)?;
            self.frames.push(frame);
            // SAFETY: the frame was just handed to us and is reachable through
            // the window; nothing else aliases it.
            let bytes = unsafe { &mut *self.window.frame_ptr(frame) };
            bytes.fill(0);
            fill(page, bytes);
            self.install(va, frame.addr(), PageSize::Size4K, segment.leaf_flags())?;
        }
        log_debug!(
            target: "mm",
            "framed {:#x}..{:#x} ({} pages)",
            segment.start_vaddr,
            segment.end_vaddr,
            segment.page_count()
        );
        let frames = &self.frames[first..];
        self.verify(&segment, |va| frames[(va - segment.start_vaddr) / PAGE_SIZE].addr());
        Ok(())
    }

    /// Rejects the whole segment before any table is touched if one of its
    /// pages is already reachable.
    fn check_range_free(&self, segment: &Segment) -> Result<(), MapError> {
        for va in segment.pages() {
            if let Err(err) = self.check_free(va, 0) {
                log_error!(
                    target: "mm",
                    "overlap at {:#x} in {:#x}..{:#x}",
                    va,
                    segment.start_vaddr,
                    segment.end_vaddr
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// `Ok` when a leaf at `level` for `va` would not shadow anything valid.
    fn check_free(&self, va: usize, level: usize) -> Result<(), MapError> {
        let vpn = vpn_indices(va);
        let mut table = self.root;
        for current in (level..LEVELS).rev() {
            let entry = self.table(table).entries[vpn[current]];
            match entry.kind() {
                PteKind::Invalid => return Ok(()),
                PteKind::Leaf => return Err(MapError::Overlap),
                PteKind::Pointer if current == level => return Err(MapError::Overlap),
                PteKind::Pointer => table = entry.ppn(),
            }
        }
        Ok(())
    }

    /// Walks to `size.level()`, allocating missing tables, and writes the leaf.
    fn install(
        &mut self,
        va: usize,
        pa: usize,
        size: PageSize,
        flags: PteFlags,
    ) -> Result<(), MapError> {
        let ppn = PhysPageNum::containing(pa);
        if ppn.0 > PPN_MASK {
            return Err(MapError::OutOfRange);
        }
        let vpn = vpn_indices(va);
        let target = size.level();
        let mut table = self.root;
        for level in (target + 1..LEVELS).rev() {
            let entry = self.table(table).entries[vpn[level]];
            table = match entry.kind() {
                PteKind::Pointer => entry.ppn(),
                PteKind::Leaf => return Err(MapError::Overlap),
                PteKind::Invalid => {
                    let next = self.allocator.alloc_frame().ok_or(MapError::OutOfMemory)?;
                    self.tables.push(next);
                    self.zero_table(next);
                    self.table_mut(table).entries[vpn[level]] = PageTableEntry::pointer(next);
                    next
                }
            };
        }
        let slot = &mut self.table_mut(table).entries[vpn[target]];
        if slot.is_valid() {
            return Err(MapError::Overlap);
        }
        *slot = PageTableEntry::new(ppn, flags);
        Ok(())
    }

    /// Walks every page of `segment` and halts unless it lands on `expected(va)`.
    #[cfg(feature = "debug_pt_verify")]
    pub(super) fn verify(&self, segment: &Segment, expected: impl Fn(usize) -> usize) {
        for va in segment.pages() {
            match self.translate(va) {
                Ok(pa) if pa == expected(va) => {}
                other => panic!("PT-VERIFY: {:#x} -> {:?}, want {:#x}", va, other, expected(va)),
            }
        }
    }

    #[cfg(not(feature = "debug_pt_verify"))]
    fn verify(&self, _segment: &Segment, _expected: impl Fn(usize) -> usize) {}

    fn zero_table(&self, ppn: PhysPageNum) {
        // SAFETY: `ppn` is a table page owned by this mapping.
        unsafe { (*self.window.table_ptr(ppn)).clear() };
    }

    fn table(&self, ppn: PhysPageNum) -> &PageTable {
        // SAFETY: every table reachable from the root was allocated by this
        // mapping and is mapped through the window.
        unsafe { &*self.window.table_ptr(ppn) }
    }

    fn table_mut(&mut self, ppn: PhysPageNum) -> &mut PageTable {
        // SAFETY: as in `table`; `&mut self` makes the access exclusive.
        unsafe { &mut *self.window.table_ptr(ppn) }
    }
}

impl Drop for Mapping<'_> {
    fn drop(&mut self) {
        for frame in self.frames.drain(..) {
            self.allocator.dealloc_frame(frame);
        }
        for table in self.tables.drain(..) {
            self.allocator.dealloc_frame(table);
        }
    }
}
