// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Physical frames: the allocator seam and the kernel's linear window onto
//! physical memory.

use super::page_table::{PageTable, PageTableEntry, PhysPageNum};
use super::walk::TableReader;
use super::{KERNEL_MAP_OFFSET, PAGE_SIZE};

/// Source of 4 KiB physical frames.
///
/// Allocation policy lives outside this crate; mappings only ask for pages and
/// give every one of them back when they are torn down.
///
/// # Safety
///
/// Every frame returned by `alloc_frame` must be a whole 4 KiB physical page
/// that nothing else reads or writes until it comes back through
/// `dealloc_frame`, and it must be mapped writable through the
/// [`PhysWindow`] of every mapping that uses this allocator. Mappings zero and
/// fill returned frames through that window without further checks.
pub unsafe trait FrameAllocator {
    /// Returns a fresh frame, or `None` once physical memory is exhausted.
    fn alloc_frame(&self) -> Option<PhysPageNum>;
    /// Returns `ppn` to the pool.
    fn dealloc_frame(&self, ppn: PhysPageNum);
}

/// Virtual window through which the kernel reaches physical memory.
///
/// Physical address `pa` is readable and writable at `pa + offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhysWindow {
    offset: usize,
}

impl PhysWindow {
    /// The boot-time linear map: every physical page sits at
    /// `pa + KERNEL_MAP_OFFSET`.
    pub const KERNEL: Self = Self { offset: KERNEL_MAP_OFFSET };

    /// Builds a window with an arbitrary offset.
    ///
    /// # Safety
    ///
    /// Every frame handed to code using this window must be mapped, writable,
    /// and exclusively owned at `pa + offset`.
    pub const unsafe fn with_offset(offset: usize) -> Self {
        Self { offset }
    }

    pub const fn offset(self) -> usize {
        self.offset
    }

    /// Virtual address usable to reach `pa` directly.
    pub const fn access_va_via_pa(self, pa: usize) -> usize {
        pa.wrapping_add(self.offset)
    }

    pub(crate) fn table_ptr(self, ppn: PhysPageNum) -> *mut PageTable {
        self.access_va_via_pa(ppn.addr()) as *mut PageTable
    }

    pub(crate) fn frame_ptr(self, ppn: PhysPageNum) -> *mut [u8; PAGE_SIZE] {
        self.access_va_via_pa(ppn.addr()) as *mut [u8; PAGE_SIZE]
    }
}

impl TableReader for PhysWindow {
    fn read_entry(&self, table: PhysPageNum, index: usize) -> PageTableEntry {
        let table = self.table_ptr(table);
        // SAFETY: the window contract makes every table page readable; `index`
        // comes from a 9-bit VPN slice.
        unsafe { core::ptr::read_volatile(core::ptr::addr_of!((*table).entries[index & 0x1ff])) }
    }
}

/// Kernel virtual address aliasing physical address `pa`.
pub const fn access_va_via_pa(pa: usize) -> usize {
    PhysWindow::KERNEL.access_va_via_pa(pa)
}
