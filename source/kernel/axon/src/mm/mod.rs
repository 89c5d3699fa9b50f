// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Virtual memory primitives for Sv39.

pub mod frame;
pub mod kernel;
pub mod mapping;
pub mod page_table;
pub mod walk;

pub use frame::{access_va_via_pa, FrameAllocator, PhysWindow};
pub use mapping::{new_kernel_mapping, MapError, Mapping, PageSize, Segment};
pub use page_table::{PageTable, PageTableEntry, PhysPageNum, PteFlags, PteKind};
pub use walk::{translate, TableReader, TranslateError};

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Kernel virtual addresses are physical addresses plus this offset.
pub const KERNEL_MAP_OFFSET: usize = 0xffff_ffff_0000_0000;

/// End of the physical RAM the kernel maps linearly (128 MiB from 0x8000_0000).
pub const MEMORY_END: usize = 0x8800_0000;

pub const fn align_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

pub const fn align_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

#[cfg(test)]
mod tests;
#[cfg(test)]
mod tests_prop;
