// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Software Sv39 walker.
//!
//! Mirrors what the MMU does with the tables this crate builds: index the
//! root with vpn2, stop at the first leaf, fault on the first invalid entry.
//! A leaf found above level 0 is a superpage and the untranslated low VPN
//! slices of `va` pass straight into the physical address.

use super::page_table::{page_offset, vpn_indices, PageTableEntry, PhysPageNum, PteKind, LEVELS};

/// Read access to page-table pages by physical page number.
pub trait TableReader {
    fn read_entry(&self, table: PhysPageNum, index: usize) -> PageTableEntry;
}

impl<T: TableReader + ?Sized> TableReader for &T {
    fn read_entry(&self, table: PhysPageNum, index: usize) -> PageTableEntry {
        (**self).read_entry(table, index)
    }
}

/// Reasons a walk stops without a physical address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranslateError {
    /// The entry at `level` along the path has `VALID` clear.
    PageFault { level: usize },
    /// A level-0 entry is valid but not a leaf.
    Malformed,
}

/// Leaf reached by a successful walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Translation {
    pub pa: usize,
    /// 2 for a 1 GiB page, 1 for 2 MiB, 0 for 4 KiB.
    pub level: usize,
    pub entry: PageTableEntry,
}

/// Walks from `root` and returns the leaf mapping `va`.
pub fn walk<R: TableReader + ?Sized>(
    va: usize,
    root: PhysPageNum,
    reader: &R,
) -> Result<Translation, TranslateError> {
    let vpn = vpn_indices(va);
    let mut table = root;
    for level in (0..LEVELS).rev() {
        let entry = reader.read_entry(table, vpn[level]);
        match entry.kind() {
            PteKind::Invalid => {
                log_trace!(target: "walk", "page fault at L{} va={:#x}", level, va);
                return Err(TranslateError::PageFault { level });
            }
            PteKind::Leaf => {
                let pa = compose(entry.ppn(), va, level);
                log_trace!(target: "walk", "stop at L{} {:#x} -> {:#x}", level, va, pa);
                return Ok(Translation { pa, level, entry });
            }
            PteKind::Pointer if level == 0 => {
                log_trace!(target: "walk", "non-leaf at L0 va={:#x}", va);
                return Err(TranslateError::Malformed);
            }
            PteKind::Pointer => table = entry.ppn(),
        }
    }
    Err(TranslateError::Malformed)
}

/// Physical address of `va`, or the reason the MMU would refuse it.
pub fn translate<R: TableReader + ?Sized>(
    va: usize,
    root: PhysPageNum,
    reader: &R,
) -> Result<usize, TranslateError> {
    walk(va, root, reader).map(|leaf| leaf.pa)
}

/// `(ppn << 12)` ORed with every VPN slice below `level` and the page offset.
fn compose(ppn: PhysPageNum, va: usize, level: usize) -> usize {
    let vpn = vpn_indices(va);
    let mut pa = ppn.addr() | page_offset(va);
    for below in 0..level {
        pa |= vpn[below] << (12 + 9 * below);
    }
    pa
}
