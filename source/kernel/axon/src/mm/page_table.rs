// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sv39 page-table entry and table layout.
//!
//! A raw entry is `(ppn << 10) | flags`: bits 0-7 carry V/R/W/X/U/G/A/D,
//! bits 8-9 are reserved for software, bits 10-53 hold the 44-bit PPN.

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use super::PAGE_SIZE;

/// Number of entries per Sv39 page-table page.
pub const PT_ENTRIES: usize = PAGE_SIZE / core::mem::size_of::<PageTableEntry>();
/// Bit position of the PPN field inside a raw entry.
pub const PPN_SHIFT: usize = 10;
/// Width of the Sv39 PPN field.
pub const PPN_BITS: usize = 44;
pub const PPN_MASK: usize = (1 << PPN_BITS) - 1;
/// Page-table levels walked by Sv39 (2 = root, 0 = last).
pub const LEVELS: usize = 3;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Flags stored in the low byte of an Sv39 PTE.
    pub struct PteFlags: usize {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
    }
}

/// Any of these set on a valid entry makes it a leaf.
pub const LEAF_PERMS: PteFlags = PteFlags::READ.union(PteFlags::WRITE).union(PteFlags::EXECUTE);

/// Physical page number (physical address >> 12).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysPageNum(pub usize);

impl PhysPageNum {
    pub const fn addr(self) -> usize {
        self.0 << 12
    }

    pub const fn containing(pa: usize) -> Self {
        Self(pa >> 12)
    }
}

/// What a PTE points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PteKind {
    /// `VALID` clear; walking through it is a page fault.
    Invalid,
    /// Valid with R/W/X clear; the PPN names the next-level table.
    Pointer,
    /// Valid with at least one of R/W/X set.
    Leaf,
}

/// One 64-bit Sv39 page-table entry.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageTableEntry(usize);

impl PageTableEntry {
    pub const EMPTY: Self = Self(0);

    pub const fn from_bits(bits: usize) -> Self {
        Self(bits)
    }

    pub fn new(ppn: PhysPageNum, flags: PteFlags) -> Self {
        Self(((ppn.0 & PPN_MASK) << PPN_SHIFT) | flags.bits())
    }

    /// Entry pointing at a lower-level table.
    pub fn pointer(table: PhysPageNum) -> Self {
        Self::new(table, PteFlags::VALID)
    }

    pub const fn bits(self) -> usize {
        self.0
    }

    pub const fn ppn(self) -> PhysPageNum {
        PhysPageNum((self.0 >> PPN_SHIFT) & PPN_MASK)
    }

    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    pub fn is_valid(self) -> bool {
        self.0 & PteFlags::VALID.bits() != 0
    }

    pub fn kind(self) -> PteKind {
        classify(self.0)
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("ppn", &format_args!("{:#x}", self.ppn().0))
            .field("flags", &self.flags())
            .finish()
    }
}

/// Classifies a raw entry by its V/R/W/X bits alone.
pub const fn classify(raw: usize) -> PteKind {
    if raw & PteFlags::VALID.bits() == 0 {
        PteKind::Invalid
    } else if raw & LEAF_PERMS.bits() != 0 {
        PteKind::Leaf
    } else {
        PteKind::Pointer
    }
}

/// One page worth of entries, indexed by a 9-bit VPN slice.
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [PageTableEntry; PT_ENTRIES],
}

const_assert_eq!(core::mem::size_of::<PageTable>(), PAGE_SIZE);
const_assert_eq!(core::mem::size_of::<PageTableEntry>(), 8);

impl PageTable {
    pub const fn new() -> Self {
        Self { entries: [PageTableEntry::EMPTY; PT_ENTRIES] }
    }

    pub fn clear(&mut self) {
        self.entries.fill(PageTableEntry::EMPTY);
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `va` into `[vpn0, vpn1, vpn2]`; index with the level number.
pub const fn vpn_indices(va: usize) -> [usize; LEVELS] {
    let vpn0 = (va >> 12) & 0x1ff;
    let vpn1 = (va >> 21) & 0x1ff;
    let vpn2 = (va >> 30) & 0x1ff;
    [vpn0, vpn1, vpn2]
}

pub const fn page_offset(va: usize) -> usize {
    va & (PAGE_SIZE - 1)
}

/// Bit 38 must be copied through bits 39..63.
pub const fn is_canonical_sv39(va: usize) -> bool {
    let sign = (va >> 38) & 1;
    let upper = va >> 39;
    if sign == 0 {
        upper == 0
    } else {
        upper == usize::MAX >> 39
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_ignores_other_bits() {
        let raw = PteFlags::READ.bits() | PteFlags::WRITE.bits() | (0x1234 << PPN_SHIFT);
        assert_eq!(classify(raw), PteKind::Invalid);
    }

    #[test]
    fn pointer_and_leaf_split_on_rwx() {
        assert_eq!(PageTableEntry::pointer(PhysPageNum(7)).kind(), PteKind::Pointer);
        let user_only = PageTableEntry::new(PhysPageNum(7), PteFlags::VALID | PteFlags::USER);
        assert_eq!(user_only.kind(), PteKind::Pointer);
        let exec = PageTableEntry::new(PhysPageNum(7), PteFlags::VALID | PteFlags::EXECUTE);
        assert_eq!(exec.kind(), PteKind::Leaf);
    }

    #[test]
    fn ppn_is_masked_to_44_bits() {
        let entry = PageTableEntry::from_bits(usize::MAX);
        assert_eq!(entry.ppn().0, PPN_MASK);
        assert_eq!(entry.flags(), PteFlags::all());
    }

    #[test]
    fn vpn_slices_match_sv39_layout() {
        let va = (3 << 30) | (5 << 21) | (7 << 12) | 0x20;
        assert_eq!(vpn_indices(va), [7, 5, 3]);
        assert_eq!(page_offset(va), 0x20);
    }

    #[test]
    fn canonical_addresses() {
        assert!(is_canonical_sv39(0));
        assert!(is_canonical_sv39((1 << 38) - 1));
        assert!(!is_canonical_sv39(1 << 38));
        assert!(is_canonical_sv39(0xffff_ffc0_0000_0000));
        assert!(is_canonical_sv39(0xffff_ffff_8020_0000));
    }

    #[test]
    fn table_is_one_zeroed_page() {
        let table = PageTable::new();
        assert!(table.entries.iter().all(|e| !e.is_valid()));
        assert_eq!(core::mem::align_of::<PageTable>(), PAGE_SIZE);
    }
}
