// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for Sv39 entry encoding
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCENARIOS:
//!   - ppn_and_flags_roundtrip(): `(ppn << 10) | flags` decodes back exactly
//!   - invalid_whenever_valid_clear(): V clear wins over every other bit
//!   - leaf_iff_any_rwx(): valid entries split on R/W/X

use super::page_table::{
    classify, vpn_indices, PageTableEntry, PhysPageNum, PteFlags, PteKind, LEAF_PERMS, PPN_MASK,
    PPN_SHIFT,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn ppn_and_flags_roundtrip(ppn in 0usize..=PPN_MASK, flags in any::<u8>()) {
        let raw = (ppn << PPN_SHIFT) | flags as usize;
        let entry = PageTableEntry::from_bits(raw);
        prop_assert_eq!(entry.ppn(), PhysPageNum(ppn));
        prop_assert_eq!(entry.flags().bits(), flags as usize);
        let rebuilt = PageTableEntry::new(PhysPageNum(ppn), PteFlags::from_bits_truncate(flags as usize));
        prop_assert_eq!(rebuilt.bits(), raw);
    }

    #[test]
    fn invalid_whenever_valid_clear(raw in any::<usize>()) {
        let raw = raw & !PteFlags::VALID.bits();
        prop_assert_eq!(classify(raw), PteKind::Invalid);
    }

    #[test]
    fn leaf_iff_any_rwx(raw in any::<usize>()) {
        let raw = raw | PteFlags::VALID.bits();
        let expected = if raw & LEAF_PERMS.bits() != 0 { PteKind::Leaf } else { PteKind::Pointer };
        prop_assert_eq!(classify(raw), expected);
    }

    #[test]
    fn vpn_slices_recompose(va in 0usize..(1 << 39)) {
        let [vpn0, vpn1, vpn2] = vpn_indices(va);
        prop_assert!(vpn0 < 512 && vpn1 < 512 && vpn2 < 512);
        prop_assert_eq!((vpn2 << 30) | (vpn1 << 21) | (vpn0 << 12) | (va & 0xfff), va);
    }
}
