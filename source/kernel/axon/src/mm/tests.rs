// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unit tests for Sv39 mapping construction
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; tables live in host heap pages reached through an
//!       identity window, so the walker reads the real tree.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;

use super::kernel::{map_kernel_sections, KernelLayout};
use super::page_table::{PteKind, PT_ENTRIES};
use super::walk::{walk, TranslateError};
use super::{
    FrameAllocator, MapError, Mapping, PageSize, PhysPageNum, PhysWindow, PteFlags, Segment,
    KERNEL_MAP_OFFSET, PAGE_SIZE,
};

/// Page-aligned host pages handed out as frames; poisoned so zeroing is observable.
struct TestFrames {
    live: RefCell<BTreeSet<usize>>,
    limit: Cell<usize>,
}

impl TestFrames {
    fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    fn with_limit(limit: usize) -> Self {
        Self { live: RefCell::new(BTreeSet::new()), limit: Cell::new(limit) }
    }

    fn live(&self) -> usize {
        self.live.borrow().len()
    }

    fn layout() -> Layout {
        Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap()
    }
}

// SAFETY: frames are fresh page-aligned heap pages owned by the pool until
// returned, and the tests reach them through the identity window.
unsafe impl FrameAllocator for TestFrames {
    fn alloc_frame(&self) -> Option<PhysPageNum> {
        if self.limit.get() == 0 {
            return None;
        }
        self.limit.set(self.limit.get() - 1);
        let ptr = unsafe { alloc(Self::layout()) };
        assert!(!ptr.is_null());
        unsafe { ptr.write_bytes(0xa5, PAGE_SIZE) };
        let ppn = PhysPageNum::containing(ptr as usize);
        self.live.borrow_mut().insert(ppn.0);
        Some(ppn)
    }

    fn dealloc_frame(&self, ppn: PhysPageNum) {
        assert!(self.live.borrow_mut().remove(&ppn.0), "double free of {:#x}", ppn.0);
        unsafe { dealloc(ppn.addr() as *mut u8, Self::layout()) };
    }
}

impl Drop for TestFrames {
    fn drop(&mut self) {
        for ppn in self.live.borrow().iter() {
            unsafe { dealloc((ppn << 12) as *mut u8, Self::layout()) };
        }
    }
}

fn identity() -> PhysWindow {
    unsafe { PhysWindow::with_offset(0) }
}

fn rw() -> PteFlags {
    PteFlags::READ | PteFlags::WRITE
}

fn root_entries_valid(mapping: &Mapping<'_>) -> usize {
    let root = mapping.window().table_ptr(mapping.root_ppn());
    (0..PT_ENTRIES).filter(|&i| unsafe { (*root).entries[i].is_valid() }).count()
}

fn read_byte(pa: usize) -> u8 {
    unsafe { *(pa as *const u8) }
}

const KVA: usize = 0xffff_ffff_8020_0000;
const UVA: usize = 0x1000_0000;

#[test]
fn new_mapping_has_one_zeroed_root() {
    let frames = TestFrames::new();
    let mapping = Mapping::new(&frames, identity()).expect("root");
    assert_eq!(mapping.table_pages(), 1);
    assert_eq!(frames.live(), 1);
    assert_eq!(root_entries_valid(&mapping), 0);
    assert_eq!(mapping.translate(UVA), Err(TranslateError::PageFault { level: 2 }));
}

#[test]
fn satp_selects_sv39_and_root() {
    let frames = TestFrames::new();
    let mapping = Mapping::new(&frames, identity()).expect("root");
    assert_eq!(mapping.satp() >> 60, 8);
    assert_eq!(mapping.satp() & ((1 << 44) - 1), mapping.root_ppn().0);
}

#[test]
fn linear_segment_subtracts_kernel_offset() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    let segment = Segment::new(KVA, KVA + 4 * PAGE_SIZE, PteFlags::READ | PteFlags::EXECUTE);
    mapping.map_linear_segment(segment).expect("map");

    assert_eq!(mapping.table_pages(), 3);
    for va in segment.pages() {
        assert_eq!(mapping.translate(va + 0x18), Ok(va - KERNEL_MAP_OFFSET + 0x18));
    }
    let leaf = walk(KVA, mapping.root_ppn(), &mapping.window()).expect("leaf");
    assert_eq!(leaf.level, 0);
    assert_eq!(leaf.entry.kind(), PteKind::Leaf);
    assert_eq!(leaf.entry.flags(), PteFlags::VALID | PteFlags::READ | PteFlags::EXECUTE);
    assert_eq!(mapping.translate(KVA + 4 * PAGE_SIZE), Err(TranslateError::PageFault { level: 0 }));
}

#[test]
fn linear_offset_can_be_overridden() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root").with_linear_offset(0);
    mapping.map_linear_segment(Segment::new(0x8000_0000, 0x8000_2000, rw())).expect("map");
    assert_eq!(mapping.translate(0x8000_1234), Ok(0x8000_1234));
}

#[test]
fn framed_segment_gets_distinct_zeroed_frames() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    let segment = Segment::new(UVA, UVA + 3 * PAGE_SIZE, rw() | PteFlags::USER);
    mapping.map_framed_segment(segment).expect("map");

    assert_eq!(mapping.framed_pages(), 3);
    let mut seen = BTreeSet::new();
    for va in segment.pages() {
        let pa = mapping.translate(va).expect("mapped");
        assert!(seen.insert(pa));
        assert!(frames.live.borrow().contains(&(pa >> 12)));
        assert_eq!(read_byte(pa), 0);
        assert_eq!(read_byte(pa + PAGE_SIZE - 1), 0);
    }
    let leaf = walk(UVA, mapping.root_ppn(), &mapping.window()).expect("leaf");
    assert!(leaf.entry.flags().contains(PteFlags::USER | PteFlags::VALID));
}

#[test]
fn framed_copy_fills_in_va_order_and_zero_pads() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    let data: Vec<u8> = (0..PAGE_SIZE + 100).map(|i| (i % 251) as u8 + 1).collect();
    let segment = Segment::new(UVA, UVA + 2 * PAGE_SIZE, PteFlags::READ | PteFlags::EXECUTE);
    mapping.map_framed_and_copy(segment, &data).expect("map");

    for (offset, byte) in data.iter().enumerate() {
        let pa = mapping.translate(UVA + offset).expect("mapped");
        assert_eq!(read_byte(pa), *byte, "offset {offset}");
    }
    for offset in data.len()..2 * PAGE_SIZE {
        let pa = mapping.translate(UVA + offset).expect("mapped");
        assert_eq!(read_byte(pa), 0, "offset {offset}");
    }
}

#[test]
fn framed_copy_ignores_bytes_past_segment() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    let data = vec![0x7f; 3 * PAGE_SIZE];
    mapping
        .map_framed_and_copy(Segment::new(UVA, UVA + PAGE_SIZE, rw()), &data)
        .expect("map");
    assert_eq!(mapping.framed_pages(), 1);
    let pa = mapping.translate(UVA + PAGE_SIZE - 1).expect("mapped");
    assert_eq!(read_byte(pa), 0x7f);
}

#[test]
fn unaligned_segments_leave_tree_untouched() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    let bad_start = Segment::new(UVA + 8, UVA + PAGE_SIZE, rw());
    let bad_end = Segment::new(UVA, UVA + PAGE_SIZE + 1, rw());
    assert_eq!(mapping.map_linear_segment(bad_start), Err(MapError::Unaligned));
    assert_eq!(mapping.map_framed_segment(bad_end), Err(MapError::Unaligned));
    assert_eq!(mapping.map_framed_and_copy(bad_start, &[1, 2, 3]), Err(MapError::Unaligned));
    assert_eq!(mapping.table_pages(), 1);
    assert_eq!(frames.live(), 1);
    assert_eq!(root_entries_valid(&mapping), 0);
}

#[test]
fn degenerate_segments_rejected() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    assert_eq!(
        mapping.map_framed_segment(Segment::new(UVA, UVA, rw())),
        Err(MapError::EmptySegment)
    );
    assert_eq!(
        mapping.map_framed_segment(Segment::new(UVA, UVA + PAGE_SIZE, PteFlags::USER)),
        Err(MapError::InvalidFlags)
    );
    assert_eq!(
        mapping.map_linear_segment(Segment::new(1 << 38, (1 << 38) + PAGE_SIZE, rw())),
        Err(MapError::OutOfRange)
    );
    assert_eq!(frames.live(), 1);
}

#[test]
fn overlapping_segment_fails_and_preserves_first() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    let first = Segment::new(UVA, UVA + 2 * PAGE_SIZE, rw());
    mapping.map_framed_segment(first).expect("first");
    let before: Vec<_> = first.pages().map(|va| mapping.translate(va)).collect();
    let tables = mapping.table_pages();
    let live = frames.live();

    let second = Segment::new(UVA + PAGE_SIZE, UVA + 4 * PAGE_SIZE, rw());
    assert_eq!(mapping.map_framed_segment(second), Err(MapError::Overlap));
    assert_eq!(mapping.map_linear_segment(second), Err(MapError::Overlap));

    let after: Vec<_> = first.pages().map(|va| mapping.translate(va)).collect();
    assert_eq!(before, after);
    assert_eq!(mapping.table_pages(), tables);
    assert_eq!(frames.live(), live);
    assert!(mapping.translate(UVA + 3 * PAGE_SIZE).is_err());
}

#[test]
fn drop_returns_every_table_and_frame() {
    let frames = TestFrames::new();
    {
        let mut mapping = Mapping::new(&frames, identity()).expect("root");
        mapping.map_framed_segment(Segment::new(UVA, UVA + 2 * PAGE_SIZE, rw())).expect("user");
        // A second L2 slot forces another L1/L0 pair.
        mapping.map_linear_segment(Segment::new(KVA, KVA + PAGE_SIZE, rw())).expect("kernel");
        assert_eq!(mapping.table_pages(), 5);
        assert_eq!(frames.live(), 7);
    }
    assert_eq!(frames.live(), 0);
}

#[test]
fn exhausted_allocator_reports_out_of_memory() {
    let frames = TestFrames::with_limit(1);
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    assert_eq!(
        mapping.map_linear_segment(Segment::new(KVA, KVA + PAGE_SIZE, rw())),
        Err(MapError::OutOfMemory)
    );
    let none = TestFrames::with_limit(0);
    assert!(matches!(Mapping::new(&none, identity()), Err(MapError::OutOfMemory)));
}

#[test]
fn gigapage_leaf_short_circuits_walk() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    mapping.map_page(3 << 30, 0x4000_0000, PageSize::Size1G, PteFlags::READ).expect("map");
    assert_eq!(mapping.table_pages(), 1);
    let va = (3 << 30) | (5 << 21) | (7 << 12) | 0x20;
    assert_eq!(mapping.translate(va), Ok(0x4000_0000 + (5 << 21) + (7 << 12) + 0x20));
}

#[test]
fn megapage_leaf_lives_at_level_one() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    mapping.map_page(0x20_0000, 0x8020_0000, PageSize::Size2M, rw()).expect("map");
    let leaf = walk(0x2f_f123, mapping.root_ppn(), &mapping.window()).expect("leaf");
    assert_eq!(leaf.level, 1);
    assert_eq!(leaf.pa, 0x802f_f123);
}

#[test]
fn superpages_reject_misalignment_and_shadowing() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    assert_eq!(
        mapping.map_page(0x20_0000, 0x8000_1000, PageSize::Size2M, rw()),
        Err(MapError::Unaligned)
    );
    mapping.map_page(0, 0, PageSize::Size1G, rw()).expect("giga");
    assert_eq!(
        mapping.map_framed_segment(Segment::new(PAGE_SIZE, 2 * PAGE_SIZE, rw())),
        Err(MapError::Overlap)
    );
    mapping.map_page(1 << 30, 0, PageSize::Size4K, rw()).expect("small");
    assert_eq!(
        mapping.map_page(1 << 30, 0, PageSize::Size1G, rw()),
        Err(MapError::Overlap)
    );
}

#[test]
fn kernel_sections_mapped_with_section_permissions() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    let layout = KernelLayout {
        text: KVA..KVA + 0x2000,
        rodata: KVA + 0x2000..KVA + 0x2000,
        data: KVA + 0x2000..KVA + 0x2800,
        bss: KVA + 0x3000..KVA + 0x3100,
        memory_end: KVA + 0x6000,
    };
    map_kernel_sections(&mut mapping, &layout).expect("map");

    let flags_at = |va| walk(va, mapping.root_ppn(), &mapping.window()).expect("leaf").entry.flags();
    assert!(flags_at(KVA).contains(PteFlags::EXECUTE | PteFlags::GLOBAL));
    assert!(!flags_at(KVA + 0x1000).contains(PteFlags::WRITE));
    assert!(flags_at(KVA + 0x2000).contains(PteFlags::WRITE));
    assert!(flags_at(KVA + 0x5000).contains(PteFlags::WRITE));
    assert_eq!(mapping.translate(KVA + 0x3010), Ok(0x8020_3010));
    assert!(mapping.translate(KVA + 0x6000).is_err());
    assert_eq!(layout.segments().count(), 4);
}

#[cfg(feature = "debug_pt_verify")]
#[test]
#[should_panic(expected = "PT-VERIFY")]
fn verifier_halts_when_page_lands_elsewhere() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    let segment = Segment::new(UVA, UVA + 2 * PAGE_SIZE, rw());
    mapping.map_framed_segment(segment).expect("map");
    let pa = mapping.translate(UVA).expect("mapped");
    // Both pages claimed to share the first frame; the second must trip.
    mapping.verify(&segment, |_| pa);
}

#[cfg(feature = "debug_pt_verify")]
#[test]
fn verifier_accepts_frames_in_allocation_order() {
    let frames = TestFrames::new();
    let mut mapping = Mapping::new(&frames, identity()).expect("root");
    let segment = Segment::new(UVA, UVA + 3 * PAGE_SIZE, rw());
    mapping.map_framed_segment(segment).expect("map");
    let pages: Vec<usize> = segment.pages().map(|va| mapping.translate(va).expect("mapped")).collect();
    mapping.verify(&segment, |va| pages[(va - UVA) / PAGE_SIZE]);
}
