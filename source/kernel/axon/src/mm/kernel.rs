// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel image mapping built at boot
//! OWNERS: @kernel-mm-team
//! PUBLIC API: KernelLayout, map_kernel_sections(), build_kernel_mapping()
//! DEPENDS_ON: mm::mapping, linker symbols (OS target)
//! INVARIANTS: Sections mapped linearly at KERNEL_MAP_OFFSET; text never writable

use core::ops::Range;

use super::frame::FrameAllocator;
use super::mapping::{new_kernel_mapping, MapError, Mapping, Segment};
use super::page_table::PteFlags;
use super::{align_down, align_up};

/// Kernel virtual ranges of each image section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelLayout {
    pub text: Range<usize>,
    pub rodata: Range<usize>,
    pub data: Range<usize>,
    pub bss: Range<usize>,
    /// Kernel virtual end of linearly mapped RAM.
    pub memory_end: usize,
}

impl KernelLayout {
    /// Reads the section bounds exported by the linker script.
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    pub fn from_linker() -> Self {
        use crate::mm::{KERNEL_MAP_OFFSET, MEMORY_END};

        extern "C" {
            static stext: u8;
            static etext: u8;
            static srodata: u8;
            static erodata: u8;
            static sdata: u8;
            static edata: u8;
            static sbss: u8;
            static ebss: u8;
        }
        fn addr(sym: &u8) -> usize {
            sym as *const u8 as usize
        }
        // SAFETY: only the addresses of the linker symbols are taken.
        unsafe {
            Self {
                text: addr(&stext)..addr(&etext),
                rodata: addr(&srodata)..addr(&erodata),
                data: addr(&sdata)..addr(&edata),
                bss: addr(&sbss)..addr(&ebss),
                memory_end: MEMORY_END + KERNEL_MAP_OFFSET,
            }
        }
    }

    /// Segments to map, in address order; empty sections are dropped.
    ///
    /// Sections must start on page boundaries (the linker script aligns them);
    /// otherwise neighbouring sections share a page and the second one fails
    /// with `Overlap`.
    pub fn segments(&self) -> impl Iterator<Item = (&'static str, Segment)> {
        let rx = PteFlags::READ | PteFlags::EXECUTE | PteFlags::GLOBAL;
        let ro = PteFlags::READ | PteFlags::GLOBAL;
        let rw = PteFlags::READ | PteFlags::WRITE | PteFlags::GLOBAL;
        let sections = [
            ("text", self.text.clone(), rx),
            ("rodata", self.rodata.clone(), ro),
            ("data", self.data.clone(), rw),
            ("bss", self.bss.clone(), rw),
            ("ram", align_up(self.bss.end)..self.memory_end, rw),
        ];
        sections
            .into_iter()
            .map(|(name, range, flags)| {
                (name, Segment::new(align_down(range.start), align_up(range.end), flags))
            })
            .filter(|(_, segment)| segment.start_vaddr < segment.end_vaddr)
    }
}

/// Maps the kernel image and the rest of RAM into `mapping`.
pub fn map_kernel_sections(mapping: &mut Mapping<'_>, layout: &KernelLayout) -> Result<(), MapError> {
    for (name, segment) in layout.segments() {
        if let Err(err) = mapping.map_linear_segment(segment) {
            log_error!(
                target: "mm",
                "kernel map: {} {:#x}..{:#x} failed: {:?}",
                name,
                segment.start_vaddr,
                segment.end_vaddr,
                err
            );
            return Err(err);
        }
    }
    log_info!(target: "mm", "kernel map: {} table pages", mapping.table_pages());
    Ok(())
}

/// Builds the boot address space; any failure here halts the kernel.
pub fn build_kernel_mapping<'f>(
    allocator: &'f dyn FrameAllocator,
    layout: &KernelLayout,
) -> Mapping<'f> {
    let mut mapping = match new_kernel_mapping(allocator) {
        Ok(mapping) => mapping,
        Err(err) => panic!("kernel map: root allocation failed: {:?}", err),
    };
    if let Err(err) = map_kernel_sections(&mut mapping, layout) {
        panic!("kernel map: {:?}", err);
    }
    mapping
}
