// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Memory-mapped register access for board and IRQ code
//! OWNERS: @kernel-arch-team
//! PUBLIC API: Mmio, Reg<T>, MmioRegion
//! INVARIANTS: Every access is a single volatile load/store of the stated
//!             width at the stated address; creation is the only unsafe step

use core::marker::PhantomData;
use core::ptr::{read_volatile, write_volatile};

/// Register window of one device.
///
/// Offsets are relative to the device base. Implemented by [`MmioRegion`] on
/// hardware and by simulated devices in tests.
pub trait Mmio {
    fn read8(&self, offset: usize) -> u8;
    fn write8(&self, offset: usize, value: u8);
    fn read32(&self, offset: usize) -> u32;
    fn write32(&self, offset: usize, value: u32);
}

impl<T: Mmio + ?Sized> Mmio for &T {
    fn read8(&self, offset: usize) -> u8 {
        (**self).read8(offset)
    }
    fn write8(&self, offset: usize, value: u8) {
        (**self).write8(offset, value)
    }
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }
    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

/// Typed volatile register at a fixed address.
pub struct Reg<T> {
    addr: usize,
    _width: PhantomData<T>,
}

impl<T: Copy> Reg<T> {
    /// # Safety
    ///
    /// `addr` must be a mapped device register (or memory) valid for volatile
    /// accesses of `size_of::<T>()` bytes for as long as the value is used.
    pub const unsafe fn new(addr: usize) -> Self {
        Self { addr, _width: PhantomData }
    }

    #[inline]
    pub fn read(&self) -> T {
        // SAFETY: guaranteed by the constructor contract.
        unsafe { read_volatile(self.addr as *const T) }
    }

    #[inline]
    pub fn write(&self, value: T) {
        // SAFETY: guaranteed by the constructor contract.
        unsafe { write_volatile(self.addr as *mut T, value) }
    }
}

/// A device's register block at a fixed (kernel virtual) base address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MmioRegion {
    base: usize,
}

impl MmioRegion {
    /// # Safety
    ///
    /// Every offset the caller uses must land on a register of the device
    /// mapped at `base`.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub const fn base(&self) -> usize {
        self.base
    }

    fn reg<T: Copy>(&self, offset: usize) -> Reg<T> {
        // SAFETY: covered by the `MmioRegion::new` contract.
        unsafe { Reg::new(self.base + offset) }
    }
}

impl Mmio for MmioRegion {
    fn read8(&self, offset: usize) -> u8 {
        self.reg::<u8>(offset).read()
    }

    fn write8(&self, offset: usize, value: u8) {
        self.reg::<u8>(offset).write(value)
    }

    fn read32(&self, offset: usize) -> u32 {
        self.reg::<u32>(offset).read()
    }

    fn write32(&self, offset: usize, value: u32) {
        self.reg::<u32>(offset).write(value)
    }
}
