//! # Typed MEI Registers
//!
//! Register model of the host-visible window of the management engine
//! interface. All registers are 32 bits wide and are addressed by their
//! byte offset relative to the start of the window.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod d0i3c;
mod host_csr;
mod me_csr;
#[cfg(feature = "mmio")]
mod mmio;

pub use d0i3c::D0i3Control;
pub use host_csr::HostCsr;
pub use me_csr::MeCsr;
#[cfg(feature = "mmio")]
pub use mmio::MmioWindow;

/// Host circular buffer write window (host → ME).
pub const H_CB_WW: usize = 0x00;
/// Host control/status register.
pub const H_CSR: usize = 0x04;
/// ME circular buffer read window (ME → host).
pub const ME_CB_RW: usize = 0x08;
/// ME control/status register, read-only from the host.
pub const ME_CSR_HA: usize = 0x0C;
/// Host power gating control/status register.
pub const H_PG_CSR: usize = 0x10;
/// D0i3 control register.
pub const H_D0I3C: usize = 0x800;

/// Size of a circular buffer slot in bytes.
pub const SLOT_SIZE: usize = 4;

/// Number of slots needed to carry `bytes` bytes.
#[inline]
#[must_use]
pub const fn bytes_to_slots(bytes: usize) -> usize {
    bytes.div_ceil(SLOT_SIZE)
}

/// Number of bytes carried by `slots` slots.
#[inline]
#[must_use]
pub const fn slots_to_bytes(slots: usize) -> usize {
    slots * SLOT_SIZE
}

/// Raw 32-bit access to a register window.
pub trait RegisterWindow {
    fn read32(&self, offset: usize) -> u32;
    fn write32(&self, offset: usize, value: u32);
}

impl<W> RegisterWindow for &W
where
    W: RegisterWindow + ?Sized,
{
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value);
    }
}

/// A typed register living at a fixed offset of the window.
pub trait Register: Copy {
    const OFFSET: usize;

    fn from_raw(raw: u32) -> Self;
    fn into_raw(self) -> u32;
}

pub trait LoadRegister: Sized {
    fn load<W: RegisterWindow + ?Sized>(window: &W) -> Self;
}

pub trait StoreRegister {
    fn store<W: RegisterWindow + ?Sized>(self, window: &W);
}

impl<T> LoadRegister for T
where
    T: Register,
{
    #[inline]
    fn load<W: RegisterWindow + ?Sized>(window: &W) -> Self {
        Self::from_raw(window.read32(T::OFFSET))
    }
}

impl<T> StoreRegister for T
where
    T: Register,
{
    #[inline]
    fn store<W: RegisterWindow + ?Sized>(self, window: &W) {
        window.write32(T::OFFSET, self.into_raw());
    }
}

/// Number of occupied slots given the wrapping pointers of a circular buffer.
#[inline]
#[must_use]
pub const fn filled_slots(read_ptr: u8, write_ptr: u8) -> u8 {
    write_ptr.wrapping_sub(read_ptr)
}
