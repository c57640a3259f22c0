use crate::{H_CSR, Register, filled_slots};
use bitfield_struct::bitfield;

/// Host control/status register (`H_CSR`).
///
/// The interrupt status bits are write-one-to-clear; writing the register
/// back unchanged acknowledges every pending source. Use
/// [`HostCsr::without_status`] for writes that must not acknowledge.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct HostCsr {
    /// Bit 0: host interrupt enable.
    pub int_enable: bool,

    /// Bit 1: host interrupt status (write 1 to clear).
    pub int_status: bool,

    /// Bit 2: generate an interrupt towards the ME.
    pub int_generate: bool,

    /// Bit 3: host ready.
    pub ready: bool,

    /// Bit 4: host reset.
    pub reset: bool,

    /// Bit 5: D0i3 interrupt enable.
    pub d0i3_int_enable: bool,

    /// Bit 6: D0i3 interrupt status (write 1 to clear).
    pub d0i3_int_status: bool,

    /// Bit 7: Reserved.
    #[bits(default = false)]
    _reserved_7: bool,

    /// Bits 8–15: host circular buffer read pointer.
    pub read_ptr: u8,

    /// Bits 16–23: host circular buffer write pointer.
    pub write_ptr: u8,

    /// Bits 24–31: host circular buffer depth in slots.
    pub buffer_depth: u8,
}

impl HostCsr {
    /// The register with both interrupt status bits cleared.
    #[inline]
    #[must_use]
    pub const fn without_status(self) -> Self {
        self.with_int_status(false).with_d0i3_int_status(false)
    }

    /// The register with both interrupt enable bits set or cleared.
    #[inline]
    #[must_use]
    pub const fn with_interrupts(self, enabled: bool) -> Self {
        self.with_int_enable(enabled).with_d0i3_int_enable(enabled)
    }

    /// Whether any interrupt source is pending.
    #[inline]
    #[must_use]
    pub const fn any_status(&self) -> bool {
        self.int_status() || self.d0i3_int_status()
    }

    /// Slots written by the host but not yet consumed by the ME.
    #[inline]
    #[must_use]
    pub const fn filled_slots(&self) -> u8 {
        filled_slots(self.read_ptr(), self.write_ptr())
    }
}

impl Register for HostCsr {
    const OFFSET: usize = H_CSR;

    #[inline]
    fn from_raw(raw: u32) -> Self {
        Self::from_bits(raw)
    }

    #[inline]
    fn into_raw(self) -> u32 {
        self.into_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions() {
        assert_eq!(HostCsr::new().with_int_enable(true).into_bits(), 1 << 0);
        assert_eq!(HostCsr::new().with_int_status(true).into_bits(), 1 << 1);
        assert_eq!(HostCsr::new().with_int_generate(true).into_bits(), 1 << 2);
        assert_eq!(HostCsr::new().with_ready(true).into_bits(), 1 << 3);
        assert_eq!(HostCsr::new().with_reset(true).into_bits(), 1 << 4);
        assert_eq!(HostCsr::new().with_d0i3_int_enable(true).into_bits(), 1 << 5);
        assert_eq!(HostCsr::new().with_d0i3_int_status(true).into_bits(), 1 << 6);
    }

    #[test]
    fn pointers_and_depth() {
        let csr = HostCsr::from_bits(0x8012_1000);
        assert_eq!(csr.buffer_depth(), 0x80);
        assert_eq!(csr.write_ptr(), 0x12);
        assert_eq!(csr.read_ptr(), 0x10);
        assert_eq!(csr.filled_slots(), 2);
    }

    #[test]
    fn status_masking() {
        let csr = HostCsr::from_bits(0b0100_1011);
        assert!(csr.any_status());
        assert_eq!(csr.without_status().into_bits(), 0b0000_1001);
        assert_eq!(
            HostCsr::new().with_interrupts(true).into_bits(),
            (1 << 0) | (1 << 5)
        );
    }
}
