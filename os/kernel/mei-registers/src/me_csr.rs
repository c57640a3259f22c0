use crate::{ME_CSR_HA, Register, filled_slots};
use bitfield_struct::bitfield;

/// ME control/status register as seen by the host (`ME_CSR_HA`).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct MeCsr {
    /// Bit 0: ME interrupt enable.
    pub int_enable: bool,

    /// Bit 1: ME interrupt status.
    pub int_status: bool,

    /// Bit 2: ME interrupt generate.
    pub int_generate: bool,

    /// Bit 3: ME ready.
    pub ready: bool,

    /// Bit 4: ME reset request.
    pub reset: bool,

    /// Bit 5: Reserved.
    #[bits(default = false)]
    _reserved_5: bool,

    /// Bit 6: ME supports power gating isolation.
    pub pg_isolation_capable: bool,

    /// Bit 7: Reserved.
    #[bits(default = false)]
    _reserved_7: bool,

    /// Bits 8–15: ME circular buffer read pointer.
    pub read_ptr: u8,

    /// Bits 16–23: ME circular buffer write pointer.
    pub write_ptr: u8,

    /// Bits 24–31: ME circular buffer depth in slots.
    pub buffer_depth: u8,
}

impl MeCsr {
    /// Slots written by the ME but not yet read by the host.
    #[inline]
    #[must_use]
    pub const fn filled_slots(&self) -> u8 {
        filled_slots(self.read_ptr(), self.write_ptr())
    }
}

impl Register for MeCsr {
    const OFFSET: usize = ME_CSR_HA;

    #[inline]
    fn from_raw(raw: u32) -> Self {
        Self::from_bits(raw)
    }

    #[inline]
    fn into_raw(self) -> u32 {
        self.into_bits()
    }
}
