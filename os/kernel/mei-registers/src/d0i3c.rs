use crate::{H_D0I3C, Register};
use bitfield_struct::bitfield;

/// D0i3 control register (`H_D0I3C`).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct D0i3Control {
    /// Bit 0: Command In Progress (CIP).
    ///
    /// Set by the hardware while a requested D0i3 transition is still
    /// being carried out.
    pub cip: bool,

    /// Bit 1: Interrupt Required (IR).
    ///
    /// Requests a D0i3 interrupt once the transition completes.
    pub ir: bool,

    /// Bit 2: D0i3 (I3).
    ///
    /// - 1: the device is (or should enter) D0i3.
    /// - 0: the device is (or should return to) D0.
    pub i3: bool,

    /// Bit 3: Restore Required (RR).
    pub rr: bool,

    /// Bits 4–31: Reserved.
    #[bits(28, default = 0)]
    _reserved_4_31: u32,
}

impl Register for D0i3Control {
    const OFFSET: usize = H_D0I3C;

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
        assert_eq!(D0i3Control::new().with_cip(true).into_bits(), 1);
        assert_eq!(D0i3Control::new().with_ir(true).into_bits(), 2);
        assert_eq!(D0i3Control::new().with_i3(true).into_bits(), 4);
        assert_eq!(D0i3Control::new().with_rr(true).into_bits(), 8);
    }

    #[test]
    fn reserved_bits_are_dropped() {
        let reg = D0i3Control::from_bits(0xffff_fff4);
        assert!(reg.i3());
        assert!(!reg.ir());
    }
}
