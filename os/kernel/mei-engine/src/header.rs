use bitfield_struct::bitfield;
use mei_registers::{SLOT_SIZE, bytes_to_slots};

/// Header slot preceding every message in either circular buffer.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct MessageHeader {
    /// Bits 0–7: ME client address.
    pub me_addr: u8,

    /// Bits 8–15: host client address.
    pub host_addr: u8,

    /// Bits 16–24: payload length in bytes, extension slots included.
    #[bits(9)]
    pub length: u16,

    /// Bits 25–27: Reserved, must be zero on the wire.
    #[bits(3)]
    pub reserved: u8,

    /// Bit 28: an extended header follows.
    pub extended: bool,

    /// Bit 29: the payload lives in the DMA ring.
    pub dma_ring: bool,

    /// Bit 30: internal message.
    pub internal: bool,

    /// Bit 31: last fragment of a message.
    pub msg_complete: bool,
}

impl MessageHeader {
    /// Largest payload a single header can describe.
    pub const MAX_LENGTH: usize = (1 << 9) - 1;

    /// Header of a complete host bus message.
    #[must_use]
    pub const fn host(length: u16) -> Self {
        Self::new().with_length(length).with_msg_complete(true)
    }

    /// Header of a host → client fragment.
    #[must_use]
    pub const fn client(me_addr: u8, length: u16, complete: bool) -> Self {
        Self::new()
            .with_me_addr(me_addr)
            .with_length(length)
            .with_msg_complete(complete)
    }

    /// Addressed to the bus itself rather than a client.
    #[inline]
    #[must_use]
    pub const fn is_host_message(&self) -> bool {
        self.me_addr() == 0 && self.host_addr() == 0
    }

    /// Bytes of `length` that belong to extension slots announced by flags.
    #[inline]
    #[must_use]
    pub const fn flagged_extension_len(&self) -> usize {
        let mut len = 0;
        if self.dma_ring() {
            len += SLOT_SIZE;
        }
        if self.extended() {
            len += SLOT_SIZE;
        }
        len
    }

    /// A header that cannot have been produced by a sane device.
    #[inline]
    #[must_use]
    pub const fn is_corrupted(&self) -> bool {
        self.into_bits() == 0
            || self.reserved() != 0
            || (self.length() as usize) < self.flagged_extension_len()
    }

    /// Whether the header and its body fit a circular buffer of `depth`
    /// slots at once.
    #[inline]
    #[must_use]
    pub const fn fits_buffer(&self, depth: u8) -> bool {
        1 + bytes_to_slots(self.length() as usize) <= depth as usize
    }
}

/// First extension slot of an extended header.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct ExtendedMetaHeader {
    /// Number of extensions.
    pub count: u8,

    /// Size of all extensions in slots, this slot excluded.
    pub size: u8,

    #[bits(16, default = 0)]
    _reserved: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_layout() {
        let header = MessageHeader::from_bits(0x8004_0c07);
        assert_eq!(header.me_addr(), 0x07);
        assert_eq!(header.host_addr(), 0x0c);
        assert_eq!(header.length(), 4);
        assert!(header.msg_complete());
        assert!(!header.extended() && !header.dma_ring() && !header.internal());
    }

    #[test]
    fn nine_bit_length() {
        let header = MessageHeader::new().with_length(511);
        assert_eq!(header.into_bits(), 0x01ff_0000);
    }

    #[test]
    fn host_header() {
        let header = MessageHeader::host(36);
        assert!(header.is_host_message());
        assert_eq!(header.into_bits(), 0x8024_0000);
    }

    #[test]
    fn corruption_checks() {
        assert!(MessageHeader::new().is_corrupted());
        assert!(MessageHeader::host(4).with_reserved(1).is_corrupted());
        assert!(MessageHeader::client(3, 4, true).with_extended(true).with_dma_ring(true).is_corrupted());
        assert!(!MessageHeader::client(3, 8, true).with_extended(true).with_dma_ring(true).is_corrupted());
        assert!(!MessageHeader::client(3, 0, false).is_corrupted());
    }

    #[test]
    fn buffer_fit() {
        // 60 bytes take 15 slots plus the header
        assert!(MessageHeader::client(5, 60, true).fits_buffer(16));
        assert!(!MessageHeader::client(5, 61, true).fits_buffer(16));
        assert!(!MessageHeader::client(5, 200, true).fits_buffer(16));
        assert!(MessageHeader::host(0).fits_buffer(1));
    }

    #[test]
    fn meta_header() {
        let meta = ExtendedMetaHeader::from_bits(0x0000_0201);
        assert_eq!(meta.count(), 1);
        assert_eq!(meta.size(), 2);
    }
}
