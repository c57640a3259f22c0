//! Slot-level access to the two circular buffers.

use crate::error::TransportError;
use crate::header::MessageHeader;
use mei_registers::{
    D0i3Control, H_CB_WW, HostCsr, LoadRegister, ME_CB_RW, MeCsr, RegisterWindow, SLOT_SIZE,
    StoreRegister, bytes_to_slots,
};

/// Borrowed view of the register window with the MEI access rules applied.
pub struct Transport<'a, W: ?Sized> {
    window: &'a W,
}

impl<'a, W> Transport<'a, W>
where
    W: RegisterWindow + ?Sized,
{
    #[must_use]
    pub const fn new(window: &'a W) -> Self {
        Self { window }
    }

    #[inline]
    #[must_use]
    pub fn host_csr(&self) -> HostCsr {
        HostCsr::load(self.window)
    }

    #[inline]
    #[must_use]
    pub fn me_csr(&self) -> MeCsr {
        MeCsr::load(self.window)
    }

    /// Writes `H_CSR` without acknowledging pending interrupts.
    #[inline]
    pub fn set_host_csr(&self, csr: HostCsr) {
        csr.without_status().store(self.window);
    }

    #[inline]
    #[must_use]
    pub fn d0i3(&self) -> D0i3Control {
        D0i3Control::load(self.window)
    }

    /// Writes the D0i3 control register and returns its new value.
    #[inline]
    pub fn set_d0i3(&self, value: D0i3Control) -> D0i3Control {
        value.store(self.window);
        self.d0i3()
    }

    #[inline]
    #[must_use]
    pub fn is_host_ready(&self) -> bool {
        self.host_csr().ready()
    }

    /// The ME has signalled readiness.
    #[inline]
    #[must_use]
    pub fn is_hw_ready(&self) -> bool {
        self.me_csr().ready()
    }

    /// Acknowledges all pending interrupt sources and returns the register
    /// as it was before.
    pub fn clear_interrupts(&self) -> HostCsr {
        let csr = self.host_csr();
        if csr.any_status() {
            csr.store(self.window);
        }
        csr
    }

    pub fn enable_interrupts(&self) {
        self.set_host_csr(self.host_csr().with_interrupts(true));
    }

    pub fn disable_interrupts(&self) {
        self.set_host_csr(self.host_csr().with_interrupts(false));
    }

    /// Rings the ME doorbell.
    pub fn generate_host_interrupt(&self) {
        self.set_host_csr(self.host_csr().with_int_generate(true));
    }

    /// Releases the host reset bit.
    pub fn dereset(&self) {
        self.set_host_csr(self.host_csr().with_int_generate(true).with_reset(false));
    }

    /// Marks the host ready and enables interrupts.
    pub fn enable_device(&self) {
        self.set_host_csr(
            self.host_csr()
                .with_interrupts(true)
                .with_int_generate(true)
                .with_ready(true),
        );
    }

    #[inline]
    #[must_use]
    pub fn read_slot(&self) -> u32 {
        self.window.read32(ME_CB_RW)
    }

    #[inline]
    pub fn write_slot(&self, value: u32) {
        self.window.write32(H_CB_WW, value);
    }

    /// Slots the ME has written and the host not yet read.
    ///
    /// # Errors
    /// [`TransportError::BufferOverrun`] if the pointers claim more slots
    /// than the buffer holds.
    pub fn filled_slots(&self) -> Result<u8, TransportError> {
        let csr = self.me_csr();
        let filled = csr.filled_slots();
        if filled > csr.buffer_depth() {
            return Err(TransportError::BufferOverrun {
                filled,
                depth: csr.buffer_depth(),
            });
        }
        Ok(filled)
    }

    /// Free slots of the host buffer of `depth` slots.
    ///
    /// # Errors
    /// [`TransportError::BufferOverrun`] if the pointers claim more filled
    /// slots than the buffer holds.
    pub fn free_slots(&self, depth: u8) -> Result<u8, TransportError> {
        let filled = self.host_csr().filled_slots();
        if filled > depth {
            return Err(TransportError::BufferOverrun { filled, depth });
        }
        Ok(depth - filled)
    }

    /// Reads `out.len()` bytes from the ME buffer, consuming whole slots,
    /// then signals the ME that the slots are free again.
    pub fn read_bytes(&self, out: &mut [u8]) {
        let mut chunks = out.chunks_exact_mut(SLOT_SIZE);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.read_slot().to_le_bytes());
        }
        let tail = chunks.into_remainder();
        if !tail.is_empty() {
            let slot = self.read_slot().to_le_bytes();
            tail.copy_from_slice(&slot[..tail.len()]);
        }
        self.generate_host_interrupt();
    }

    /// Drains `len` bytes from the ME buffer.
    pub fn discard(&self, len: usize) {
        for _ in 0..bytes_to_slots(len) {
            let _ = self.read_slot();
        }
        self.generate_host_interrupt();
    }

    /// Writes a header and its payload into the host buffer and rings the
    /// doorbell. The last slot is zero padded.
    ///
    /// # Errors
    /// - [`TransportError::MessageTooLarge`] if the message does not fit
    ///   into the free slots; nothing is written in that case.
    /// - [`TransportError::NotReady`] if the ME dropped its ready bit.
    pub fn write_message(
        &self,
        header: MessageHeader,
        payload: &[u8],
        depth: u8,
    ) -> Result<(), TransportError> {
        let available = self.free_slots(depth)?;
        let needed = bytes_to_slots(SLOT_SIZE + payload.len());
        if needed > usize::from(available) {
            return Err(TransportError::MessageTooLarge { needed, available });
        }

        self.write_slot(header.into_bits());
        let mut chunks = payload.chunks_exact(SLOT_SIZE);
        for chunk in &mut chunks {
            self.write_slot(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        let tail = chunks.remainder();
        if !tail.is_empty() {
            let mut slot = [0; SLOT_SIZE];
            slot[..tail.len()].copy_from_slice(tail);
            self.write_slot(u32::from_le_bytes(slot));
        }

        self.generate_host_interrupt();
        if !self.is_hw_ready() {
            return Err(TransportError::NotReady);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::cell::RefCell;
    use mei_registers::{H_CSR, ME_CSR_HA};
    use std::collections::VecDeque;

    /// Minimal register file: host writes are recorded, ME slots are queued.
    #[derive(Default)]
    pub(crate) struct FakeWindow {
        pub(crate) host_csr: RefCell<u32>,
        pub(crate) me_csr: RefCell<u32>,
        pub(crate) written: RefCell<Vec<u32>>,
        pub(crate) incoming: RefCell<VecDeque<u32>>,
    }

    impl FakeWindow {
        /// Host buffer of `depth` slots with `filled` slots still unread by the ME.
        pub(crate) fn with_host_buffer(depth: u8, filled: u8) -> Self {
            let window = Self::default();
            *window.host_csr.borrow_mut() = HostCsr::new()
                .with_buffer_depth(depth)
                .with_write_ptr(filled)
                .into_bits();
            *window.me_csr.borrow_mut() = MeCsr::new().with_ready(true).with_buffer_depth(128).into_bits();
            window
        }
    }

    impl RegisterWindow for FakeWindow {
        fn read32(&self, offset: usize) -> u32 {
            match offset {
                H_CSR => *self.host_csr.borrow(),
                ME_CSR_HA => *self.me_csr.borrow(),
                ME_CB_RW => self.incoming.borrow_mut().pop_front().unwrap_or(0),
                _ => 0,
            }
        }

        fn write32(&self, offset: usize, value: u32) {
            match offset {
                H_CSR => *self.host_csr.borrow_mut() = value,
                H_CB_WW => {
                    self.written.borrow_mut().push(value);
                    let mut csr = HostCsr::from_bits(*self.host_csr.borrow());
                    csr.set_write_ptr(csr.write_ptr().wrapping_add(1));
                    *self.host_csr.borrow_mut() = csr.into_bits();
                }
                _ => {}
            }
        }
    }

    #[test]
    fn free_slots_and_overrun() {
        let window = FakeWindow::with_host_buffer(128, 64);
        let transport = Transport::new(&window);
        assert_eq!(transport.free_slots(128), Ok(64));
        assert_eq!(
            transport.free_slots(32),
            Err(TransportError::BufferOverrun {
                filled: 64,
                depth: 32
            })
        );
    }

    #[test]
    fn me_buffer_overrun_is_reported() {
        let window = FakeWindow::default();
        *window.me_csr.borrow_mut() = MeCsr::new()
            .with_buffer_depth(8)
            .with_write_ptr(9)
            .into_bits();
        assert_eq!(
            Transport::new(&window).filled_slots(),
            Err(TransportError::BufferOverrun { filled: 9, depth: 8 })
        );
    }

    #[test]
    fn write_pads_the_last_slot() {
        let window = FakeWindow::with_host_buffer(128, 0);
        let transport = Transport::new(&window);
        let header = MessageHeader::client(7, 5, true);
        transport.write_message(header, &[1, 2, 3, 4, 5], 128).unwrap();
        assert_eq!(
            *window.written.borrow(),
            vec![header.into_bits(), 0x0403_0201, 0x0000_0005]
        );
        assert!(HostCsr::from_bits(*window.host_csr.borrow()).int_generate());
    }

    #[test]
    fn write_refuses_messages_that_do_not_fit() {
        let window = FakeWindow::with_host_buffer(4, 1);
        let transport = Transport::new(&window);
        let err = transport
            .write_message(MessageHeader::client(7, 12, true), &[0; 12], 4)
            .unwrap_err();
        assert_eq!(err, TransportError::MessageTooLarge { needed: 4, available: 3 });
        assert!(window.written.borrow().is_empty());
    }

    #[test]
    fn write_reports_lost_readiness() {
        let window = FakeWindow::with_host_buffer(8, 0);
        *window.me_csr.borrow_mut() = 0;
        let transport = Transport::new(&window);
        assert_eq!(
            transport.write_message(MessageHeader::host(4), &[1, 0, 2, 2], 8),
            Err(TransportError::NotReady)
        );
    }

    #[test]
    fn read_bytes_consumes_whole_slots() {
        let window = FakeWindow::default();
        window.incoming.borrow_mut().extend([0x0403_0201, 0x0807_0605, 0xdead_0009]);
        let mut out = [0u8; 9];
        Transport::new(&window).read_bytes(&mut out);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert!(window.incoming.borrow().is_empty());
    }

    #[test]
    fn clear_interrupts_acknowledges_only_when_pending() {
        let window = FakeWindow::default();
        *window.host_csr.borrow_mut() = HostCsr::new().with_int_status(true).with_ready(true).into_bits();
        let before = Transport::new(&window).clear_interrupts();
        assert!(before.int_status());
        // written back verbatim: the status bit is write-one-to-clear
        assert!(HostCsr::from_bits(*window.host_csr.borrow()).int_status());
    }

    #[test]
    fn set_host_csr_never_acknowledges() {
        let window = FakeWindow::default();
        Transport::new(&window).set_host_csr(HostCsr::new().with_int_status(true).with_ready(true));
        assert_eq!(*window.host_csr.borrow(), HostCsr::new().with_ready(true).into_bits());
    }
}
