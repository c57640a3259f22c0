//! Inbound path: header accumulation, dispatch and client reassembly.

use crate::device::DeviceState;
use crate::engine::{Engine, work};
use crate::error::{EngineError, ProtocolError, TransportError};
use crate::header::{ExtendedMetaHeader, MessageHeader};
use crate::platform::Platform;
use crate::transport::Transport;
use log::{debug, trace, warn};
use mei_registers::{SLOT_SIZE, slots_to_bytes};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ReadProgress {
    /// One message was handled.
    Consumed,
    /// The body has not fully arrived; the header is kept for the next pass.
    Incomplete,
}

impl<P: Platform> Engine<P> {
    /// Handles the next message in the ME buffer. `filled` is the number of
    /// readable slots and is refreshed afterwards.
    pub(crate) fn handle_read(&mut self, filled: &mut u8) -> Result<ReadProgress, EngineError> {
        let header = if let Some(header) = self.bus.rx_header {
            header
        } else {
            let raw = self.transport().read_slot();
            *filled = filled.saturating_sub(1);
            let header = MessageHeader::from_bits(raw);
            trace!("message header {raw:#010x}");
            if header.is_corrupted() {
                return Err(TransportError::CorruptedHeader(raw).into());
            }
            let depth = self.transport().me_csr().buffer_depth();
            if !header.fits_buffer(depth) {
                warn!("message of {} bytes can never fit {depth} slots", header.length());
                return Err(TransportError::CorruptedHeader(raw).into());
            }
            self.bus.rx_header = Some(header);
            header
        };

        let length = usize::from(header.length());
        if slots_to_bytes(usize::from(*filled)) < length {
            debug!("message of {length} bytes not complete yet");
            return Ok(ReadProgress::Incomplete);
        }

        let mut remaining = length;
        let transport = self.transport();
        if header.extended() {
            let meta = ExtendedMetaHeader::from_bits(transport.read_slot());
            let extensions = slots_to_bytes(usize::from(meta.size()));
            if remaining < SLOT_SIZE + extensions {
                return Err(TransportError::CorruptedHeader(header.into_bits()).into());
            }
            for _ in 0..meta.size() {
                let _ = transport.read_slot();
            }
            remaining -= SLOT_SIZE + extensions;
        }

        if header.dma_ring() {
            if remaining != SLOT_SIZE {
                return Err(TransportError::CorruptedHeader(header.into_bits()).into());
            }
            let _ = transport.read_slot();
            remaining = 0;
        }

        let result = if header.is_host_message() {
            self.handle_host_message(remaining)
        } else {
            self.route_client_message(header, remaining)
        };

        self.bus.rx_header = None;
        *filled = self.transport().filled_slots()?;
        result.map(|()| ReadProgress::Consumed)
    }

    fn route_client_message(
        &mut self,
        header: MessageHeader,
        length: usize,
    ) -> Result<(), EngineError> {
        let matches = self
            .client
            .as_ref()
            .is_some_and(|client| client.active && client.address == header.me_addr());
        if matches {
            self.handle_client_message(header, length);
            return Ok(());
        }

        if (header.host_addr() == 0 && header.me_addr() != 0)
            || self.device.state == DeviceState::PowerDown
        {
            debug!(
                "discarding {length} bytes for unconnected client {}",
                header.me_addr()
            );
            self.transport().discard(length);
            return Ok(());
        }

        Err(ProtocolError::NoDestination {
            me_addr: header.me_addr(),
            host_addr: header.host_addr(),
        }
        .into())
    }

    fn handle_client_message(&mut self, header: MessageHeader, length: usize) {
        let Some(client) = self.client.as_mut() else {
            return;
        };
        let transport = Transport::new(self.platform.window());

        if header.extended() || header.dma_ring() {
            debug!("extended and DMA ring messages are not supported, discarding");
            transport.discard(length);
        } else if client.rx_cache.len() + length > client.max_message_length() {
            warn!(
                "client message overflows {} bytes, discarding",
                client.max_message_length()
            );
            transport.discard(length);
            client.rx_cache.clear();
        } else {
            let start = client.rx_cache.len();
            client.rx_cache.resize(start + length, 0);
            transport.read_bytes(&mut client.rx_cache[start..]);
            if header.msg_complete() && client.message_complete() {
                self.schedule(work::DELIVER);
            }
        }

        self.arm_idle_timer();
    }

    /// Hands completed messages to the registered handler, oldest first.
    pub(crate) fn deliver_messages(&mut self) {
        let Some(client) = self.client.as_mut() else {
            return;
        };
        while let Some(message) = client.inbox.pop_front() {
            match client.handler.as_mut() {
                Some(registered) => registered.handler.on_message(&message),
                None => trace!("no handler registered, dropping {} bytes", message.len()),
            }
        }
    }
}
