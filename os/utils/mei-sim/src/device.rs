//! Register-level model of the management engine.

use crate::config::{PgAck, SimConfig};
use log::{debug, trace, warn};
use mei_engine::{
    BusStatus, Capabilities, ClientBitmap, DeviceMessage, HostRequest, Instant,
    MessageHeader,
};
use mei_registers::{D0i3Control, HostCsr, MeCsr, SLOT_SIZE, bytes_to_slots};
use std::collections::VecDeque;
use std::time::Duration;

/// Largest payload the ME puts behind one header.
const MAX_FRAGMENT: usize = 508;

#[derive(Debug)]
enum Event {
    /// The ME finished its reset and sets its ready bit.
    Ready { generation: u64 },
    /// A queued message becomes visible to the host.
    Deliver { generation: u64, slots: Vec<u32> },
    /// A D0i3 transition completes.
    D0i3Done { interrupt: bool },
}

/// A client fragment exactly as the host wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub header: MessageHeader,
    pub payload: Vec<u8>,
}

pub(crate) struct SimDevice {
    pub(crate) config: SimConfig,
    pub(crate) now: Instant,
    host_csr: HostCsr,
    me_csr: MeCsr,
    d0i3: D0i3Control,
    host_buffer: VecDeque<u32>,
    me_buffer: VecDeque<u32>,
    /// Messages waiting for room in the ME buffer.
    outbox: VecDeque<Vec<u32>>,
    events: Vec<(Instant, Event)>,
    /// Bumped on every reset so stale events are dropped.
    generation: u64,
    pub(crate) stalled: bool,
    pub(crate) responsive: bool,
    pub(crate) requests: Vec<HostRequest>,
    pub(crate) fragments: Vec<Fragment>,
    pub(crate) messages: Vec<Vec<u8>>,
    partial: Vec<u8>,
    pub(crate) resets: usize,
    pub(crate) host_overflows: usize,
    pub(crate) doorbells: usize,
}

impl SimDevice {
    pub(crate) fn new(config: SimConfig) -> Self {
        let host_csr = HostCsr::new().with_buffer_depth(config.host_depth);
        let me_csr = MeCsr::new()
            .with_buffer_depth(config.me_depth)
            .with_pg_isolation_capable(true);
        let d0i3 = D0i3Control::new().with_i3(config.start_gated);
        Self {
            config,
            now: Instant::ZERO,
            host_csr,
            me_csr,
            d0i3,
            host_buffer: VecDeque::new(),
            me_buffer: VecDeque::new(),
            outbox: VecDeque::new(),
            events: Vec::new(),
            generation: 0,
            stalled: false,
            responsive: true,
            requests: Vec::new(),
            fragments: Vec::new(),
            messages: Vec::new(),
            partial: Vec::new(),
            resets: 0,
            host_overflows: 0,
            doorbells: 0,
        }
    }

    pub(crate) const fn host_csr(&self) -> HostCsr {
        self.host_csr
    }

    pub(crate) const fn me_csr(&self) -> MeCsr {
        self.me_csr
    }

    pub(crate) const fn d0i3(&self) -> D0i3Control {
        self.d0i3
    }

    /// An enabled interrupt source is pending.
    pub(crate) const fn interrupt_pending(&self) -> bool {
        let csr = self.host_csr;
        (csr.int_status() && csr.int_enable()) || (csr.d0i3_int_status() && csr.d0i3_int_enable())
    }

    pub(crate) fn next_event(&self) -> Option<Instant> {
        self.events.iter().map(|(at, _)| *at).min()
    }

    /// Runs every event due at or before the current time.
    pub(crate) fn run_due_events(&mut self) {
        loop {
            let Some(index) = self
                .events
                .iter()
                .enumerate()
                .filter(|(_, (at, _))| *at <= self.now)
                .min_by_key(|(_, (at, _))| *at)
                .map(|(index, _)| index)
            else {
                return;
            };
            let (_, event) = self.events.remove(index);
            self.run_event(event);
        }
    }

    fn schedule(&mut self, after: Duration, event: Event) {
        let at = self.now.saturating_add(after);
        self.events.push((at, event));
    }

    fn run_event(&mut self, event: Event) {
        match event {
            Event::Ready { generation } if generation == self.generation => {
                debug!("sim: ME ready");
                self.me_csr.set_ready(true);
                self.raise_interrupt();
            }
            Event::Deliver { generation, slots } if generation == self.generation => {
                self.outbox.push_back(slots);
                self.flush_outbox();
            }
            Event::D0i3Done { interrupt } => {
                trace!("sim: D0i3 transition complete");
                self.d0i3.set_cip(false);
                if interrupt {
                    self.host_csr.set_d0i3_int_status(true);
                }
            }
            Event::Ready { .. } | Event::Deliver { .. } => trace!("sim: dropping stale event"),
        }
    }

    fn raise_interrupt(&mut self) {
        self.host_csr.set_int_status(true);
    }

    pub(crate) fn write_host_csr(&mut self, value: u32) {
        let written = HostCsr::from_bits(value);
        let was_reset = self.host_csr.reset();

        if written.int_status() {
            self.host_csr.set_int_status(false);
        }
        if written.d0i3_int_status() {
            self.host_csr.set_d0i3_int_status(false);
        }
        self.host_csr.set_int_enable(written.int_enable());
        self.host_csr.set_d0i3_int_enable(written.d0i3_int_enable());
        self.host_csr.set_reset(written.reset());
        self.host_csr.set_ready(written.ready() && !written.reset());

        if written.reset() && !was_reset {
            self.reset();
        }
        if written.int_generate() {
            self.doorbell();
        }
    }

    /// The host asserted its reset bit.
    fn reset(&mut self) {
        debug!("sim: host reset");
        self.resets += 1;
        self.generation += 1;
        self.me_csr.set_ready(false);
        self.host_buffer.clear();
        self.me_buffer.clear();
        self.outbox.clear();
        self.partial.clear();
        self.host_csr.set_read_ptr(0);
        self.host_csr.set_write_ptr(0);
        self.me_csr.set_read_ptr(0);
        self.me_csr.set_write_ptr(0);
        self.events
            .retain(|(_, event)| matches!(event, Event::D0i3Done { .. }));
        let generation = self.generation;
        self.schedule(self.config.ready_delay, Event::Ready { generation });
    }

    pub(crate) fn write_host_slot(&mut self, value: u32) {
        if self.host_buffer.len() >= usize::from(self.config.host_depth) {
            warn!("sim: host wrote past the end of its buffer");
            self.host_overflows += 1;
            return;
        }
        self.host_buffer.push_back(value);
        self.host_csr
            .set_write_ptr(self.host_csr.write_ptr().wrapping_add(1));
    }

    pub(crate) fn read_me_slot(&mut self) -> u32 {
        let Some(value) = self.me_buffer.pop_front() else {
            warn!("sim: host read an empty ME buffer");
            return 0;
        };
        self.me_csr.set_read_ptr(self.me_csr.read_ptr().wrapping_add(1));
        value
    }

    pub(crate) fn write_d0i3(&mut self, value: u32) {
        let written = D0i3Control::from_bits(value);
        self.d0i3.set_i3(written.i3());
        self.d0i3.set_ir(written.ir());
        match self.config.pg_ack {
            PgAck::Immediate => self.d0i3.set_cip(false),
            PgAck::Interrupt => {
                self.d0i3.set_cip(true);
                self.schedule(
                    self.config.pg_delay,
                    Event::D0i3Done {
                        interrupt: written.ir(),
                    },
                );
            }
        }
    }

    /// The host rang the doorbell: consume its buffer and push out
    /// anything waiting for room.
    fn doorbell(&mut self) {
        self.doorbells += 1;
        if self.host_csr.reset() || !self.me_csr.ready() {
            return;
        }
        if !self.stalled && self.consume_host_buffer() {
            self.raise_interrupt();
        }
        self.flush_outbox();
    }

    /// Consumes every complete message in the host buffer. Returns whether
    /// anything was consumed.
    fn consume_host_buffer(&mut self) -> bool {
        let mut consumed = false;
        while let Some(&raw) = self.host_buffer.front() {
            let header = MessageHeader::from_bits(raw);
            let length = usize::from(header.length());
            let slots = bytes_to_slots(length);
            if self.host_buffer.len() < 1 + slots {
                break;
            }

            let mut payload: Vec<u8> = self
                .host_buffer
                .drain(..=slots)
                .skip(1)
                .flat_map(u32::to_le_bytes)
                .collect();
            payload.truncate(length);
            let advance = u8::try_from(slots + 1).unwrap_or(u8::MAX);
            self.host_csr
                .set_read_ptr(self.host_csr.read_ptr().wrapping_add(advance));
            consumed = true;

            if header.is_host_message() {
                self.on_host_request(&payload);
            } else {
                self.on_client_fragment(header, payload);
            }
        }
        consumed
    }

    fn on_host_request(&mut self, payload: &[u8]) {
        let request = match HostRequest::decode(payload) {
            Ok(request) => request,
            Err(err) => {
                warn!("sim: undecodable host request: {err}");
                return;
            }
        };
        debug!("sim: host request {request:?}");
        self.requests.push(request);
        if !self.responsive {
            return;
        }

        let response = match request {
            HostRequest::Start { version } => Some(DeviceMessage::StartResponse {
                host_version_supported: version <= self.config.me_version,
                me_max: self.config.me_version,
            }),
            HostRequest::Stop { .. } => Some(DeviceMessage::StopResponse),
            HostRequest::Capabilities { requested } => Some(DeviceMessage::CapabilitiesResponse {
                granted: Capabilities {
                    vtag: requested.vtag && self.config.capabilities.vtag,
                    client_dma: requested.client_dma && self.config.capabilities.client_dma,
                },
            }),
            HostRequest::DmaSetup { .. } => Some(DeviceMessage::DmaSetupResponse {
                status: self.config.dma_status,
            }),
            HostRequest::Enumerate { .. } => Some(DeviceMessage::EnumerationResponse {
                valid_addresses: self.config.clients.keys().copied().collect::<ClientBitmap>(),
            }),
            HostRequest::ClientProperties { address } => {
                let (status, properties) = self.config.clients.get(&address).map_or(
                    (BusStatus::ClientNotFound, crate::config::touch_properties(0)),
                    |client| (client.status, client.properties),
                );
                Some(DeviceMessage::ClientPropertiesResponse {
                    address,
                    status,
                    properties,
                })
            }
            HostRequest::AddClientResponse { .. } => None,
            HostRequest::PgIsolationEntry => self
                .config
                .pg_isolation
                .then_some(DeviceMessage::PgIsolationEntryResponse),
        };

        if let Some(response) = response {
            self.send_device_message(&response);
        }
    }

    fn on_client_fragment(&mut self, header: MessageHeader, payload: Vec<u8>) {
        trace!(
            "sim: client fragment of {} bytes for {}, complete {}",
            payload.len(),
            header.me_addr(),
            header.msg_complete()
        );
        self.partial.extend_from_slice(&payload);
        self.fragments.push(Fragment { header, payload });
        if !header.msg_complete() {
            return;
        }

        let message = std::mem::take(&mut self.partial);
        let echo = self
            .config
            .clients
            .get(&header.me_addr())
            .is_some_and(|client| client.echo);
        if echo {
            self.send_client_message(header.me_addr(), &message);
        }
        self.messages.push(message);
    }

    /// Queues a host bus message from the ME.
    pub(crate) fn send_device_message(&mut self, message: &DeviceMessage) {
        let payload = message.encode();
        let header = MessageHeader::host(u16::try_from(payload.len()).unwrap_or(u16::MAX));
        self.queue(header, &payload);
    }

    /// Queues a client message from the ME, split into fragments the ME
    /// buffer can hold.
    pub(crate) fn send_client_message(&mut self, me_addr: u8, data: &[u8]) {
        let room = (usize::from(self.config.me_depth) * SLOT_SIZE)
            .saturating_sub(SLOT_SIZE)
            .min(MAX_FRAGMENT);
        let mut chunks = data.chunks(room.max(SLOT_SIZE)).peekable();
        while let Some(chunk) = chunks.next() {
            let complete = chunks.peek().is_none();
            let header =
                MessageHeader::client(me_addr, u16::try_from(chunk.len()).unwrap_or(0), complete);
            self.queue(header, chunk);
        }
    }

    /// Queues raw slots as one message.
    pub(crate) fn send_raw(&mut self, slots: Vec<u32>) {
        self.enqueue(slots);
    }

    fn queue(&mut self, header: MessageHeader, payload: &[u8]) {
        let mut slots = Vec::with_capacity(1 + bytes_to_slots(payload.len()));
        slots.push(header.into_bits());
        slots.extend(payload.chunks(SLOT_SIZE).map(|chunk| {
            let mut slot = [0; SLOT_SIZE];
            slot[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(slot)
        }));
        self.enqueue(slots);
    }

    fn enqueue(&mut self, slots: Vec<u32>) {
        if self.config.response_delay.is_zero() {
            self.outbox.push_back(slots);
            self.flush_outbox();
        } else {
            let generation = self.generation;
            self.schedule(
                self.config.response_delay,
                Event::Deliver { generation, slots },
            );
        }
    }

    /// Moves queued messages into the ME buffer while they fit.
    fn flush_outbox(&mut self) {
        let depth = usize::from(self.config.me_depth);
        let mut pushed = false;
        while let Some(slots) = self.outbox.front() {
            if self.me_buffer.len() + slots.len() > depth {
                break;
            }
            let count = u8::try_from(slots.len()).unwrap_or(u8::MAX);
            if let Some(slots) = self.outbox.pop_front() {
                self.me_buffer.extend(slots);
            }
            self.me_csr
                .set_write_ptr(self.me_csr.write_ptr().wrapping_add(count));
            pushed = true;
        }
        if pushed {
            self.raise_interrupt();
        }
    }

    /// Lets the ME consume the host buffer again, picking up whatever the
    /// host wrote in the meantime.
    pub(crate) fn unstall(&mut self) {
        self.stalled = false;
        if self.me_csr.ready() && !self.host_csr.reset() && self.consume_host_buffer() {
            self.raise_interrupt();
        }
    }

    pub(crate) fn skew_host_write_pointer(&mut self, slots: u8) {
        let read = self.host_csr.read_ptr();
        self.host_csr.set_write_ptr(read.wrapping_add(slots));
    }

    /// The ME drops its ready bit, asking the host for a reset.
    pub(crate) fn drop_ready(&mut self) {
        self.me_csr.set_ready(false);
        self.raise_interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_device(config: SimConfig) -> SimDevice {
        let mut device = SimDevice::new(config);
        device.write_host_csr(HostCsr::new().with_reset(true).with_int_generate(true).into_bits());
        device.now = device.now.saturating_add(Duration::from_millis(5));
        device.run_due_events();
        device.write_host_csr(HostCsr::new().with_ready(true).with_interrupts(true).into_bits());
        device
    }

    fn write_message(device: &mut SimDevice, header: MessageHeader, payload: &[u8]) {
        device.write_host_slot(header.into_bits());
        for chunk in payload.chunks(SLOT_SIZE) {
            let mut slot = [0; SLOT_SIZE];
            slot[..chunk.len()].copy_from_slice(chunk);
            device.write_host_slot(u32::from_le_bytes(slot));
        }
        let csr = device.host_csr().without_status().with_int_generate(true);
        device.write_host_csr(csr.into_bits());
    }

    #[test]
    fn reset_then_ready() {
        let device = ready_device(SimConfig::default());
        assert!(device.me_csr().ready());
        assert!(device.host_csr().ready());
        assert!(device.interrupt_pending());
        assert_eq!(device.resets, 1);
    }

    #[test]
    fn start_request_is_answered() {
        let mut device = ready_device(SimConfig::default());
        let request = HostRequest::Start {
            version: mei_engine::BusVersion::new(2, 2),
        }
        .encode();
        write_message(
            &mut device,
            MessageHeader::host(u16::try_from(request.len()).unwrap()),
            &request,
        );
        assert_eq!(device.host_csr().filled_slots(), 0);
        assert_eq!(device.me_csr().filled_slots(), 2);
        assert_eq!(device.requests.len(), 1);
    }

    #[test]
    fn status_bits_are_write_one_to_clear() {
        let mut device = ready_device(SimConfig::default());
        let csr = device.host_csr();
        assert!(csr.int_status());
        device.write_host_csr(csr.without_status().into_bits());
        assert!(device.host_csr().int_status());
        device.write_host_csr(csr.into_bits());
        assert!(!device.host_csr().int_status());
    }

    #[test]
    fn fragments_are_reassembled() {
        let mut device = ready_device(SimConfig::default());
        write_message(&mut device, MessageHeader::client(5, 3, false), &[1, 2, 3]);
        write_message(&mut device, MessageHeader::client(5, 2, true), &[4, 5]);
        assert_eq!(device.fragments.len(), 2);
        assert_eq!(device.messages, vec![vec![1, 2, 3, 4, 5]]);
    }

    #[test]
    fn large_client_messages_are_split() {
        let mut config = SimConfig::default();
        config.me_depth = 16;
        let mut device = ready_device(config);
        device.send_client_message(5, &[7; 100]);
        // 60 bytes fit behind a header in 16 slots
        let header = MessageHeader::from_bits(device.read_me_slot());
        assert_eq!(header.length(), 60);
        assert!(!header.msg_complete());
    }
}
