//! The engine object, its interrupt bottom half and the deferred work loop.

use crate::bus::{Bus, BusState};
use crate::client::{Client, ClientHandle};
use crate::config::EngineConfig;
use crate::device::{Device, DeviceState};
use crate::dma::DmaRings;
use crate::error::TransportError;
use crate::hbm::HostRequest;
use crate::header::MessageHeader;
use crate::platform::{Instant, Platform};
use crate::power::{PowerGatingEvent, PowerGatingState};
use crate::receive::ReadProgress;
use crate::timer::Timers;
use crate::transport::Transport;
use crate::version::{BusVersion, Features};
use core::time::Duration;
use log::{debug, error, trace, warn};
use mei_sync::{Signal, SignalSet};

/// Deferred work, coalesced and run from [`Engine::poll`].
pub(crate) mod work {
    use mei_sync::Signal;

    pub const RESET: Signal = Signal::new(0);
    pub const RESCAN: Signal = Signal::new(1);
    pub const RESUME: Signal = Signal::new(2);
    pub const DELIVER: Signal = Signal::new(3);
}

/// Rounds of deferred work per [`Engine::poll`].
const MAX_WORK_ROUNDS: usize = 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Satisfied,
    TimedOut,
}

/// Host side of one MEI device.
///
/// All state lives here and is only touched through `&mut self`; sharing
/// the engine between threads means wrapping it in a lock such as
/// [`mei_sync::TicketLock`].
pub struct Engine<P: Platform> {
    pub(crate) platform: P,
    pub(crate) config: EngineConfig,
    pub(crate) device: Device,
    pub(crate) bus: Bus,
    pub(crate) client: Option<Client>,
    pub(crate) dma: DmaRings,
    pub(crate) timers: Timers,
    pub(crate) work: SignalSet,
    /// Set by the interrupt handler once the ME reports ready during a reset.
    pub(crate) hw_ready_signalled: bool,
}

impl<P: Platform> Engine<P> {
    #[must_use]
    pub fn new(platform: P, config: EngineConfig) -> Self {
        Self {
            platform,
            device: Device::new(config.host_version),
            config,
            bus: Bus::new(),
            client: None,
            dma: DmaRings::default(),
            timers: Timers::default(),
            work: SignalSet::new(),
            hw_ready_signalled: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> DeviceState {
        self.device.state
    }

    #[must_use]
    pub const fn bus_state(&self) -> BusState {
        self.bus.state
    }

    /// Negotiated bus version.
    #[must_use]
    pub const fn version(&self) -> BusVersion {
        self.device.version
    }

    /// Features in effect for the current session.
    #[must_use]
    pub const fn features(&self) -> Features {
        self.device.features
    }

    #[must_use]
    pub const fn power_gating_state(&self) -> PowerGatingState {
        self.device.pg_state
    }

    #[must_use]
    pub const fn power_gating_event(&self) -> PowerGatingEvent {
        self.device.pg_event
    }

    #[must_use]
    pub const fn reset_count(&self) -> u32 {
        self.device.reset_count
    }

    /// Depth of the host circular buffer in slots.
    #[must_use]
    pub const fn tx_buffer_depth(&self) -> u8 {
        self.device.tx_buffer_depth
    }

    /// Outbound transactions not yet fully written.
    #[must_use]
    pub fn pending_transactions(&self) -> usize {
        self.bus.tx_queue.len()
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    pub const fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// The recognized client, if the ME reported it.
    pub fn client(&mut self) -> Option<ClientHandle<'_, P>> {
        if self.client.is_some() {
            Some(ClientHandle::new(self))
        } else {
            None
        }
    }

    /// Waits up to `timeout` for one interrupt or timer and processes it,
    /// together with all deferred work. Returns `true` if anything ran.
    pub fn poll(&mut self, timeout: Duration) -> bool {
        let mut progressed = self.run_deferred_work();

        let deadline = self.now() + timeout;
        let wake = self
            .timers
            .next_deadline()
            .map_or(deadline, |timer| timer.min(deadline));
        if self.platform.wait_for_interrupt(wake) {
            self.handle_interrupt();
            progressed = true;
        }

        progressed |= self.fire_timers();
        progressed |= self.run_deferred_work();
        progressed
    }

    /// Keeps polling until `duration` has passed.
    pub fn run_for(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        loop {
            let now = self.now();
            if now >= deadline {
                break;
            }
            self.poll(deadline.saturating_duration_since(now));
        }
        self.run_deferred_work();
    }

    #[inline]
    pub(crate) fn now(&self) -> Instant {
        self.platform.now()
    }

    #[inline]
    pub(crate) fn transport(&self) -> Transport<'_, P::Window> {
        Transport::new(self.platform.window())
    }

    pub(crate) fn schedule(&self, signal: Signal) {
        if !self.work.raise(signal) {
            trace!("deferred work {signal:?} already pending");
        }
    }

    /// Services interrupts until `done` holds or `timeout` passes.
    ///
    /// Timers and deferred work are not run while waiting.
    pub(crate) fn wait_until(
        &mut self,
        timeout: Duration,
        done: impl Fn(&Self) -> bool,
    ) -> WaitOutcome {
        let deadline = self.now() + timeout;
        loop {
            if done(self) {
                return WaitOutcome::Satisfied;
            }
            if self.now() >= deadline {
                return WaitOutcome::TimedOut;
            }
            if self.platform.wait_for_interrupt(deadline) {
                self.handle_interrupt();
            }
        }
    }

    pub(crate) fn send_host_request(&self, request: &HostRequest) -> Result<(), TransportError> {
        let payload = request.encode();
        debug!("sending host bus request {request:?}");
        let length = u16::try_from(payload.len()).unwrap_or(u16::MAX);
        self.transport()
            .write_message(MessageHeader::host(length), &payload, self.device.tx_buffer_depth)
    }

    /// The interrupt bottom half.
    pub(crate) fn handle_interrupt(&mut self) {
        let transport = self.transport();
        transport.disable_interrupts();
        let status = transport.clear_interrupts();

        if !transport.is_hw_ready() && self.device.state != DeviceState::Resetting {
            warn!("management engine requested a reset");
            self.schedule(work::RESET);
            self.transport().enable_interrupts();
            return;
        }

        if transport.me_csr().reset() {
            transport.generate_host_interrupt();
        }

        self.handle_pg_interrupt(status);

        let (host_ready, hw_ready) = {
            let transport = self.transport();
            (transport.is_host_ready(), transport.is_hw_ready())
        };
        if !host_ready {
            if hw_ready {
                debug!("management engine is ready");
                self.hw_ready_signalled = true;
            } else {
                debug!("spurious interrupt");
            }
            self.transport().enable_interrupts();
            return;
        }

        self.drain_incoming();

        if self.refresh_tx_buffer_ready()
            && !matches!(
                self.device.pg_event,
                PowerGatingEvent::Wait | PowerGatingEvent::Received
            )
        {
            self.handle_write();
            self.refresh_tx_buffer_ready();
        }

        self.transport().enable_interrupts();
    }

    fn drain_incoming(&mut self) {
        let mut filled = match self.transport().filled_slots() {
            Ok(filled) => filled,
            Err(err) => {
                error!("{err}");
                self.schedule_reset_on_error();
                return;
            }
        };

        while filled > 0 {
            match self.handle_read(&mut filled) {
                Ok(ReadProgress::Consumed) => {}
                Ok(ReadProgress::Incomplete) => break,
                Err(err) => {
                    error!("failed to handle incoming message: {err}");
                    self.schedule_reset_on_error();
                    break;
                }
            }
        }
    }

    /// Marks the host buffer writable once the ME consumed all of it.
    /// Returns `false` on an overrun, after scheduling a reset.
    fn refresh_tx_buffer_ready(&mut self) -> bool {
        match self.transport().free_slots(self.device.tx_buffer_depth) {
            Ok(free) => {
                self.bus.tx_buffer_ready = free == self.device.tx_buffer_depth;
                true
            }
            Err(err) => {
                error!("{err}");
                self.bus.tx_buffer_ready = false;
                self.schedule_reset_on_error();
                false
            }
        }
    }

    pub(crate) fn schedule_reset_on_error(&self) {
        if !matches!(
            self.device.state,
            DeviceState::Resetting | DeviceState::PowerDown
        ) {
            self.schedule(work::RESET);
        }
    }

    fn fire_timers(&mut self) -> bool {
        let now = self.now();
        let mut fired = false;
        if self.timers.init.fire_if_expired(now) {
            self.init_timeout();
            fired = true;
        }
        if self.timers.idle.fire_if_expired(now) {
            self.enter_idle();
            fired = true;
        }
        fired
    }

    fn init_timeout(&self) {
        if self.device.state == DeviceState::InitClients && self.bus.state != BusState::Idle {
            error!("bus initialization timed out in {:?}", self.bus.state);
            self.schedule(work::RESET);
        }
    }

    /// Runs pending deferred work. Returns `true` if anything ran.
    pub(crate) fn run_deferred_work(&mut self) -> bool {
        let mut ran = false;
        for _ in 0..MAX_WORK_ROUNDS {
            if self.work.take(work::RESET) {
                self.reset_work();
            } else if self.work.take(work::RESCAN) {
                self.rescan_clients();
            } else if self.work.take(work::RESUME) {
                self.resume_work();
            } else if self.work.take(work::DELIVER) {
                self.deliver_messages();
            } else {
                break;
            }
            ran = true;
        }
        ran
    }

    fn reset_work(&mut self) {
        self.transport().clear_interrupts();
        match self.reset() {
            Ok(()) => {}
            Err(err) if self.device.state == DeviceState::Disabled => {
                error!("device disabled: {err}");
            }
            Err(err) => {
                warn!("reset failed ({err}), trying again");
                self.schedule(work::RESET);
            }
        }
    }

    fn resume_work(&mut self) {
        if let Err(err) = self.exit_power_gating_sync() {
            error!("failed to resume from power gating: {err}");
            self.schedule(work::RESET);
        }
    }
}

impl<P: Platform> Drop for Engine<P> {
    fn drop(&mut self) {
        self.release_dma_rings();
    }
}
