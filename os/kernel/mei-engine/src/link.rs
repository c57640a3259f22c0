//! Link lifecycle: start, stop, suspend/resume and the hardware reset.

use crate::bus::BusState;
use crate::device::DeviceState;
use crate::engine::{Engine, WaitOutcome, work};
use crate::error::{EngineError, ProtocolError, TransportError, WaitTarget};
use crate::hbm::HostRequest;
use crate::platform::Platform;
use crate::power::PowerGatingState;
use log::{error, info, warn};

impl<P: Platform> Engine<P> {
    /// Brings the link up and starts the bus handshake.
    ///
    /// Returns once the ME answered the start request; enumeration then
    /// continues from [`poll`](Self::poll).
    ///
    /// # Errors
    /// - [`EngineError::Disabled`] once the reset limit is exhausted.
    /// - [`EngineError::Timeout`] if the ME never answered the start request;
    ///   a reset is scheduled.
    /// - Transport or protocol errors if the link came up unusable; the
    ///   device is disabled.
    pub fn start(&mut self) -> Result<(), EngineError> {
        info!("starting device");
        self.transport().clear_interrupts();
        self.configure_device();

        self.device.reset_count = 0;
        loop {
            self.device.state = DeviceState::Initializing;
            match self.reset() {
                Ok(()) => break,
                Err(err) if self.device.state == DeviceState::Disabled => {
                    error!("failed to reset device: {err}");
                    return Err(err);
                }
                Err(err) => warn!("reset attempt failed: {err}"),
            }
        }

        if self.bus.state <= BusState::Starting {
            let outcome =
                self.wait_until(self.config.timeouts.bus_start, |e| e.bus.state > BusState::Starting);
            if outcome == WaitOutcome::TimedOut {
                error!("timed out waiting for the bus to start");
                self.bus.state = BusState::Idle;
                self.schedule(work::RESET);
                return Err(EngineError::Timeout(WaitTarget::BusStart));
            }
        }

        let (host_ready, hw_ready) = {
            let transport = self.transport();
            (transport.is_host_ready(), transport.is_hw_ready())
        };
        if !host_ready || !hw_ready {
            error!("link is not ready after start (host {host_ready}, me {hw_ready})");
            self.device.state = DeviceState::Disabled;
            return Err(TransportError::NotReady.into());
        }

        if !self.config.supports(self.device.version) {
            error!("bus version {} is not supported", self.device.version);
            self.device.state = DeviceState::Disabled;
            return Err(ProtocolError::UnsupportedVersion(self.device.version).into());
        }

        Ok(())
    }

    /// Puts the device into reset and low power, keeping the client for a
    /// later [`resume`](Self::resume).
    pub fn suspend(&mut self) {
        info!("suspending device");
        self.power_down();
    }

    /// Takes the device out of power down and restarts the handshake.
    ///
    /// # Errors
    /// [`EngineError::Disabled`] if the device cannot be brought back. Any
    /// other failure is returned after a retry has been scheduled.
    pub fn resume(&mut self) -> Result<(), EngineError> {
        info!("resuming device");
        self.device.state = DeviceState::PowerUp;
        self.device.reset_count = 0;
        match self.reset() {
            Ok(()) => Ok(()),
            Err(EngineError::Disabled) => Err(EngineError::Disabled),
            Err(err) => {
                warn!("reset during resume failed ({err}), retrying");
                self.schedule(work::RESET);
                Err(err)
            }
        }
    }

    /// Shuts the device down and releases the client and DMA memory.
    pub fn stop(&mut self) {
        info!("stopping device");
        self.power_down();
        self.client = None;
        self.release_dma_rings();
        self.work.clear();
    }

    fn power_down(&mut self) {
        self.device.state = DeviceState::PowerDown;
        self.device.reset_count = 0;
        self.timers.init.cancel();
        self.timers.idle.cancel();
        if let Err(err) = self.reset() {
            warn!("reset during power down failed: {err}");
        }
        self.device.state = DeviceState::Disabled;
    }

    /// Reads the buffer depth and the initial power gating state.
    fn configure_device(&mut self) {
        let transport = self.transport();
        let depth = transport.host_csr().buffer_depth();
        let gated = transport.d0i3().i3();
        self.device.tx_buffer_depth = depth;
        self.device.pg_state = if gated {
            PowerGatingState::On
        } else {
            PowerGatingState::Off
        };
        info!("host buffer depth is {depth} slots, power gating {:?}", self.device.pg_state);
    }

    /// Resets the link and sends the start request.
    ///
    /// Counts towards the consecutive reset limit; exceeding it disables the
    /// device.
    pub(crate) fn reset(&mut self) -> Result<(), EngineError> {
        let previous = self.device.state;
        if !matches!(
            previous,
            DeviceState::Initializing
                | DeviceState::Disabled
                | DeviceState::PowerDown
                | DeviceState::PowerUp
        ) {
            warn!("unexpected reset in device state {previous:?}");
        }

        self.transport().clear_interrupts();
        self.timers.init.cancel();
        self.bus.state = BusState::Idle;
        let interrupts_enabled = previous != DeviceState::PowerDown;
        self.device.state = DeviceState::Resetting;

        if self.device.reset_count >= self.config.max_consecutive_resets {
            error!(
                "reached the limit of {} consecutive resets, disabling device",
                self.config.max_consecutive_resets
            );
            self.device.state = DeviceState::Disabled;
            return Err(EngineError::Disabled);
        }
        self.device.reset_count += 1;

        let hardware = self.reset_hardware(interrupts_enabled);

        if !matches!(previous, DeviceState::Initializing | DeviceState::PowerUp) {
            self.flush_transactions();
            if let Some(client) = self.client.as_mut() {
                client.disconnect();
            }
        }
        self.reset_bus();

        if let Err(err) = hardware {
            error!("hardware reset failed: {err}");
            return Err(err);
        }

        if previous == DeviceState::PowerDown {
            self.device.state = DeviceState::Disabled;
            return Ok(());
        }

        self.wait_hardware_ready()?;

        self.device.state = DeviceState::InitClients;
        self.bus.state = BusState::Idle;
        if let Err(err) = self.send_host_request(&HostRequest::Start {
            version: self.config.host_version,
        }) {
            error!("failed to send start request: {err}");
            self.device.state = DeviceState::Resetting;
            return Err(err.into());
        }
        self.bus.state = BusState::Starting;
        self.arm_init_timer();
        Ok(())
    }

    fn reset_hardware(&mut self, interrupts_enabled: bool) -> Result<(), EngineError> {
        if interrupts_enabled {
            self.transport().enable_interrupts();
            self.exit_power_gating_sync()?;
        }

        self.hw_ready_signalled = false;
        let transport = self.transport();
        let mut csr = transport.host_csr();
        if csr.reset() {
            warn!("host reset bit already set, releasing it first");
            transport.set_host_csr(csr.with_reset(false));
            csr = transport.host_csr();
        }
        csr = csr.with_reset(true).with_int_generate(true);
        if !interrupts_enabled {
            csr = csr.with_interrupts(false);
        }
        transport.set_host_csr(csr);

        let readback = transport.host_csr();
        if !readback.reset() {
            warn!("host reset bit did not stick");
        }
        if readback.ready() {
            warn!("host ready bit still set during reset");
        }

        if !interrupts_enabled {
            transport.dereset();
            self.enter_power_gating_now();
        }
        Ok(())
    }

    /// Forgets all bus progress and marks the client inactive.
    fn reset_bus(&mut self) {
        if let Some(client) = self.client.as_mut() {
            client.active = false;
        }
        self.timers.init.cancel();
        self.bus.state = BusState::Idle;
        self.bus.rx_header = None;
    }

    fn wait_hardware_ready(&mut self) -> Result<(), EngineError> {
        let outcome =
            self.wait_until(self.config.timeouts.hardware_ready, |e| e.hw_ready_signalled);
        if outcome == WaitOutcome::TimedOut {
            error!("timed out waiting for the management engine to become ready");
            return Err(EngineError::Timeout(WaitTarget::HardwareReady));
        }
        self.hw_ready_signalled = false;

        let transport = self.transport();
        transport.dereset();
        transport.enable_device();
        info!("link established");
        Ok(())
    }

    pub(crate) fn arm_init_timer(&mut self) {
        let now = self.now();
        self.timers.init.arm(now, self.config.timeouts.init_clients);
    }

    pub(crate) fn arm_idle_timer(&mut self) {
        let now = self.now();
        self.timers.idle.arm(now, self.config.timeouts.idle);
    }
}
