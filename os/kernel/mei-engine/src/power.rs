//! Power gating: PG isolation and the D0i3 low power state.

use crate::bus::BusState;
use crate::device::DeviceState;
use crate::engine::{Engine, WaitOutcome, work};
use crate::error::PowerGatingError;
use crate::hbm::HostRequest;
use crate::platform::Platform;
use log::{debug, info, warn};
use mei_registers::HostCsr;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PowerGatingState {
    Off,
    On,
}

/// Progress of the one outstanding power gating operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PowerGatingEvent {
    Idle,
    /// Waiting for the PG isolation entry response.
    Wait,
    /// Host bus side of the handshake completed.
    Received,
    /// Waiting for the D0i3 completion interrupt.
    InterruptWait,
    InterruptReceived,
}

impl<P: Platform> Engine<P> {
    /// Gates the device: PG isolation handshake, then D0i3.
    ///
    /// # Errors
    /// - [`PowerGatingError::NotSupported`] if the bus has no power gating.
    /// - [`PowerGatingError::Timeout`] if either step is not acknowledged.
    pub(crate) fn enter_power_gating_sync(&mut self) -> Result<(), PowerGatingError> {
        let result = self.enter_power_gating_steps();
        if result.is_ok() {
            self.device.pg_state = PowerGatingState::On;
            info!("power gating entered");
        }
        self.device.pg_event = PowerGatingEvent::Idle;
        result
    }

    fn enter_power_gating_steps(&mut self) -> Result<(), PowerGatingError> {
        if self.transport().d0i3().i3() {
            return Ok(());
        }

        if !self.device.features.power_gating {
            return Err(PowerGatingError::NotSupported);
        }

        self.device.pg_event = PowerGatingEvent::Wait;
        self.send_host_request(&HostRequest::PgIsolationEntry)?;
        let outcome = self.wait_until(self.config.timeouts.pg_isolation, |e| {
            e.device.pg_event == PowerGatingEvent::Received
        });
        if outcome == WaitOutcome::TimedOut {
            return Err(PowerGatingError::Timeout(PowerGatingEvent::Received));
        }

        self.device.pg_event = PowerGatingEvent::InterruptWait;
        let transport = self.transport();
        let control = transport.set_d0i3(transport.d0i3().with_i3(true).with_ir(true));
        if !control.cip() {
            return Ok(());
        }

        let outcome = self.wait_until(self.config.timeouts.d0i3, |e| {
            e.device.pg_event == PowerGatingEvent::InterruptReceived
        });
        if outcome == WaitOutcome::TimedOut && !self.transport().d0i3().i3() {
            return Err(PowerGatingError::Timeout(PowerGatingEvent::InterruptReceived));
        }
        Ok(())
    }

    /// Takes the device out of D0i3.
    ///
    /// # Errors
    /// [`PowerGatingError::Timeout`] if the device is still in D0i3 after the
    /// completion interrupt failed to arrive.
    pub(crate) fn exit_power_gating_sync(&mut self) -> Result<(), PowerGatingError> {
        self.device.pg_event = PowerGatingEvent::InterruptWait;
        let result = self.exit_power_gating_steps();
        if result.is_ok() {
            if self.device.pg_state == PowerGatingState::On {
                info!("power gating exited");
            }
            self.device.pg_state = PowerGatingState::Off;
        }
        self.device.pg_event = PowerGatingEvent::Idle;
        result
    }

    fn exit_power_gating_steps(&mut self) -> Result<(), PowerGatingError> {
        let transport = self.transport();
        let current = transport.d0i3();
        if !current.i3() {
            return Ok(());
        }

        let control = transport.set_d0i3(current.with_i3(false).with_ir(true));
        if !control.cip() {
            return Ok(());
        }

        let outcome = self.wait_until(self.config.timeouts.d0i3, |e| {
            e.device.pg_event == PowerGatingEvent::InterruptReceived
        });
        if outcome == WaitOutcome::TimedOut && self.transport().d0i3().i3() {
            return Err(PowerGatingError::Timeout(PowerGatingEvent::InterruptReceived));
        }
        Ok(())
    }

    /// Gates the device without any handshake, used when powering down.
    pub(crate) fn enter_power_gating_now(&mut self) {
        let transport = self.transport();
        let control = transport.d0i3();
        if !control.i3() {
            transport.set_d0i3(control.with_i3(true).with_ir(false));
        }
        self.device.pg_state = PowerGatingState::On;
        self.device.pg_event = PowerGatingEvent::Idle;
    }

    /// Power gating sources of an interrupt with status `status`.
    pub(crate) fn handle_pg_interrupt(&mut self, status: HostCsr) {
        if self.device.pg_event == PowerGatingEvent::InterruptWait && status.d0i3_int_status() {
            self.device.pg_event = PowerGatingEvent::InterruptReceived;
            if self.device.pg_state == PowerGatingState::On {
                self.device.pg_state = PowerGatingState::Off;
                if self.bus.state != BusState::Idle {
                    self.transport().enable_device();
                }
            } else {
                self.device.pg_state = PowerGatingState::On;
            }
        }

        if self.device.pg_state == PowerGatingState::On && status.int_status() {
            debug!("device activity while gated, resuming");
            self.schedule(work::RESUME);
        }
    }

    /// The idle timer expired.
    pub(crate) fn enter_idle(&mut self) {
        if self.device.state != DeviceState::Enabled {
            return;
        }
        if !self.bus.tx_queue.is_empty() {
            debug!("transactions pending, not entering power gating");
            self.arm_idle_timer();
            return;
        }

        match self.enter_power_gating_sync() {
            Ok(()) => {}
            Err(PowerGatingError::NotSupported) => debug!("power gating not supported"),
            Err(err) => {
                warn!("failed to enter power gating: {err}");
                self.schedule(work::RESET);
            }
        }
    }
}
