//! Per-device state: lifecycle, negotiated version and power gating.

use crate::power::{PowerGatingEvent, PowerGatingState};
use crate::version::{BusVersion, Features};

/// Lifecycle of the link to the ME.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceState {
    Initializing,
    InitClients,
    Enabled,
    Resetting,
    Disabled,
    PowerDown,
    PowerUp,
}

pub(crate) struct Device {
    pub(crate) state: DeviceState,
    pub(crate) reset_count: u32,
    pub(crate) version: BusVersion,
    pub(crate) features: Features,
    /// Depth of the host circular buffer in slots.
    pub(crate) tx_buffer_depth: u8,
    pub(crate) pg_state: PowerGatingState,
    pub(crate) pg_event: PowerGatingEvent,
}

impl Device {
    pub(crate) const fn new(version: BusVersion) -> Self {
        Self {
            state: DeviceState::Initializing,
            reset_count: 0,
            version,
            features: Features::for_version(BusVersion::new(0, 0)),
            tx_buffer_depth: 0,
            pg_state: PowerGatingState::Off,
            pg_event: PowerGatingEvent::Idle,
        }
    }
}
