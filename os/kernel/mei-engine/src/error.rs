use crate::bus::BusState;
use crate::device::DeviceState;
use crate::hbm::BusStatus;
use crate::power::PowerGatingEvent;
use crate::version::BusVersion;

/// Faults of the slot transport. All of them force a link reset.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("circular buffer overrun: {filled} filled slots exceed depth {depth}")]
    BufferOverrun { filled: u8, depth: u8 },
    #[error("corrupted message header {0:#010x}")]
    CorruptedHeader(u32),
    #[error("message needs {needed} slots but only {available} are free")]
    MessageTooLarge { needed: usize, available: u8 },
    #[error("management engine is not ready")]
    NotReady,
}

/// Host bus protocol faults.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("command {command:#04x} received in device state {device:?} with bus state {bus:?}")]
    UnexpectedResponse {
        command: u8,
        device: DeviceState,
        bus: BusState,
    },
    #[error("bus version {0} is not supported")]
    UnsupportedVersion(BusVersion),
    #[error("unknown host bus command {0:#04x}")]
    UnknownCommand(u8),
    #[error("host bus command {command:#04x} truncated to {length} bytes")]
    Truncated { command: u8, length: usize },
    #[error("empty host bus message")]
    Empty,
    #[error("host bus message of {0} bytes exceeds the receive buffer")]
    OversizedHostMessage(usize),
    #[error("client properties for address {address} failed with {status:?}")]
    PropertiesStatus { address: u8, status: BusStatus },
    #[error("no client for me address {me_addr}, host address {host_addr}")]
    NoDestination { me_addr: u8, host_addr: u8 },
    #[error("bus stopped")]
    BusStopped,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DmaError {
    #[error("failed to allocate {size} bytes of DMA memory")]
    OutOfMemory { size: usize },
    #[error("DMA ring setup rejected with {0:?}")]
    Rejected(BusStatus),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PowerGatingError {
    #[error("power gating is not supported by the device")]
    NotSupported,
    #[error("timed out waiting for power gating event {0:?}")]
    Timeout(PowerGatingEvent),
    #[error("transport fault during power gating: {0}")]
    Transport(#[from] TransportError),
}

/// What a bounded engine-level wait was waiting for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitTarget {
    HardwareReady,
    BusStart,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    PowerGating(#[from] PowerGatingError),
    #[error(transparent)]
    Dma(#[from] DmaError),
    #[error("timed out waiting for {0:?}")]
    Timeout(WaitTarget),
    #[error("device is disabled")]
    Disabled,
}

/// Why a client message could not be sent.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("no device: the device is not enabled or the client is not active")]
    NoDevice,
    #[error("message of {length} bytes exceeds the client maximum of {max}")]
    MessageTooLarge { length: usize, max: usize },
    #[error("timed out waiting for the message to be written")]
    Timeout,
    #[error("send aborted")]
    Aborted,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Why a message handler could not be installed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("a message handler is already registered")]
    AlreadyRegistered,
    #[error("no client to attach the handler to")]
    NoClient,
}
