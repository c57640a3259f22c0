//! # MEI host bus engine
//!
//! Host side of the management engine interface: link bring-up over the
//! slot-addressed circular buffers, bus version and capability negotiation,
//! client enumeration, power gating and reliable delivery of client
//! messages for the one client the engine recognizes.
//!
//! The engine is a single serialized context. Hardware interrupts reach it
//! through [`Platform::wait_for_interrupt`]; timers and deferred work run
//! from [`Engine::poll`].

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod bitmap;
mod bus;
mod client;
mod config;
mod device;
mod dma;
mod engine;
mod error;
mod hbm;
mod header;
mod link;
mod platform;
mod power;
mod protocol;
mod receive;
mod timer;
mod transaction;
mod transport;
mod uuid;
mod version;

pub use bitmap::{ClientBitmap, MAX_CLIENTS};
pub use bus::BusState;
pub use client::{ClientHandle, MessageHandler, OwnerToken};
pub use config::{DmaSizes, EngineConfig, Timeouts};
pub use device::DeviceState;
pub use engine::Engine;
pub use error::{
    DmaError, EngineError, HandlerError, PowerGatingError, ProtocolError, SendError,
    TransportError, WaitTarget,
};
pub use hbm::{
    BusStatus, Capabilities, ClientProperties, DeviceMessage, DmaRingDescriptor, HostRequest,
    StopReason, command,
};
pub use header::{ExtendedMetaHeader, MessageHeader};
pub use platform::{DmaRegion, Instant, Platform};
pub use power::{PowerGatingEvent, PowerGatingState};
pub use transport::Transport;
pub use uuid::{TOUCH_CLIENT_UUID, Uuid};
pub use version::{BusVersion, Features};
