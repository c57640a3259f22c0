//! # Simulated MEI device
//!
//! A [`Platform`](mei_engine::Platform) backed by an in-memory model of the
//! management engine: register file, both circular buffers, the host bus
//! responder, D0i3 and a virtual clock. Time only advances while the engine
//! waits, so every run is deterministic.
//!
//! ```
//! use mei_engine::{DeviceState, Engine, EngineConfig};
//! use mei_sim::{SimConfig, SimPlatform};
//! use std::time::Duration;
//!
//! let mut engine = Engine::new(SimPlatform::new(SimConfig::default()), EngineConfig::default());
//! engine.start().unwrap();
//! engine.run_for(Duration::from_millis(10));
//! assert_eq!(engine.state(), DeviceState::Enabled);
//! ```

mod config;
mod device;
mod platform;

pub use config::{PgAck, SimClient, SimConfig, touch_properties};
pub use device::Fragment;
pub use platform::{SimPlatform, SimWindow};
