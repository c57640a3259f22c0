#![allow(dead_code)]

use mei_engine::{DeviceState, Engine, EngineConfig, HostRequest, OwnerToken};
use mei_sim::{SimConfig, SimPlatform};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type SimEngine = Engine<SimPlatform>;

/// Long enough for any handshake with the default simulated delays,
/// short enough to stay clear of the idle timer.
pub const SETTLE: Duration = Duration::from_millis(50);

pub fn engine(sim: SimConfig, config: EngineConfig) -> SimEngine {
    Engine::new(SimPlatform::new(sim), config)
}

/// An engine that completed the whole handshake.
pub fn enabled(sim: SimConfig, config: EngineConfig) -> SimEngine {
    let mut engine = engine(sim, config);
    engine.start().expect("start");
    engine.run_for(SETTLE);
    assert_eq!(engine.state(), DeviceState::Enabled);
    engine
}

pub fn requests(engine: &SimEngine) -> Vec<HostRequest> {
    engine.platform().host_requests()
}

/// Addresses of all client properties requests, in order.
pub fn property_requests(engine: &SimEngine) -> Vec<u8> {
    requests(engine)
        .into_iter()
        .filter_map(|request| match request {
            HostRequest::ClientProperties { address } => Some(address),
            _ => None,
        })
        .collect()
}

/// Registers a handler that records every delivered message.
pub fn collect_messages(engine: &mut SimEngine) -> Arc<Mutex<Vec<Vec<u8>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine
        .client()
        .expect("client")
        .register_handler(OwnerToken(1), move |message: &[u8]| {
            sink.lock().unwrap().push(message.to_vec());
        })
        .expect("register");
    seen
}
