mod common;

use common::{SETTLE, engine, enabled, property_requests, requests};
use mei_engine::{
    BusState, BusStatus, BusVersion, ClientProperties, DeviceState, EngineConfig, EngineError,
    HostRequest, ProtocolError, Uuid, WaitTarget,
};
use mei_sim::{SimClient, SimConfig, touch_properties};
use std::time::Duration;

fn other_client(max: u32) -> SimClient {
    SimClient::new(ClientProperties {
        uuid: Uuid::from_bytes([0xaa; 16]),
        ..touch_properties(max)
    })
}

#[test]
fn handshake_enables_the_device() {
    let mut engine = enabled(SimConfig::default(), EngineConfig::default());

    assert_eq!(engine.bus_state(), BusState::Started);
    assert_eq!(engine.version(), BusVersion::new(2, 2));
    assert_eq!(engine.reset_count(), 0);
    assert_eq!(engine.tx_buffer_depth(), 128);
    assert!(engine.features().capabilities);

    let requests = requests(&engine);
    assert!(matches!(requests[0], HostRequest::Start { version } if version == BusVersion::new(2, 2)));
    assert!(matches!(requests[1], HostRequest::Capabilities { .. }));
    assert!(matches!(
        requests[2],
        HostRequest::Enumerate {
            allow_add: true,
            immediate: true
        }
    ));
    assert_eq!(requests[3], HostRequest::ClientProperties { address: 5 });
    assert_eq!(requests.len(), 4);

    let client = engine.client().expect("client");
    assert_eq!(client.address(), Some(5));
    assert_eq!(client.max_message_length(), Some(4096));
    assert!(client.is_active());
}

#[test]
fn properties_are_walked_in_address_order() {
    let sim = SimConfig::default()
        .with_client(40, other_client(64))
        .with_client(12, other_client(64))
        .with_response_delay(Duration::from_millis(2));
    let mut engine = engine(sim, EngineConfig::default());
    engine.start().unwrap();

    // the device only becomes enabled once the last address answered
    while engine.bus_state() != BusState::Started {
        assert_ne!(engine.state(), DeviceState::Enabled);
        assert!(engine.poll(Duration::from_millis(10)));
    }
    assert_eq!(engine.state(), DeviceState::Enabled);
    assert_eq!(property_requests(&engine), vec![5, 12, 40]);
    assert_eq!(engine.client().unwrap().address(), Some(5));
}

#[test]
fn older_bus_skips_capabilities() {
    let sim = SimConfig::default().with_me_version(BusVersion::new(2, 0));
    let engine = enabled(sim, EngineConfig::default());

    assert_eq!(engine.version(), BusVersion::new(2, 0));
    assert!(!engine.features().capabilities);
    assert!(engine.features().dynamic_clients);
    assert!(
        !requests(&engine)
            .iter()
            .any(|request| matches!(request, HostRequest::Capabilities { .. }))
    );
}

#[test]
fn version_below_minimum_stops_the_bus() {
    let sim = SimConfig::default().with_me_version(BusVersion::new(1, 0));
    let config = EngineConfig::default().with_min_version(BusVersion::new(2, 0));
    let mut engine = engine(sim, config);

    let err = engine.start().unwrap_err();
    assert_eq!(
        err,
        EngineError::Protocol(ProtocolError::UnsupportedVersion(BusVersion::new(1, 0)))
    );
    assert_eq!(engine.state(), DeviceState::Disabled);

    let requests = requests(&engine);
    assert_eq!(requests.len(), 2);
    assert!(matches!(requests[1], HostRequest::Stop { .. }));

    // no reset follows the stop
    engine.run_for(SETTLE);
    assert_eq!(engine.platform().resets(), 1);
}

#[test]
fn missing_start_response_times_out_and_retries() {
    let mut engine = engine(SimConfig::default(), EngineConfig::default());
    engine.platform().set_responsive(false);

    assert_eq!(engine.start(), Err(EngineError::Timeout(WaitTarget::BusStart)));
    assert_eq!(engine.bus_state(), BusState::Idle);

    // every retry runs into the init timer until the reset limit is hit
    engine.run_for(Duration::from_secs(60));
    assert_eq!(engine.state(), DeviceState::Disabled);
    assert_eq!(engine.reset_count(), 3);
    assert_eq!(engine.platform().resets(), 3);
}

#[test]
fn hardware_that_never_gets_ready_disables_the_device() {
    let mut engine = engine(SimConfig::default(), EngineConfig::default());
    engine
        .platform()
        .configure(|sim| sim.ready_delay = Duration::from_secs(10));

    assert_eq!(engine.start(), Err(EngineError::Disabled));
    assert_eq!(engine.state(), DeviceState::Disabled);
    assert_eq!(engine.reset_count(), 3);
}

#[test]
fn unknown_clients_are_ignored() {
    let sim = SimConfig::default()
        .without_clients()
        .with_client(7, other_client(128));
    let mut engine = enabled(sim, EngineConfig::default());

    assert_eq!(property_requests(&engine), vec![7]);
    assert!(engine.client().is_none());
}

#[test]
fn missing_client_is_skipped() {
    let sim = SimConfig::default()
        .with_client(3, other_client(64).with_status(BusStatus::ClientNotFound));
    let mut engine = enabled(sim, EngineConfig::default());

    assert_eq!(property_requests(&engine), vec![3, 5]);
    assert_eq!(engine.client().unwrap().address(), Some(5));
}

#[test]
fn failing_properties_exhaust_the_reset_limit() {
    let sim = SimConfig::default()
        .with_client(3, other_client(64).with_status(BusStatus::InvalidParameter));
    let mut engine = engine(sim, EngineConfig::default());
    engine.start().unwrap();
    engine.run_for(SETTLE);

    assert_eq!(engine.state(), DeviceState::Disabled);
    assert_eq!(engine.platform().resets(), 3);
    assert_eq!(property_requests(&engine), vec![3, 3, 3]);
}

#[test]
fn dma_ring_is_set_up() {
    let config = EngineConfig::default().with_dma_ring(true);
    let mut engine = enabled(SimConfig::default(), config);

    assert!(engine.features().dma_ring);
    assert_eq!(engine.platform().dma_regions(), 3);
    assert!(engine.platform().dma_clears() >= 1);

    let requests = requests(&engine);
    let regions = requests
        .iter()
        .find_map(|request| match request {
            HostRequest::DmaSetup { regions } => Some(*regions),
            _ => None,
        })
        .expect("DMA setup request");
    assert_eq!(regions[0].size, 0x2_0000);
    assert_eq!(regions[2].size, 4096);
    assert!(matches!(requests[3], HostRequest::Enumerate { .. }));

    engine.stop();
    assert_eq!(engine.platform().dma_regions(), 0);
    assert_eq!(engine.state(), DeviceState::Disabled);
}

#[test]
fn rejected_dma_ring_is_released() {
    let sim = SimConfig::default().with_dma_status(BusStatus::NotAllowed);
    let engine = enabled(sim, EngineConfig::default().with_dma_ring(true));

    assert!(!engine.features().dma_ring);
    assert_eq!(engine.platform().dma_regions(), 0);
}

#[test]
fn dma_ring_without_memory_is_skipped() {
    let sim = SimConfig::default().with_dma_exhausted(true);
    let engine = enabled(sim, EngineConfig::default().with_dma_ring(true));

    assert!(!engine.features().dma_ring);
    assert!(
        !requests(&engine)
            .iter()
            .any(|request| matches!(request, HostRequest::DmaSetup { .. }))
    );
}

#[test]
fn client_dma_needs_the_grant() {
    let mut sim = SimConfig::default();
    sim.capabilities.client_dma = false;
    let engine = enabled(sim, EngineConfig::default().with_client_dma(true));

    assert!(!engine.features().client_dma);
    assert!(engine.features().vtag);
}
