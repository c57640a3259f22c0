mod common;

use common::{SETTLE, collect_messages, enabled, requests};
use mei_engine::{
    BusState, BusStatus, ClientProperties, DeviceMessage, DeviceState, EngineConfig,
    ExtendedMetaHeader, HostRequest, MessageHeader, OwnerToken, StopReason, Uuid,
};
use mei_sim::{SimClient, SimConfig, touch_properties};

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 256).unwrap() ^ seed)
        .collect()
}

#[test]
fn fragments_are_reassembled() {
    let mut engine = enabled(SimConfig::default(), EngineConfig::default());
    let seen = collect_messages(&mut engine);
    let data = payload(1500, 0x5a);

    engine.platform().push_client_message(5, &data);
    engine.run_for(SETTLE);

    assert_eq!(*seen.lock().unwrap(), vec![data]);
}

#[test]
fn messages_arrive_in_order() {
    let mut engine = enabled(SimConfig::default(), EngineConfig::default());
    let seen = collect_messages(&mut engine);
    let messages = [payload(10, 1), payload(700, 2), payload(3, 3)];

    for message in &messages {
        engine.platform().push_client_message(5, message);
    }
    engine.run_for(SETTLE);

    assert_eq!(*seen.lock().unwrap(), messages.to_vec());
}

#[test]
fn overflowing_message_is_dropped() {
    let sim = SimConfig::default().with_client(5, SimClient::new(touch_properties(64)));
    let mut engine = enabled(sim, EngineConfig::default());
    let seen = collect_messages(&mut engine);

    engine.platform().push_client_message(5, &payload(100, 0));
    engine.platform().push_client_message(5, &payload(10, 7));
    engine.run_for(SETTLE);

    assert_eq!(*seen.lock().unwrap(), vec![payload(10, 7)]);
    assert_eq!(engine.state(), DeviceState::Enabled);
    assert_eq!(engine.platform().resets(), 1);
}

#[test]
fn messages_without_a_handler_are_dropped() {
    let mut engine = enabled(SimConfig::default(), EngineConfig::default());
    engine.platform().push_client_message(5, b"lost");
    engine.run_for(SETTLE);

    let seen = collect_messages(&mut engine);
    engine.platform().push_client_message(5, b"kept");
    engine.run_for(SETTLE);

    assert_eq!(*seen.lock().unwrap(), vec![b"kept".to_vec()]);
}

#[test]
fn handler_registration_is_owned() {
    let mut engine = enabled(SimConfig::default(), EngineConfig::default());
    let mut client = engine.client().unwrap();

    client.register_handler(OwnerToken(1), |_: &[u8]| {}).unwrap();
    assert!(client.register_handler(OwnerToken(2), |_: &[u8]| {}).is_err());

    assert!(!client.unregister_handler(OwnerToken(2)));
    assert!(client.has_handler());
    assert!(client.unregister_handler(OwnerToken(1)));
    assert!(!client.unregister_handler(OwnerToken(1)));
    assert!(!client.has_handler());

    client.register_handler(OwnerToken(2), |_: &[u8]| {}).unwrap();
}

#[test]
fn echo_round_trip() {
    let sim = SimConfig::default().with_client(5, SimClient::new(touch_properties(4096)).with_echo(true));
    let mut engine = enabled(sim, EngineConfig::default());
    let seen = collect_messages(&mut engine);
    let data = payload(2048, 0x33);

    engine.client().unwrap().send(&data, true).unwrap();
    engine.run_for(SETTLE);

    assert_eq!(*seen.lock().unwrap(), vec![data]);
}

#[test]
fn message_for_an_unconnected_client_is_discarded() {
    let mut engine = enabled(SimConfig::default(), EngineConfig::default());
    let seen = collect_messages(&mut engine);

    engine.platform().push_client_message(9, b"nobody");
    engine.platform().push_client_message(5, b"somebody");
    engine.run_for(SETTLE);

    assert_eq!(*seen.lock().unwrap(), vec![b"somebody".to_vec()]);
    assert_eq!(engine.platform().resets(), 1);
}

#[test]
fn extended_messages_are_skipped() {
    let mut engine = enabled(SimConfig::default(), EngineConfig::default());
    let seen = collect_messages(&mut engine);

    let header = MessageHeader::client(5, 12, true).with_extended(true);
    let meta = ExtendedMetaHeader::new().with_count(1).with_size(1);
    engine
        .platform()
        .push_raw(vec![header.into_bits(), meta.into_bits(), 0, 0x0403_0201]);
    engine.platform().push_client_message(5, b"plain");
    engine.run_for(SETTLE);

    assert_eq!(*seen.lock().unwrap(), vec![b"plain".to_vec()]);
    assert_eq!(engine.platform().resets(), 1);
}

#[test]
fn corrupted_header_resets_the_link() {
    let mut engine = enabled(SimConfig::default(), EngineConfig::default());

    // reserved bits set
    engine.platform().push_raw(vec![0x0e00_0405, 0]);
    engine.run_for(SETTLE);

    assert_eq!(engine.platform().resets(), 2);
    assert_eq!(engine.state(), DeviceState::Enabled);
    assert!(engine.client().unwrap().is_active());
}

#[test]
fn header_longer_than_the_buffer_resets_the_link() {
    let sim = SimConfig {
        me_depth: 16,
        ..SimConfig::default()
    };
    let mut engine = enabled(sim, EngineConfig::default());
    let seen = collect_messages(&mut engine);

    // 200 bytes can never fit 16 slots
    let header = MessageHeader::client(5, 200, true);
    engine.platform().push_raw(vec![header.into_bits()]);
    engine.platform().push_client_message(5, b"hello");
    engine.run_for(SETTLE);

    assert_eq!(engine.platform().resets(), 2);
    assert_eq!(engine.state(), DeviceState::Enabled);

    engine.platform().push_client_message(5, b"again");
    engine.run_for(SETTLE);
    assert_eq!(*seen.lock().unwrap(), vec![b"again".to_vec()]);
}

#[test]
fn clients_can_be_added_later() {
    let sim = SimConfig::default().without_clients();
    let mut engine = enabled(sim, EngineConfig::default());
    assert!(engine.client().is_none());

    engine.platform().push_device_message(&DeviceMessage::AddClientRequest {
        address: 9,
        properties: touch_properties(512),
    });
    engine.run_for(SETTLE);

    assert!(requests(&engine).contains(&HostRequest::AddClientResponse {
        address: 9,
        status: BusStatus::Success,
    }));
    let client = engine.client().expect("added client");
    assert_eq!(client.address(), Some(9));
    assert!(client.is_active());
}

#[test]
fn unknown_clients_are_rejected() {
    let sim = SimConfig::default().without_clients();
    let mut engine = enabled(sim, EngineConfig::default());

    engine.platform().push_device_message(&DeviceMessage::AddClientRequest {
        address: 9,
        properties: ClientProperties {
            uuid: Uuid::from_bytes([1; 16]),
            ..touch_properties(512)
        },
    });
    engine.run_for(SETTLE);

    assert!(requests(&engine).contains(&HostRequest::AddClientResponse {
        address: 9,
        status: BusStatus::Rejected,
    }));
    assert!(engine.client().is_none());
}

#[test]
fn stop_requested_by_the_management_engine() {
    let mut engine = enabled(SimConfig::default(), EngineConfig::default());

    engine.platform().push_device_message(&DeviceMessage::MeStopRequest {
        reason: StopReason::DriverStopRequest,
    });
    engine.run_for(SETTLE);

    assert_eq!(engine.bus_state(), BusState::Stopped);
    assert_eq!(engine.state(), DeviceState::PowerDown);
    assert!(matches!(
        requests(&engine).last(),
        Some(HostRequest::Stop { .. })
    ));
    assert_eq!(engine.platform().resets(), 1);
}
