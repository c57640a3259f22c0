//! Host bus handshake: start, capabilities, DMA ring, enumeration, client
//! properties, dynamic add, stop and PG isolation.

use crate::bitmap::ClientBitmap;
use crate::bus::{BusState, RX_BUFFER_SIZE};
use crate::client::Client;
use crate::device::DeviceState;
use crate::engine::{Engine, work};
use crate::error::{DmaError, EngineError, ProtocolError};
use crate::hbm::{BusStatus, Capabilities, ClientProperties, DeviceMessage, HostRequest, StopReason, command};
use crate::platform::Platform;
use crate::power::{PowerGatingEvent, PowerGatingState};
use crate::transport::Transport;
use crate::version::{BusVersion, Features};
use log::{debug, error, info, warn};

/// Result of offering reported properties to the client registry.
enum AddOutcome {
    Added,
    UnknownUuid,
}

impl<P: Platform> Engine<P> {
    pub(crate) fn handle_host_message(&mut self, length: usize) -> Result<(), EngineError> {
        if length >= RX_BUFFER_SIZE {
            return Err(ProtocolError::OversizedHostMessage(length).into());
        }
        Transport::new(self.platform.window()).read_bytes(&mut self.bus.rx_buffer[..length]);

        if self.bus.state == BusState::Idle {
            debug!("host bus message while idle, ignoring");
            return Ok(());
        }

        let message = DeviceMessage::decode(&self.bus.rx_buffer[..length])?;
        debug!("received host bus message {message:?}");

        match message {
            DeviceMessage::StartResponse {
                host_version_supported,
                me_max,
            } => self.on_start_response(host_version_supported, me_max),
            DeviceMessage::CapabilitiesResponse { granted } => self.on_capabilities_response(granted),
            DeviceMessage::DmaSetupResponse { status } => self.on_dma_setup_response(status),
            DeviceMessage::EnumerationResponse { valid_addresses } => {
                self.on_enumeration_response(valid_addresses)
            }
            DeviceMessage::ClientPropertiesResponse {
                address,
                status,
                properties,
            } => self.on_client_properties(address, status, &properties),
            DeviceMessage::AddClientRequest {
                address,
                properties,
            } => self.on_add_client(address, &properties),
            DeviceMessage::PgIsolationEntryResponse => self.on_pg_entry_response(),
            DeviceMessage::PgIsolationExitRequest => self.on_pg_exit_request(),
            DeviceMessage::StopResponse => self.on_stop_response(),
            DeviceMessage::MeStopRequest { reason } => {
                info!("management engine requested a stop ({reason:?})");
                self.bus.state = BusState::Stopped;
                self.send_stop_request()
            }
        }
    }

    fn unexpected(&self, command: u8) -> EngineError {
        ProtocolError::UnexpectedResponse {
            command,
            device: self.device.state,
            bus: self.bus.state,
        }
        .into()
    }

    /// Checks the handshake step a response belongs to. Responses arriving
    /// while powering down are dropped.
    fn expect_step(&self, command: u8, bus: BusState) -> Result<bool, EngineError> {
        if self.device.state == DeviceState::InitClients && self.bus.state == bus {
            return Ok(true);
        }
        if self.device.state == DeviceState::PowerDown {
            debug!("dropping response {command:#04x} while powering down");
            return Ok(false);
        }
        error!("response {command:#04x} out of sequence");
        Err(self.unexpected(command))
    }

    fn send_stop_request(&self) -> Result<(), EngineError> {
        self.send_host_request(&HostRequest::Stop {
            reason: StopReason::DriverStopRequest,
        })?;
        Ok(())
    }

    fn on_start_response(&mut self, supported: bool, me_max: BusVersion) -> Result<(), EngineError> {
        self.timers.init.cancel();

        let version = if supported {
            self.config.host_version
        } else {
            me_max
        };
        self.device.version = version;
        info!("bus version {version} (device maximum {me_max})");

        if !self.config.supports(version) {
            warn!("bus version {version} not supported, stopping bus");
            self.bus.state = BusState::Stopped;
            return self.send_stop_request();
        }
        self.configure_features(version);

        if !self.expect_step(command::HOST_START_RES, BusState::Starting)? {
            return Ok(());
        }

        if self.device.features.capabilities {
            self.bus.state = BusState::SetupCapabilities;
            self.send_host_request(&HostRequest::Capabilities {
                requested: Capabilities {
                    vtag: true,
                    client_dma: self.device.features.client_dma,
                },
            })?;
            self.arm_init_timer();
            Ok(())
        } else {
            self.setup_dma_or_enumerate()
        }
    }

    fn configure_features(&mut self, version: BusVersion) {
        let mut features = Features::for_version(version);
        features.dma_ring &= self.config.dma_ring;
        features.client_dma &= self.config.client_dma;
        debug!("bus features {features:?}");
        self.device.features = features;
    }

    fn on_capabilities_response(&mut self, granted: Capabilities) -> Result<(), EngineError> {
        self.timers.init.cancel();
        if !self.expect_step(command::CAPABILITIES_RES, BusState::SetupCapabilities)? {
            return Ok(());
        }
        self.device.features.vtag &= granted.vtag;
        self.device.features.client_dma &= granted.client_dma;
        self.setup_dma_or_enumerate()
    }

    fn setup_dma_or_enumerate(&mut self) -> Result<(), EngineError> {
        if self.device.features.dma_ring {
            match self.allocate_dma_rings() {
                Ok(regions) => {
                    self.bus.state = BusState::SetupDmaRing;
                    self.send_host_request(&HostRequest::DmaSetup { regions })?;
                    self.arm_init_timer();
                    return Ok(());
                }
                Err(err) => {
                    warn!("DMA ring unavailable: {err}");
                    self.device.features.dma_ring = false;
                }
            }
        }
        self.enumerate_clients()
    }

    fn on_dma_setup_response(&mut self, status: BusStatus) -> Result<(), EngineError> {
        self.timers.init.cancel();
        if !self.expect_step(command::DMA_SETUP_RES, BusState::SetupDmaRing)? {
            return Ok(());
        }
        if status != BusStatus::Success {
            let err = DmaError::Rejected(status);
            if status == BusStatus::NotAllowed {
                warn!("{err}, continuing without it");
            } else {
                error!("{err}, continuing without it");
            }
            self.device.features.dma_ring = false;
            self.release_dma_rings();
        }
        self.enumerate_clients()
    }

    fn enumerate_clients(&mut self) -> Result<(), EngineError> {
        self.bus.state = BusState::EnumerateClients;
        self.send_host_request(&HostRequest::Enumerate {
            allow_add: self.device.features.dynamic_clients,
            immediate: self.device.features.immediate_enum,
        })?;
        self.arm_init_timer();
        Ok(())
    }

    fn on_enumeration_response(&mut self, valid: ClientBitmap) -> Result<(), EngineError> {
        self.timers.init.cancel();
        if !self.expect_step(command::HOST_ENUM_RES, BusState::EnumerateClients)? {
            return Ok(());
        }
        info!("management engine reports {} clients", valid.count());
        self.bus.valid_addresses = valid;
        self.bus.state = BusState::RequestingClientProps;
        self.request_client_properties(0)
    }

    /// Requests the properties of the next valid address at or above
    /// `start`, or finishes enumeration.
    fn request_client_properties(&mut self, start: usize) -> Result<(), EngineError> {
        let Some(address) = self.bus.valid_addresses.next_set(start) else {
            self.bus.state = BusState::Started;
            self.device.state = DeviceState::Enabled;
            self.device.reset_count = 0;
            info!("bus started");
            self.schedule(work::RESCAN);
            self.arm_idle_timer();
            return Ok(());
        };

        self.send_host_request(&HostRequest::ClientProperties { address })?;
        self.arm_init_timer();
        Ok(())
    }

    fn on_client_properties(
        &mut self,
        address: u8,
        status: BusStatus,
        properties: &ClientProperties,
    ) -> Result<(), EngineError> {
        self.timers.init.cancel();
        if !self.expect_step(command::HOST_CLIENT_PROP_RES, BusState::RequestingClientProps)? {
            return Ok(());
        }

        match status {
            BusStatus::Success => {
                if let AddOutcome::UnknownUuid = self.add_client(address, properties) {
                    debug!("ignoring client {} at address {address}", properties.uuid);
                }
            }
            BusStatus::ClientNotFound => warn!("no client at address {address}"),
            status => {
                error!("client properties for address {address} failed: {status:?}");
                return Err(ProtocolError::PropertiesStatus { address, status }.into());
            }
        }

        self.request_client_properties(usize::from(address) + 1)
    }

    fn add_client(&mut self, address: u8, properties: &ClientProperties) -> AddOutcome {
        if properties.uuid != self.config.client_uuid {
            return AddOutcome::UnknownUuid;
        }

        info!(
            "found client {} at address {address}, max message length {}",
            properties.uuid, properties.max_msg_length
        );
        match self.client.as_mut() {
            Some(client) => client.reset_properties(address, *properties),
            None => self.client = Some(Client::new(address, *properties)),
        }
        AddOutcome::Added
    }

    fn on_add_client(&mut self, address: u8, properties: &ClientProperties) -> Result<(), EngineError> {
        if self.bus.state <= BusState::EnumerateClients || self.bus.state >= BusState::Stopped {
            error!("dynamic client add in bus state {:?}", self.bus.state);
            return Err(self.unexpected(command::ADD_CLIENT_REQ));
        }

        let status = match self.add_client(address, properties) {
            AddOutcome::Added => {
                if self.device.state == DeviceState::Enabled {
                    self.schedule(work::RESCAN);
                }
                BusStatus::Success
            }
            AddOutcome::UnknownUuid => {
                debug!("rejecting client {} at address {address}", properties.uuid);
                BusStatus::Rejected
            }
        };

        self.send_host_request(&HostRequest::AddClientResponse { address, status })?;
        Ok(())
    }

    fn on_pg_entry_response(&mut self) -> Result<(), EngineError> {
        if self.device.pg_state == PowerGatingState::Off
            && self.device.pg_event == PowerGatingEvent::Wait
        {
            self.device.pg_event = PowerGatingEvent::Received;
            return Ok(());
        }
        error!(
            "PG isolation entry response in {:?}/{:?}",
            self.device.pg_state, self.device.pg_event
        );
        Err(self.unexpected(command::PG_ISOLATION_ENTRY_RES))
    }

    fn on_pg_exit_request(&mut self) -> Result<(), EngineError> {
        if self.device.pg_state == PowerGatingState::On {
            match self.device.pg_event {
                PowerGatingEvent::Wait => {
                    self.device.pg_event = PowerGatingEvent::Received;
                    return Ok(());
                }
                PowerGatingEvent::Idle => {
                    self.device.pg_event = PowerGatingEvent::Received;
                    debug!("management engine asks to leave power gating");
                    self.schedule(work::RESUME);
                    return Ok(());
                }
                _ => {}
            }
        }
        error!(
            "PG isolation exit request in {:?}/{:?}",
            self.device.pg_state, self.device.pg_event
        );
        Err(self.unexpected(command::PG_ISOLATION_EXIT_REQ))
    }

    fn on_stop_response(&mut self) -> Result<(), EngineError> {
        if self.bus.state != BusState::Stopped {
            error!("stop response while the bus is {:?}", self.bus.state);
            return Err(self.unexpected(command::HOST_STOP_RES));
        }
        info!("bus stopped, powering down");
        self.device.state = DeviceState::PowerDown;
        Err(ProtocolError::BusStopped.into())
    }
}
