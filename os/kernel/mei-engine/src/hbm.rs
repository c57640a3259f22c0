//! Host bus messages: the control plane carried in address 0/0 messages.
//!
//! Requests travel host → ME ([`HostRequest`]), everything the ME sends
//! on its own or in response is a [`DeviceMessage`]. Both directions encode
//! and decode so that either side of the link can be modeled.

use crate::bitmap::ClientBitmap;
use crate::error::ProtocolError;
use crate::uuid::Uuid;
use crate::version::BusVersion;
use alloc::vec::Vec;

/// Command opcodes. Responses carry the request opcode with [`RESPONSE`](command::RESPONSE) set.
pub mod command {
    pub const RESPONSE: u8 = 0x80;

    pub const HOST_START_REQ: u8 = 0x01;
    pub const HOST_START_RES: u8 = 0x81;
    pub const HOST_STOP_REQ: u8 = 0x02;
    pub const HOST_STOP_RES: u8 = 0x82;
    pub const ME_STOP_REQ: u8 = 0x03;
    pub const HOST_ENUM_REQ: u8 = 0x04;
    pub const HOST_ENUM_RES: u8 = 0x84;
    pub const HOST_CLIENT_PROP_REQ: u8 = 0x05;
    pub const HOST_CLIENT_PROP_RES: u8 = 0x85;
    pub const PG_ISOLATION_ENTRY_REQ: u8 = 0x0a;
    pub const PG_ISOLATION_ENTRY_RES: u8 = 0x8a;
    pub const PG_ISOLATION_EXIT_REQ: u8 = 0x0b;
    pub const ADD_CLIENT_REQ: u8 = 0x0f;
    pub const ADD_CLIENT_RES: u8 = 0x8f;
    pub const DMA_SETUP_REQ: u8 = 0x12;
    pub const DMA_SETUP_RES: u8 = 0x92;
    pub const CAPABILITIES_REQ: u8 = 0x13;
    pub const CAPABILITIES_RES: u8 = 0x93;
}

/// Status byte of host bus responses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusStatus {
    Success,
    ClientNotFound,
    AlreadyExists,
    Rejected,
    InvalidParameter,
    NotAllowed,
    AlreadyStarted,
    NotStarted,
    Unknown(u8),
}

impl From<u8> for BusStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Success,
            1 => Self::ClientNotFound,
            2 => Self::AlreadyExists,
            3 => Self::Rejected,
            4 => Self::InvalidParameter,
            5 => Self::NotAllowed,
            6 => Self::AlreadyStarted,
            7 => Self::NotStarted,
            other => Self::Unknown(other),
        }
    }
}

impl From<BusStatus> for u8 {
    fn from(value: BusStatus) -> Self {
        match value {
            BusStatus::Success => 0,
            BusStatus::ClientNotFound => 1,
            BusStatus::AlreadyExists => 2,
            BusStatus::Rejected => 3,
            BusStatus::InvalidParameter => 4,
            BusStatus::NotAllowed => 5,
            BusStatus::AlreadyStarted => 6,
            BusStatus::NotStarted => 7,
            BusStatus::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopReason {
    DriverStopRequest,
    Other(u8),
}

impl From<u8> for StopReason {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::DriverStopRequest,
            other => Self::Other(other),
        }
    }
}

impl From<StopReason> for u8 {
    fn from(value: StopReason) -> Self {
        match value {
            StopReason::DriverStopRequest => 0,
            StopReason::Other(other) => other,
        }
    }
}

/// Capability bits exchanged during capability negotiation.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub vtag: bool,
    pub client_dma: bool,
}

impl Capabilities {
    const VTAG: u8 = 1 << 0;
    const CLIENT_DMA: u8 = 1 << 2;

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Self {
            vtag: bytes[0] & Self::VTAG != 0,
            client_dma: bytes[0] & Self::CLIENT_DMA != 0,
        }
    }

    #[must_use]
    pub const fn to_bytes(self) -> [u8; 3] {
        let mut first = 0;
        if self.vtag {
            first |= Self::VTAG;
        }
        if self.client_dma {
            first |= Self::CLIENT_DMA;
        }
        [first, 0, 0]
    }
}

/// Properties the ME reports for one client.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClientProperties {
    pub uuid: Uuid,
    pub protocol_version: u8,
    pub max_connections: u8,
    pub fixed_address: u8,
    pub single_recv_buf: bool,
    pub vt_supported: bool,
    pub max_msg_length: u32,
}

impl ClientProperties {
    pub const SIZE: usize = 24;

    const SINGLE_RECV_BUF: u8 = 1 << 0;
    const VT_SUPPORTED: u8 = 1 << 1;

    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; Self::SIZE] = bytes.get(..Self::SIZE)?.try_into().ok()?;
        let mut uuid = [0; 16];
        uuid.copy_from_slice(&bytes[..16]);
        Some(Self {
            uuid: Uuid::from_bytes(uuid),
            protocol_version: bytes[16],
            max_connections: bytes[17],
            fixed_address: bytes[18],
            single_recv_buf: bytes[19] & Self::SINGLE_RECV_BUF != 0,
            vt_supported: bytes[19] & Self::VT_SUPPORTED != 0,
            max_msg_length: u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
        })
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut flags = 0;
        if self.single_recv_buf {
            flags |= Self::SINGLE_RECV_BUF;
        }
        if self.vt_supported {
            flags |= Self::VT_SUPPORTED;
        }
        out.extend_from_slice(self.uuid.as_bytes());
        out.extend_from_slice(&[
            self.protocol_version,
            self.max_connections,
            self.fixed_address,
            flags,
        ]);
        out.extend_from_slice(&self.max_msg_length.to_le_bytes());
    }
}

/// One region announced in the DMA setup request.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DmaRingDescriptor {
    pub physical: u64,
    pub size: u32,
}

impl DmaRingDescriptor {
    const SIZE: usize = 12;

    #[allow(clippy::cast_possible_truncation)]
    fn encode_into(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&((self.physical >> 32) as u32).to_le_bytes());
        out.extend_from_slice(&(self.physical as u32).to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            physical: (u64::from(word(0)) << 32) | u64::from(word(4)),
            size: word(8),
        }
    }
}

/// Host → ME control messages.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HostRequest {
    Start { version: BusVersion },
    Stop { reason: StopReason },
    Capabilities { requested: Capabilities },
    DmaSetup { regions: [DmaRingDescriptor; 3] },
    Enumerate { allow_add: bool, immediate: bool },
    ClientProperties { address: u8 },
    AddClientResponse { address: u8, status: BusStatus },
    PgIsolationEntry,
}

impl HostRequest {
    const ENUM_ALLOW_ADD: u8 = 1 << 0;
    const ENUM_IMMEDIATE: u8 = 1 << 1;

    #[must_use]
    pub const fn command(&self) -> u8 {
        match self {
            Self::Start { .. } => command::HOST_START_REQ,
            Self::Stop { .. } => command::HOST_STOP_REQ,
            Self::Capabilities { .. } => command::CAPABILITIES_REQ,
            Self::DmaSetup { .. } => command::DMA_SETUP_REQ,
            Self::Enumerate { .. } => command::HOST_ENUM_REQ,
            Self::ClientProperties { .. } => command::HOST_CLIENT_PROP_REQ,
            Self::AddClientResponse { .. } => command::ADD_CLIENT_RES,
            Self::PgIsolationEntry => command::PG_ISOLATION_ENTRY_REQ,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let cmd = self.command();
        let mut out = Vec::with_capacity(40);
        match *self {
            Self::Start { version } => out.extend_from_slice(&[cmd, 0, version.minor, version.major]),
            Self::Stop { reason } => out.extend_from_slice(&[cmd, reason.into(), 0, 0]),
            Self::Capabilities { requested } => {
                out.push(cmd);
                out.extend_from_slice(&requested.to_bytes());
            }
            Self::DmaSetup { regions } => {
                out.extend_from_slice(&[cmd, 0, 0, 0]);
                for region in regions {
                    region.encode_into(&mut out);
                }
            }
            Self::Enumerate {
                allow_add,
                immediate,
            } => {
                let mut flags = 0;
                if allow_add {
                    flags |= Self::ENUM_ALLOW_ADD;
                }
                if immediate {
                    flags |= Self::ENUM_IMMEDIATE;
                }
                out.extend_from_slice(&[cmd, flags, 0, 0]);
            }
            Self::ClientProperties { address } => out.extend_from_slice(&[cmd, address, 0, 0]),
            Self::AddClientResponse { address, status } => {
                out.extend_from_slice(&[cmd, address, status.into(), 0]);
            }
            Self::PgIsolationEntry => out.extend_from_slice(&[cmd, 0, 0, 0]),
        }
        out
    }

    /// # Errors
    /// Fails on empty, truncated or unknown messages.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let cmd = *bytes.first().ok_or(ProtocolError::Empty)?;
        let need = |len: usize| {
            if bytes.len() < len {
                Err(ProtocolError::Truncated {
                    command: cmd,
                    length: bytes.len(),
                })
            } else {
                Ok(())
            }
        };
        match cmd {
            command::HOST_START_REQ => {
                need(4)?;
                Ok(Self::Start {
                    version: BusVersion::new(bytes[3], bytes[2]),
                })
            }
            command::HOST_STOP_REQ => {
                need(2)?;
                Ok(Self::Stop {
                    reason: bytes[1].into(),
                })
            }
            command::CAPABILITIES_REQ => {
                need(4)?;
                Ok(Self::Capabilities {
                    requested: Capabilities::from_bytes([bytes[1], bytes[2], bytes[3]]),
                })
            }
            command::DMA_SETUP_REQ => {
                need(4 + 3 * DmaRingDescriptor::SIZE)?;
                let region = |i: usize| DmaRingDescriptor::decode(&bytes[4 + i * DmaRingDescriptor::SIZE..]);
                Ok(Self::DmaSetup {
                    regions: [region(0), region(1), region(2)],
                })
            }
            command::HOST_ENUM_REQ => {
                need(2)?;
                Ok(Self::Enumerate {
                    allow_add: bytes[1] & Self::ENUM_ALLOW_ADD != 0,
                    immediate: bytes[1] & Self::ENUM_IMMEDIATE != 0,
                })
            }
            command::HOST_CLIENT_PROP_REQ => {
                need(2)?;
                Ok(Self::ClientProperties { address: bytes[1] })
            }
            command::ADD_CLIENT_RES => {
                need(3)?;
                Ok(Self::AddClientResponse {
                    address: bytes[1],
                    status: bytes[2].into(),
                })
            }
            command::PG_ISOLATION_ENTRY_REQ => Ok(Self::PgIsolationEntry),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// ME → host control messages.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceMessage {
    StartResponse {
        host_version_supported: bool,
        me_max: BusVersion,
    },
    StopResponse,
    MeStopRequest {
        reason: StopReason,
    },
    EnumerationResponse {
        valid_addresses: ClientBitmap,
    },
    ClientPropertiesResponse {
        address: u8,
        status: BusStatus,
        properties: ClientProperties,
    },
    AddClientRequest {
        address: u8,
        properties: ClientProperties,
    },
    CapabilitiesResponse {
        granted: Capabilities,
    },
    DmaSetupResponse {
        status: BusStatus,
    },
    PgIsolationEntryResponse,
    PgIsolationExitRequest,
}

impl DeviceMessage {
    #[must_use]
    pub const fn command(&self) -> u8 {
        match self {
            Self::StartResponse { .. } => command::HOST_START_RES,
            Self::StopResponse => command::HOST_STOP_RES,
            Self::MeStopRequest { .. } => command::ME_STOP_REQ,
            Self::EnumerationResponse { .. } => command::HOST_ENUM_RES,
            Self::ClientPropertiesResponse { .. } => command::HOST_CLIENT_PROP_RES,
            Self::AddClientRequest { .. } => command::ADD_CLIENT_REQ,
            Self::CapabilitiesResponse { .. } => command::CAPABILITIES_RES,
            Self::DmaSetupResponse { .. } => command::DMA_SETUP_RES,
            Self::PgIsolationEntryResponse => command::PG_ISOLATION_ENTRY_RES,
            Self::PgIsolationExitRequest => command::PG_ISOLATION_EXIT_REQ,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let cmd = self.command();
        let mut out = Vec::with_capacity(36);
        match *self {
            Self::StartResponse {
                host_version_supported,
                me_max,
            } => out.extend_from_slice(&[
                cmd,
                u8::from(host_version_supported),
                me_max.minor,
                me_max.major,
            ]),
            Self::StopResponse | Self::PgIsolationEntryResponse | Self::PgIsolationExitRequest => {
                out.extend_from_slice(&[cmd, 0, 0, 0]);
            }
            Self::MeStopRequest { reason } => out.extend_from_slice(&[cmd, reason.into(), 0, 0]),
            Self::EnumerationResponse { valid_addresses } => {
                out.extend_from_slice(&[cmd, 0, 0, 0]);
                out.extend_from_slice(valid_addresses.as_bytes());
            }
            Self::ClientPropertiesResponse {
                address,
                status,
                properties,
            } => {
                out.extend_from_slice(&[cmd, address, status.into(), 0]);
                properties.encode_into(&mut out);
            }
            Self::AddClientRequest {
                address,
                properties,
            } => {
                out.extend_from_slice(&[cmd, address, 0, 0]);
                properties.encode_into(&mut out);
            }
            Self::CapabilitiesResponse { granted } => {
                out.push(cmd);
                out.extend_from_slice(&granted.to_bytes());
            }
            Self::DmaSetupResponse { status } => out.extend_from_slice(&[cmd, status.into(), 0, 0]),
        }
        out
    }

    /// # Errors
    /// Fails on empty, truncated or unknown messages.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let cmd = *bytes.first().ok_or(ProtocolError::Empty)?;
        let need = |len: usize| {
            if bytes.len() < len {
                Err(ProtocolError::Truncated {
                    command: cmd,
                    length: bytes.len(),
                })
            } else {
                Ok(())
            }
        };
        let properties = |offset: usize| {
            ClientProperties::decode(&bytes[offset..]).ok_or(ProtocolError::Truncated {
                command: cmd,
                length: bytes.len(),
            })
        };
        match cmd {
            command::HOST_START_RES => {
                need(4)?;
                Ok(Self::StartResponse {
                    host_version_supported: bytes[1] != 0,
                    me_max: BusVersion::new(bytes[3], bytes[2]),
                })
            }
            command::HOST_STOP_RES => Ok(Self::StopResponse),
            command::ME_STOP_REQ => {
                need(2)?;
                Ok(Self::MeStopRequest {
                    reason: bytes[1].into(),
                })
            }
            command::HOST_ENUM_RES => {
                need(4 + ClientBitmap::BYTES)?;
                let mut map = [0; ClientBitmap::BYTES];
                map.copy_from_slice(&bytes[4..4 + ClientBitmap::BYTES]);
                Ok(Self::EnumerationResponse {
                    valid_addresses: ClientBitmap::from_bytes(map),
                })
            }
            command::HOST_CLIENT_PROP_RES => {
                need(4 + ClientProperties::SIZE)?;
                Ok(Self::ClientPropertiesResponse {
                    address: bytes[1],
                    status: bytes[2].into(),
                    properties: properties(4)?,
                })
            }
            command::ADD_CLIENT_REQ => {
                need(4 + ClientProperties::SIZE)?;
                Ok(Self::AddClientRequest {
                    address: bytes[1],
                    properties: properties(4)?,
                })
            }
            command::CAPABILITIES_RES => {
                need(4)?;
                Ok(Self::CapabilitiesResponse {
                    granted: Capabilities::from_bytes([bytes[1], bytes[2], bytes[3]]),
                })
            }
            command::DMA_SETUP_RES => {
                need(2)?;
                Ok(Self::DmaSetupResponse {
                    status: bytes[1].into(),
                })
            }
            command::PG_ISOLATION_ENTRY_RES => Ok(Self::PgIsolationEntryResponse),
            command::PG_ISOLATION_EXIT_REQ => Ok(Self::PgIsolationExitRequest),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uuid::TOUCH_CLIENT_UUID;

    fn touch_properties() -> ClientProperties {
        ClientProperties {
            uuid: TOUCH_CLIENT_UUID,
            protocol_version: 1,
            max_connections: 1,
            fixed_address: 0,
            single_recv_buf: true,
            vt_supported: false,
            max_msg_length: 4096,
        }
    }

    #[test]
    fn start_request_layout() {
        let bytes = HostRequest::Start {
            version: BusVersion::new(2, 2),
        }
        .encode();
        assert_eq!(bytes, [0x01, 0x00, 0x02, 0x02]);
    }

    #[test]
    fn start_response_decodes_version() {
        let msg = DeviceMessage::decode(&[0x81, 0x00, 0x00, 0x01]).unwrap();
        assert_eq!(
            msg,
            DeviceMessage::StartResponse {
                host_version_supported: false,
                me_max: BusVersion::new(1, 0),
            }
        );
    }

    #[test]
    fn enumerate_flags() {
        let bytes = HostRequest::Enumerate {
            allow_add: true,
            immediate: true,
        }
        .encode();
        assert_eq!(bytes, [0x04, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn enumeration_response_bitmap() {
        let mut raw = vec![0x84, 0, 0, 0];
        raw.extend_from_slice(&[0; 32]);
        raw[4] = 0b0010_0000; // address 5
        raw[4 + 5] = 0b0000_0001; // address 40
        let DeviceMessage::EnumerationResponse { valid_addresses } = DeviceMessage::decode(&raw).unwrap() else {
            panic!("wrong message");
        };
        assert_eq!(valid_addresses.iter().collect::<Vec<_>>(), vec![5, 40]);
    }

    #[test]
    fn client_properties_layout() {
        let mut out = Vec::new();
        touch_properties().encode_into(&mut out);
        assert_eq!(out.len(), ClientProperties::SIZE);
        assert_eq!(&out[..4], &[0x70, 0x08, 0x8d, 0x3e]);
        assert_eq!(out[19], 0b01);
        assert_eq!(&out[20..], &4096u32.to_le_bytes());
        assert_eq!(ClientProperties::decode(&out), Some(touch_properties()));
    }

    #[test]
    fn property_response_with_status() {
        let msg = DeviceMessage::ClientPropertiesResponse {
            address: 12,
            status: BusStatus::ClientNotFound,
            properties: touch_properties(),
        };
        let bytes = msg.encode();
        assert_eq!(&bytes[..4], &[0x85, 12, 1, 0]);
        assert_eq!(bytes.len(), 28);
        assert_eq!(DeviceMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn dma_setup_request_layout() {
        let req = HostRequest::DmaSetup {
            regions: [
                DmaRingDescriptor {
                    physical: 0x1_2345_6000,
                    size: 0x20000,
                },
                DmaRingDescriptor::default(),
                DmaRingDescriptor {
                    physical: 0x8000,
                    size: 4096,
                },
            ],
        };
        let bytes = req.encode();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0x2345_6000u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &0x20000u32.to_le_bytes());
        assert_eq!(HostRequest::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn capabilities_bits() {
        let caps = Capabilities {
            vtag: true,
            client_dma: true,
        };
        assert_eq!(caps.to_bytes(), [0b101, 0, 0]);
        let granted = Capabilities::from_bytes([0b100, 0, 0]);
        assert!(!granted.vtag && granted.client_dma);
    }

    #[test]
    fn truncated_and_unknown() {
        assert_eq!(
            DeviceMessage::decode(&[0x85, 1, 0, 0]),
            Err(ProtocolError::Truncated {
                command: 0x85,
                length: 4
            })
        );
        assert_eq!(
            DeviceMessage::decode(&[0x08, 0, 0, 0]),
            Err(ProtocolError::UnknownCommand(0x08))
        );
        assert_eq!(DeviceMessage::decode(&[]), Err(ProtocolError::Empty));
    }

    #[test]
    fn status_conversion() {
        assert_eq!(BusStatus::from(5), BusStatus::NotAllowed);
        assert_eq!(u8::from(BusStatus::Unknown(0x42)), 0x42);
        assert_eq!(u8::from(StopReason::DriverStopRequest), 0);
    }
}
