use mei_engine::{BusStatus, BusVersion, Capabilities, ClientProperties, TOUCH_CLIENT_UUID};
use std::collections::BTreeMap;
use std::time::Duration;

/// How the device acknowledges D0i3 transitions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PgAck {
    /// The transition completes within the register write.
    Immediate,
    /// The transition is reported in progress and completes with a D0i3
    /// interrupt after [`SimConfig::pg_delay`].
    Interrupt,
}

/// One client the simulated ME reports during enumeration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SimClient {
    pub status: BusStatus,
    pub properties: ClientProperties,
    /// Send every complete message back to the host.
    pub echo: bool,
}

impl SimClient {
    #[must_use]
    pub const fn new(properties: ClientProperties) -> Self {
        Self {
            status: BusStatus::Success,
            properties,
            echo: false,
        }
    }

    #[must_use]
    pub const fn with_status(mut self, status: BusStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub const fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

/// Properties of a touch client with the given message limit.
#[must_use]
pub const fn touch_properties(max_msg_length: u32) -> ClientProperties {
    ClientProperties {
        uuid: TOUCH_CLIENT_UUID,
        protocol_version: 1,
        max_connections: 1,
        fixed_address: 0,
        single_recv_buf: false,
        vt_supported: false,
        max_msg_length,
    }
}

/// Behavior of the simulated management engine.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Highest bus version the ME speaks.
    pub me_version: BusVersion,
    /// Capabilities the ME grants at most.
    pub capabilities: Capabilities,
    /// Answer to the DMA ring setup request.
    pub dma_status: BusStatus,
    /// Clients by ME address.
    pub clients: BTreeMap<u8, SimClient>,
    /// Depth of the host circular buffer in slots.
    pub host_depth: u8,
    /// Depth of the ME circular buffer in slots.
    pub me_depth: u8,
    /// Time from host reset to ME ready.
    pub ready_delay: Duration,
    /// Time from a host bus request to its response.
    pub response_delay: Duration,
    /// Answer PG isolation entry requests.
    pub pg_isolation: bool,
    pub pg_ack: PgAck,
    pub pg_delay: Duration,
    /// The device starts out in D0i3.
    pub start_gated: bool,
    /// Fail DMA allocations.
    pub dma_exhausted: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        let mut clients = BTreeMap::new();
        clients.insert(5, SimClient::new(touch_properties(4096)));
        Self {
            me_version: BusVersion::new(2, 2),
            capabilities: Capabilities {
                vtag: true,
                client_dma: true,
            },
            dma_status: BusStatus::Success,
            clients,
            host_depth: 128,
            me_depth: 128,
            ready_delay: Duration::from_millis(1),
            response_delay: Duration::ZERO,
            pg_isolation: true,
            pg_ack: PgAck::Interrupt,
            pg_delay: Duration::from_millis(1),
            start_gated: false,
            dma_exhausted: false,
        }
    }
}

impl SimConfig {
    #[must_use]
    pub const fn with_me_version(mut self, version: BusVersion) -> Self {
        self.me_version = version;
        self
    }

    #[must_use]
    pub fn with_client(mut self, address: u8, client: SimClient) -> Self {
        self.clients.insert(address, client);
        self
    }

    #[must_use]
    pub fn without_clients(mut self) -> Self {
        self.clients.clear();
        self
    }

    #[must_use]
    pub const fn with_host_depth(mut self, depth: u8) -> Self {
        self.host_depth = depth;
        self
    }

    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_pg_ack(mut self, ack: PgAck) -> Self {
        self.pg_ack = ack;
        self
    }

    #[must_use]
    pub const fn with_pg_isolation(mut self, answer: bool) -> Self {
        self.pg_isolation = answer;
        self
    }

    #[must_use]
    pub const fn with_dma_status(mut self, status: BusStatus) -> Self {
        self.dma_status = status;
        self
    }

    #[must_use]
    pub const fn with_dma_exhausted(mut self, exhausted: bool) -> Self {
        self.dma_exhausted = exhausted;
        self
    }

    #[must_use]
    pub const fn with_start_gated(mut self, gated: bool) -> Self {
        self.start_gated = gated;
        self
    }
}
